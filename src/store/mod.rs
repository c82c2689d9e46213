//! Relational store contract.
//!
//! Handlers and services only see [`Store`] and [`UnitOfWork`]; the Postgres
//! implementation lives in [`postgres`], an in-memory one backs the tests.

use async_trait::async_trait;
use uuid::Uuid;

#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod types;

pub use types::{NewUser, Permissions, Token, TokenScope, User};

/// Name of the unique constraint guarding `users.email`.
pub const USERS_EMAIL_KEY: &str = "users_email_key";

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row matched, or a conditional update touched zero rows.
    #[error("record not found")]
    NotFound,
    #[error("unique constraint {constraint} violated")]
    UniqueViolation { constraint: String },
    #[error("unknown permission code {0}")]
    UnknownPermission(String),
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                }
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Single-statement access to users, tokens and permissions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens an atomic unit. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User>;

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User>;

    async fn insert_token(&self, token: &Token) -> StoreResult<()>;

    /// Owner of the unexpired token matching both digest and scope.
    async fn get_user_for_token(&self, hash: &[u8], scope: TokenScope) -> StoreResult<User>;

    async fn delete_tokens_for_user(&self, user_id: Uuid, scope: TokenScope) -> StoreResult<()>;

    async fn get_permissions_for_user(&self, user_id: Uuid) -> StoreResult<Permissions>;
}

/// Writes that must land together. Conditional updates return
/// [`StoreError::NotFound`] when the expected version no longer matches.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User>;

    async fn add_permissions_for_user(&mut self, user_id: Uuid, codes: &[String])
        -> StoreResult<()>;

    async fn activate_user(&mut self, user_id: Uuid, expected_version: i32) -> StoreResult<User>;

    async fn update_password(
        &mut self,
        user_id: Uuid,
        password_hash: &str,
        expected_version: i32,
    ) -> StoreResult<User>;

    async fn delete_tokens_for_user(&mut self, user_id: Uuid, scope: TokenScope)
        -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
