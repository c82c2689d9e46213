//! Multi-step account changes, each committed as one unit of work.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{NewUser, Store, StoreError, TokenScope, UnitOfWork, User};

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
}

/// A conditional update that touched no row lost the version race.
fn conflict_on_missing(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound => AppError::EditConflict,
        other => other.into(),
    }
}

/// Commits on success, rolls back otherwise. The step error wins over a
/// rollback failure.
async fn finish<T>(uow: Box<dyn UnitOfWork>, result: AppResult<T>) -> AppResult<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn register_steps(
    uow: &mut dyn UnitOfWork,
    user: &NewUser,
    permissions: &[String],
) -> AppResult<User> {
    let created = uow.insert_user(user).await?;
    uow.add_permissions_for_user(created.id, permissions).await?;
    Ok(created)
}

async fn activate_steps(
    uow: &mut dyn UnitOfWork,
    user_id: Uuid,
    expected_version: i32,
) -> AppResult<User> {
    let user = uow
        .activate_user(user_id, expected_version)
        .await
        .map_err(conflict_on_missing)?;
    uow.delete_tokens_for_user(user_id, TokenScope::Activation)
        .await?;
    Ok(user)
}

async fn reset_password_steps(
    uow: &mut dyn UnitOfWork,
    user_id: Uuid,
    password_hash: &str,
    expected_version: i32,
) -> AppResult<User> {
    let user = uow
        .update_password(user_id, password_hash, expected_version)
        .await
        .map_err(conflict_on_missing)?;
    uow.delete_tokens_for_user(user_id, TokenScope::PasswordReset)
        .await?;
    Ok(user)
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Inserts an inactive user and grants `permissions`.
    pub async fn register_user(&self, user: NewUser, permissions: &[String]) -> AppResult<User> {
        let mut uow = self.store.begin().await?;
        let result = register_steps(uow.as_mut(), &user, permissions).await;
        let created = finish(uow, result).await?;
        info!(user_id = %created.id, "user registered");
        Ok(created)
    }

    /// Marks the user active if `expected_version` is current, and revokes
    /// every outstanding activation token in the same unit.
    pub async fn activate_user(&self, user_id: Uuid, expected_version: i32) -> AppResult<User> {
        let mut uow = self.store.begin().await?;
        let result = activate_steps(uow.as_mut(), user_id, expected_version).await;
        let user = finish(uow, result).await?;
        info!(%user_id, version = user.version, "user activated");
        Ok(user)
    }

    /// Replaces the password hash if `expected_version` is current, and
    /// revokes every outstanding password-reset token in the same unit.
    pub async fn reset_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        expected_version: i32,
    ) -> AppResult<User> {
        let mut uow = self.store.begin().await?;
        let result = reset_password_steps(uow.as_mut(), user_id, password_hash, expected_version).await;
        let user = finish(uow, result).await?;
        info!(%user_id, version = user.version, "password reset");
        Ok(user)
    }
}
