use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    NewUser, Permissions, Store, StoreError, StoreResult, Token, TokenScope, UnitOfWork, User,
    USERS_EMAIL_KEY,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    tokens: Vec<Token>,
    permissions: Vec<(i64, String)>,
    user_permissions: BTreeSet<(Uuid, i64)>,
}

impl Tables {
    fn seeded() -> Self {
        let permissions = ["movies:read", "movies:write", "users:read"]
            .iter()
            .enumerate()
            .map(|(i, code)| (i as i64 + 1, code.to_string()))
            .collect();
        Self {
            permissions,
            ..Self::default()
        }
    }

    fn user_for_token(&self, hash: &[u8], scope: TokenScope) -> StoreResult<User> {
        let now = OffsetDateTime::now_utc();
        self.tokens
            .iter()
            .find(|t| t.hash == hash && t.scope == scope && t.expires_at > now)
            .and_then(|t| self.users.get(&t.user_id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn delete_tokens(&mut self, user_id: Uuid, scope: TokenScope) {
        self.tokens
            .retain(|t| !(t.user_id == user_id && t.scope == scope));
    }

    fn bump_version<F>(&mut self, user_id: Uuid, expected_version: i32, apply: F) -> StoreResult<User>
    where
        F: FnOnce(&mut User),
    {
        match self.users.get_mut(&user_id) {
            Some(user) if user.version == expected_version => {
                apply(user);
                user.version += 1;
                Ok(user.clone())
            }
            _ => Err(StoreError::NotFound),
        }
    }
}

/// Store kept in process memory. Units of work are serialised and operate on
/// a copy of the tables that replaces the shared state only on commit.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::seeded())),
        }
    }

    pub async fn token_count(&self, user_id: Uuid, scope: TokenScope) -> usize {
        let tables = self.tables.lock().await;
        tables
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.scope == scope)
            .count()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let tables = self.tables.lock().await;
        tables
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        let tables = self.tables.lock().await;
        tables.users.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn insert_token(&self, token: &Token) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.tokens.push(token.clone());
        Ok(())
    }

    async fn get_user_for_token(&self, hash: &[u8], scope: TokenScope) -> StoreResult<User> {
        self.tables.lock().await.user_for_token(hash, scope)
    }

    async fn delete_tokens_for_user(&self, user_id: Uuid, scope: TokenScope) -> StoreResult<()> {
        self.tables.lock().await.delete_tokens(user_id, scope);
        Ok(())
    }

    async fn get_permissions_for_user(&self, user_id: Uuid) -> StoreResult<Permissions> {
        let tables = self.tables.lock().await;
        let mut codes: Vec<String> = tables
            .user_permissions
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .filter_map(|(_, pid)| {
                tables
                    .permissions
                    .iter()
                    .find(|(id, _)| id == pid)
                    .map(|(_, code)| code.clone())
            })
            .collect();
        codes.sort();
        Ok(Permissions(codes))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User> {
        if self.working.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation {
                constraint: USERS_EMAIL_KEY.to_string(),
            });
        }
        let created = User {
            id: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            activated: false,
            version: 1,
        };
        self.working.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn add_permissions_for_user(
        &mut self,
        user_id: Uuid,
        codes: &[String],
    ) -> StoreResult<()> {
        for code in codes {
            let id = self
                .working
                .permissions
                .iter()
                .find(|(_, c)| c == code)
                .map(|(id, _)| *id)
                .ok_or_else(|| StoreError::UnknownPermission(code.clone()))?;
            self.working.user_permissions.insert((user_id, id));
        }
        Ok(())
    }

    async fn activate_user(&mut self, user_id: Uuid, expected_version: i32) -> StoreResult<User> {
        self.working
            .bump_version(user_id, expected_version, |u| u.activated = true)
    }

    async fn update_password(
        &mut self,
        user_id: Uuid,
        password_hash: &str,
        expected_version: i32,
    ) -> StoreResult<User> {
        self.working.bump_version(user_id, expected_version, |u| {
            u.password_hash = password_hash.to_string()
        })
    }

    async fn delete_tokens_for_user(
        &mut self,
        user_id: Uuid,
        scope: TokenScope,
    ) -> StoreResult<()> {
        self.working.delete_tokens(user_id, scope);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

/// Which store call a [`FaultyStore`] turns into a database failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    TokenLookup,
    PermissionLookup,
    TokenRevocation,
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

/// A [`MemoryStore`] with one operation that always fails as if the
/// database were unreachable.
#[derive(Clone)]
pub struct FaultyStore {
    inner: MemoryStore,
    fault: Fault,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, fault: Fault) -> Self {
        Self { inner, fault }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyUnitOfWork {
            inner,
            fault: self.fault,
        }))
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        self.inner.get_user_by_email(email).await
    }

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        self.inner.get_user_by_id(id).await
    }

    async fn insert_token(&self, token: &Token) -> StoreResult<()> {
        self.inner.insert_token(token).await
    }

    async fn get_user_for_token(&self, hash: &[u8], scope: TokenScope) -> StoreResult<User> {
        if self.fault == Fault::TokenLookup {
            return Err(unavailable());
        }
        self.inner.get_user_for_token(hash, scope).await
    }

    async fn delete_tokens_for_user(&self, user_id: Uuid, scope: TokenScope) -> StoreResult<()> {
        if self.fault == Fault::TokenRevocation {
            return Err(unavailable());
        }
        self.inner.delete_tokens_for_user(user_id, scope).await
    }

    async fn get_permissions_for_user(&self, user_id: Uuid) -> StoreResult<Permissions> {
        if self.fault == Fault::PermissionLookup {
            return Err(unavailable());
        }
        self.inner.get_permissions_for_user(user_id).await
    }
}

pub struct FaultyUnitOfWork {
    inner: Box<dyn UnitOfWork>,
    fault: Fault,
}

#[async_trait]
impl UnitOfWork for FaultyUnitOfWork {
    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User> {
        self.inner.insert_user(user).await
    }

    async fn add_permissions_for_user(
        &mut self,
        user_id: Uuid,
        codes: &[String],
    ) -> StoreResult<()> {
        self.inner.add_permissions_for_user(user_id, codes).await
    }

    async fn activate_user(&mut self, user_id: Uuid, expected_version: i32) -> StoreResult<User> {
        self.inner.activate_user(user_id, expected_version).await
    }

    async fn update_password(
        &mut self,
        user_id: Uuid,
        password_hash: &str,
        expected_version: i32,
    ) -> StoreResult<User> {
        self.inner
            .update_password(user_id, password_hash, expected_version)
            .await
    }

    async fn delete_tokens_for_user(
        &mut self,
        user_id: Uuid,
        scope: TokenScope,
    ) -> StoreResult<()> {
        if self.fault == Fault::TokenRevocation {
            return Err(unavailable());
        }
        self.inner.delete_tokens_for_user(user_id, scope).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Test".into(),
            email: email.into(),
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn uncommitted_unit_is_discarded() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.insert_user(&new_user("a@example.com")).await.unwrap();
        drop(uow);
        assert_eq!(store.user_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_email_reports_constraint() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.insert_user(&new_user("a@example.com")).await.unwrap();
        let err = uow.insert_user(&new_user("a@example.com")).await.unwrap_err();
        assert!(
            matches!(err, StoreError::UniqueViolation { ref constraint } if constraint == USERS_EMAIL_KEY)
        );
    }

    #[tokio::test]
    async fn stale_version_touches_nothing() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let user = uow.insert_user(&new_user("a@example.com")).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let err = uow.activate_user(user.id, user.version + 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        uow.commit().await.unwrap();

        let reloaded = store.get_user_by_id(user.id).await.unwrap();
        assert!(!reloaded.activated);
        assert_eq!(reloaded.version, user.version);
    }
}
