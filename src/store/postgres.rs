use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    NewUser, Permissions, Store, StoreError, StoreResult, Token, TokenScope, UnitOfWork, User,
};

const USER_COLUMNS: &str = "id, created_at, name, email, password_hash, activated, version";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_id(&self, id: Uuid) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert_token(&self, token: &Token) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (hash, user_id, expires_at, scope, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.hash)
        .bind(token.user_id)
        .bind(token.expires_at)
        .bind(token.scope.as_str())
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user_for_token(&self, hash: &[u8], scope: TokenScope) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT users.id, users.created_at, users.name, users.email,
                   users.password_hash, users.activated, users.version
              FROM users
             INNER JOIN tokens ON users.id = tokens.user_id
             WHERE tokens.hash = $1
               AND tokens.scope = $2
               AND tokens.expires_at > now()
             LIMIT 1
            "#,
        )
        .bind(hash)
        .bind(scope.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_tokens_for_user(&self, user_id: Uuid, scope: TokenScope) -> StoreResult<()> {
        sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND scope = $2")
            .bind(user_id)
            .bind(scope.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_permissions_for_user(&self, user_id: Uuid) -> StoreResult<Permissions> {
        let codes: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT permissions.code
              FROM permissions
             INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
             WHERE users_permissions.user_id = $1
             ORDER BY permissions.code
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Permissions(codes))
    }
}

/// A Postgres transaction. sqlx rolls it back if it is dropped uncommitted.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, activated)
            VALUES ($1, $2, $3, false)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(created)
    }

    async fn add_permissions_for_user(
        &mut self,
        user_id: Uuid,
        codes: &[String],
    ) -> StoreResult<()> {
        if codes.is_empty() {
            return Ok(());
        }

        let known: Vec<String> =
            sqlx::query_scalar("SELECT code FROM permissions WHERE code = ANY($1)")
                .bind(codes)
                .fetch_all(&mut *self.tx)
                .await?;
        if let Some(missing) = codes.iter().find(|c| !known.contains(c)) {
            return Err(StoreError::UnknownPermission(missing.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO users_permissions (user_id, permission_id)
            SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(codes)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn activate_user(&mut self, user_id: Uuid, expected_version: i32) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET activated = true, version = version + 1
             WHERE id = $1 AND version = $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(expected_version)
        .fetch_optional(&mut *self.tx)
        .await?;
        user.ok_or(StoreError::NotFound)
    }

    async fn update_password(
        &mut self,
        user_id: Uuid,
        password_hash: &str,
        expected_version: i32,
    ) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET password_hash = $1, version = version + 1
             WHERE id = $2 AND version = $3
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(password_hash)
        .bind(user_id)
        .bind(expected_version)
        .fetch_optional(&mut *self.tx)
        .await?;
        user.ok_or(StoreError::NotFound)
    }

    async fn delete_tokens_for_user(
        &mut self,
        user_id: Uuid,
        scope: TokenScope,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND scope = $2")
            .bind(user_id)
            .bind(scope.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
