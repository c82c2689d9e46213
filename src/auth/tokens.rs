//! Stateful opaque tokens.
//!
//! The plaintext goes to the client once; the store only ever sees its
//! SHA-256 digest. Scope is part of every lookup.

use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppResult;
use crate::store::{Store, Token, TokenScope, User};

const TOKEN_ENTROPY_BYTES: usize = 16;

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn Store>,
}

pub fn digest(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

fn random_plaintext() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| anyhow::anyhow!("random source failed: {e}"))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

impl TokenService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Issues a token for `user_id` and returns its plaintext with the stored record.
    pub async fn generate(
        &self,
        user_id: Uuid,
        ttl: Duration,
        scope: TokenScope,
    ) -> AppResult<(String, Token)> {
        let plaintext = random_plaintext()?;
        let now = OffsetDateTime::now_utc();
        let token = Token {
            hash: digest(&plaintext),
            user_id,
            scope,
            expires_at: now + ttl,
            created_at: now,
        };
        self.store.insert_token(&token).await?;
        debug!(%user_id, %scope, expires_at = %token.expires_at, "token issued");
        Ok((plaintext, token))
    }

    /// Owner of a live token. Wrong, expired and foreign-scope tokens all
    /// come back as `AppError::NotFound`.
    pub async fn resolve(&self, plaintext: &str, scope: TokenScope) -> AppResult<User> {
        let user = self
            .store
            .get_user_for_token(&digest(plaintext), scope)
            .await?;
        Ok(user)
    }

    pub async fn revoke_all(&self, user_id: Uuid, scope: TokenScope) -> AppResult<()> {
        self.store.delete_tokens_for_user(user_id, scope).await?;
        debug!(%user_id, %scope, "tokens revoked");
        Ok(())
    }
}
