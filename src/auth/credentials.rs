use std::sync::Arc;

use time::Duration;
use tracing::{info, warn};

use super::{password::Hasher, tokens::TokenService};
use crate::error::{AppError, AppResult};
use crate::store::{Store, StoreError, Token, TokenScope};

/// Login: email + password in, authentication token out.
#[derive(Clone)]
pub struct CredentialVerifier {
    store: Arc<dyn Store>,
    hasher: Hasher,
    tokens: TokenService,
    ttl: Duration,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn Store>, hasher: Hasher, tokens: TokenService, ttl: Duration) -> Self {
        Self {
            store,
            hasher,
            tokens,
            ttl,
        }
    }

    /// Unknown email and wrong password both yield `InvalidCredentials`.
    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<(String, Token)> {
        let user = match self.store.get_user_by_email(email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                warn!("login unknown email");
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        let matched = self
            .hasher
            .verify_blocking(password.to_string(), user.password_hash.clone())
            .await?;
        if !matched {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let issued = self
            .tokens
            .generate(user.id, self.ttl, TokenScope::Authentication)
            .await?;
        info!(user_id = %user.id, "user logged in");
        Ok(issued)
    }
}
