use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string
    pub activated: bool,
    #[serde(skip_serializing)]
    pub version: i32, // optimistic lock
}

/// Fields supplied when inserting a user; activation always starts false.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenScope {
    Activation,
    Authentication,
    PasswordReset,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
            TokenScope::Authentication => "authentication",
            TokenScope::PasswordReset => "password-reset",
        }
    }
}

impl std::fmt::Display for TokenScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted token row. Only the SHA-256 digest of the plaintext is kept.
#[derive(Debug, Clone)]
pub struct Token {
    pub hash: Vec<u8>,
    pub user_id: Uuid,
    pub scope: TokenScope,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Permission codes granted to a user, e.g. `movies:read`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(pub Vec<String>);

impl Permissions {
    pub fn includes(&self, code: &str) -> bool {
        self.0.iter().any(|c| c == code)
    }
}
