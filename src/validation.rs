use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AppError, Violations};

/// Length of a token plaintext: 16 random bytes, unpadded URL-safe base64.
pub const TOKEN_PLAINTEXT_LEN: usize = 22;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    )
    .unwrap();
}

/// Collects every failed check instead of stopping at the first one.
/// The first message recorded for a field wins.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Violations,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.errors
                .entry(field.to_string())
                .or_insert_with(|| message.to_string());
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_name(v: &mut Validator, name: &str) {
    v.check(!name.is_empty(), "name", "must be provided");
    v.check(name.len() <= 500, "name", "must not be more than 500 bytes long");
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(email.len() <= 254, "email", "must not be more than 254 bytes long");
    v.check(EMAIL_RE.is_match(email), "email", "must be a valid email address");
}

pub fn validate_password(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(password.len() >= 8, "password", "must be at least 8 bytes long");
    v.check(password.len() <= 72, "password", "must not be more than 72 bytes long");
}

pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_PLAINTEXT_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn validate_token(v: &mut Validator, token: &str) {
    v.check(!token.is_empty(), "token", "must be provided");
    v.check(
        token.len() == TOKEN_PLAINTEXT_LEN,
        "token",
        "must be 22 bytes long",
    );
    v.check(is_well_formed_token(token), "token", "must be a valid token");
}
