use std::collections::BTreeMap;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::{StoreError, USERS_EMAIL_KEY};

/// Field name -> message for every failed check of a request.
pub type Violations = BTreeMap<String, String>;

/// Failure kinds surfaced by the core. Each maps to exactly one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(Method),
    #[error("{0}")]
    BadRequest(String),
    #[error("failed validation")]
    Validation(Violations),
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("{0}")]
    Conflict(String),
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("invalid or missing authentication token")]
    InvalidAuthenticationToken,
    #[error("you must be an authenticated user in order to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    InactiveAccount,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Single-field validation failure.
    pub fn field(field: &str, message: &str) -> Self {
        let mut violations = Violations::new();
        violations.insert(field.to_string(), message.to_string());
        AppError::Validation(violations)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::EditConflict | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::InvalidAuthenticationToken
            | AppError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            AppError::InactiveAccount | AppError::NotPermitted => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Validation(violations) => json!({ "error": violations }),
            AppError::Internal(err) => {
                // Emitted inside the request span, which carries method and uri.
                tracing::error!(error = ?err, "server error");
                json!({ "error": "the server encountered a problem and could not process your request" })
            }
            other => json!({ "error": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self, AppError::InvalidAuthenticationToken) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound,
            StoreError::UniqueViolation { constraint } if constraint == USERS_EMAIL_KEY => {
                AppError::Conflict("a user with this email address already exists".into())
            }
            other => AppError::Internal(other.into()),
        }
    }
}
