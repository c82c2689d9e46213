//! Identity resolution and authorization gates.
//!
//! `authenticate` runs on every route and always leaves an [`Identity`] in the
//! request extensions. The gates read it back; each one first applies the
//! gates before it, so a single layer expresses a full chain.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::identity::Identity;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::{Store, TokenScope, User};
use crate::validation::is_well_formed_token;

/// Extracts the bearer token. `Ok(None)` when no Authorization header is sent.
fn bearer_token(headers: &HeaderMap) -> AppResult<Option<&str>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::InvalidAuthenticationToken)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(Some(token)),
        _ => Err(AppError::InvalidAuthenticationToken),
    }
}

pub async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> AppResult<Identity> {
    let Some(token) = bearer_token(headers)? else {
        return Ok(Identity::Anonymous);
    };
    if !is_well_formed_token(token) {
        return Err(AppError::InvalidAuthenticationToken);
    }

    match state.tokens.resolve(token, TokenScope::Authentication).await {
        Ok(user) => Ok(Identity::User(user)),
        Err(AppError::NotFound) => Err(AppError::InvalidAuthenticationToken),
        Err(e) => Err(e),
    }
}

/// Attaches the caller's identity. Every response, including rejections,
/// varies by Authorization.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let resolved = match request.extensions().get::<Identity>() {
        Some(identity) => Ok(identity.clone()),
        None => resolve_identity(&state, request.headers()).await,
    };

    let mut response = match resolved {
        Ok(identity) => {
            debug!(anonymous = identity.is_anonymous(), "identity resolved");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            warn!(error = %err, "authentication rejected");
            err.into_response()
        }
    };
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

pub fn authenticated_user(identity: &Identity) -> AppResult<&User> {
    identity.user().ok_or(AppError::AuthenticationRequired)
}

pub fn activated_user(identity: &Identity) -> AppResult<&User> {
    let user = authenticated_user(identity)?;
    if !user.activated {
        return Err(AppError::InactiveAccount);
    }
    Ok(user)
}

pub async fn permitted_user<'a>(
    store: &dyn Store,
    identity: &'a Identity,
    code: &str,
) -> AppResult<&'a User> {
    let user = activated_user(identity)?;
    let permissions = store.get_permissions_for_user(user.id).await?;
    if !permissions.includes(code) {
        return Err(AppError::NotPermitted);
    }
    Ok(user)
}

fn identity_of(request: &Request) -> AppResult<&Identity> {
    request.extensions().get::<Identity>().ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "identity missing from request; authenticate middleware not installed"
        ))
    })
}

pub async fn require_authenticated(request: Request, next: Next) -> Response {
    match identity_of(&request).and_then(authenticated_user) {
        Ok(_) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

pub async fn require_activated(request: Request, next: Next) -> Response {
    match identity_of(&request).and_then(activated_user) {
        Ok(_) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

/// State for [`require_permission`]: the app plus the code the route needs.
#[derive(Clone)]
pub struct PermissionGate {
    pub state: AppState,
    pub code: &'static str,
}

impl PermissionGate {
    pub fn new(state: &AppState, code: &'static str) -> Self {
        Self {
            state: state.clone(),
            code,
        }
    }
}

pub async fn require_permission(
    State(gate): State<PermissionGate>,
    request: Request,
    next: Next,
) -> Response {
    let checked = match identity_of(&request) {
        Ok(identity) => permitted_user(gate.state.store.as_ref(), identity, gate.code)
            .await
            .map(|_| ()),
        Err(err) => Err(err),
    };
    match checked {
        Ok(()) => next.run(request).await,
        Err(err) => {
            debug!(code = gate.code, error = %err, "permission gate rejected");
            err.into_response()
        }
    }
}
