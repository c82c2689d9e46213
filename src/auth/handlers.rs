use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        ActivateRequest, AuthTokenResponse, EmailRequest, LoginRequest, RegisterRequest,
        ResetPasswordRequest,
    },
    identity::Identity,
    middleware::{activated_user, authenticated_user},
};
use crate::{
    error::{AppError, AppResult},
    mailer::Template,
    state::AppState,
    store::{NewUser, StoreError, TokenScope, User},
    validation::{
        normalize_email, validate_email, validate_name, validate_password, validate_token,
        Validator,
    },
};

type Created = (StatusCode, Json<Value>);

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// Hands the mail to the background runner; the request never waits on it.
fn send_detached(
    state: &AppState,
    task: &'static str,
    recipient: String,
    template: Template,
    data: Value,
) {
    let mailer = state.mailer.clone();
    state
        .background
        .spawn(task, async move { mailer.send(&recipient, template, data).await });
}

/// Resolves a single-use token, reporting a dead one as a field violation.
async fn redeem(state: &AppState, token: &str, scope: TokenScope, message: &str) -> AppResult<User> {
    match state.tokens.resolve(token, scope).await {
        Ok(user) => Ok(user),
        Err(AppError::NotFound) => {
            warn!(%scope, "token rejected");
            Err(AppError::field("token", message))
        }
        Err(e) => Err(e),
    }
}

async fn user_for_email(state: &AppState, email: &str) -> AppResult<User> {
    match state.store.get_user_by_email(email).await {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound) => Err(AppError::field("email", "no matching email address found")),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(state, payload))]
pub async fn register_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<Created> {
    let RegisterRequest {
        name,
        email,
        password,
    } = body(payload)?;
    let email = normalize_email(&email);

    let mut v = Validator::new();
    validate_name(&mut v, &name);
    validate_email(&mut v, &email);
    validate_password(&mut v, &password);
    v.finish()?;

    let password_hash = state.hasher.hash_blocking(password).await?;
    let user = state
        .accounts
        .register_user(
            NewUser {
                name,
                email,
                password_hash,
            },
            &state.config.default_permissions,
        )
        .await?;

    let (token, _) = state
        .tokens
        .generate(
            user.id,
            state.config.tokens.activation_ttl(),
            TokenScope::Activation,
        )
        .await?;
    send_detached(
        &state,
        "welcome_mail",
        user.email.clone(),
        Template::UserWelcome,
        json!({ "token": token, "user_id": user.id }),
    );

    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

#[instrument(skip(state, payload))]
pub async fn activate_user(
    State(state): State<AppState>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let ActivateRequest { token } = body(payload)?;
    let mut v = Validator::new();
    validate_token(&mut v, &token);
    v.finish()?;

    let owner = redeem(
        &state,
        &token,
        TokenScope::Activation,
        "invalid or expired activation token",
    )
    .await?;
    let user = state.accounts.activate_user(owner.id, owner.version).await?;

    Ok(Json(json!({ "user": user })))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let ResetPasswordRequest { password, token } = body(payload)?;
    let mut v = Validator::new();
    validate_password(&mut v, &password);
    validate_token(&mut v, &token);
    v.finish()?;

    let owner = redeem(
        &state,
        &token,
        TokenScope::PasswordReset,
        "invalid or expired password reset token",
    )
    .await?;
    let password_hash = state.hasher.hash_blocking(password).await?;
    state
        .accounts
        .reset_password(owner.id, &password_hash, owner.version)
        .await?;

    Ok(Json(json!({ "message": "your password was successfully reset" })))
}

pub async fn current_user(identity: Identity) -> AppResult<Json<Value>> {
    let user = activated_user(&identity)?;
    Ok(Json(json!({ "user": user })))
}

#[instrument(skip(state, id))]
pub async fn show_user(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<Value>> {
    let Path(id) = id.map_err(|_| AppError::NotFound)?;
    let user = state.store.get_user_by_id(id).await?;
    Ok(Json(json!({ "user": user })))
}

#[instrument(skip(state, payload))]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Created> {
    let LoginRequest { email, password } = body(payload)?;
    let email = normalize_email(&email);

    let mut v = Validator::new();
    validate_email(&mut v, &email);
    validate_password(&mut v, &password);
    v.finish()?;

    let (token, record) = state.credentials.authenticate(&email, &password).await?;
    let issued = AuthTokenResponse {
        token,
        expiry: record.expires_at,
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "authentication_token": issued })),
    ))
}

/// Logs the caller out everywhere.
#[instrument(skip_all)]
pub async fn revoke_authentication_tokens(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<Json<Value>> {
    let user = authenticated_user(&identity)?;
    state
        .tokens
        .revoke_all(user.id, TokenScope::Authentication)
        .await?;
    info!(user_id = %user.id, "authentication tokens revoked");
    Ok(Json(json!({ "message": "authentication tokens revoked" })))
}

#[instrument(skip(state, payload))]
pub async fn create_activation_token(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> AppResult<Created> {
    let email = normalize_email(&body(payload)?.email);
    let mut v = Validator::new();
    validate_email(&mut v, &email);
    v.finish()?;

    let user = user_for_email(&state, &email).await?;
    if user.activated {
        return Err(AppError::field("email", "user has already been activated"));
    }

    let (token, _) = state
        .tokens
        .generate(
            user.id,
            state.config.tokens.activation_ttl(),
            TokenScope::Activation,
        )
        .await?;
    send_detached(
        &state,
        "activation_mail",
        user.email,
        Template::TokenActivation,
        json!({ "token": token, "user_id": user.id }),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "an email will be sent to you containing activation instructions" })),
    ))
}

#[instrument(skip(state, payload))]
pub async fn create_password_reset_token(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> AppResult<Created> {
    let email = normalize_email(&body(payload)?.email);
    let mut v = Validator::new();
    validate_email(&mut v, &email);
    v.finish()?;

    let user = user_for_email(&state, &email).await?;
    if !user.activated {
        return Err(AppError::field("email", "user account must be activated"));
    }

    let (token, _) = state
        .tokens
        .generate(
            user.id,
            state.config.tokens.password_reset_ttl(),
            TokenScope::PasswordReset,
        )
        .await?;
    send_detached(
        &state,
        "password_reset_mail",
        user.email,
        Template::PasswordReset,
        json!({ "token": token, "user_id": user.id }),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "an email will be sent to you containing password reset instructions" })),
    ))
}
