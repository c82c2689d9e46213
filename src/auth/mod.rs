use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};

use crate::state::AppState;
use middleware::{require_activated, require_authenticated, require_permission, PermissionGate};

pub mod credentials;
mod dto;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod password;
pub mod tokens;

/// User and token routes. Gates are attached per route; the `authenticate`
/// layer that feeds them is installed once by the app.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/users", post(handlers::register_user))
        .route("/users/activated", put(handlers::activate_user))
        .route("/users/password", put(handlers::reset_password))
        .route(
            "/users/me",
            get(handlers::current_user).route_layer(from_fn(require_activated)),
        )
        .route(
            "/users/:id",
            get(handlers::show_user).route_layer(from_fn_with_state(
                PermissionGate::new(state, "users:read"),
                require_permission,
            )),
        )
        .route(
            "/tokens/authentication",
            post(handlers::create_authentication_token).merge(
                delete(handlers::revoke_authentication_tokens)
                    .route_layer(from_fn(require_authenticated)),
            ),
        )
        .route("/tokens/activation", post(handlers::create_activation_token))
        .route(
            "/tokens/password-reset",
            post(handlers::create_password_reset_token),
        )
}
