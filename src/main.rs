mod accounts;
mod app;
mod auth;
mod background;
mod config;
mod error;
mod mailer;
mod state;
mod store;
mod validation;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "greenlight=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (state, db) = AppState::init().await?;

    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("database migrations applied");

    let config = state.config.clone();
    let background = state.background.clone();
    let app = app::build_app(state);
    app::serve(app, &config, background).await?;

    db.close().await;
    Ok(())
}
