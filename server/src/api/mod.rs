//! API Router and Application State

mod channels;
mod users;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::signal;
use crate::signal::registry::PendingCalls;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: sqlx::SqlitePool,
    /// Server configuration
    pub config: Arc<Config>,
    /// In-memory pending-call registry
    pub calls: Arc<PendingCalls>,
}

impl AppState {
    #[must_use]
    pub fn new(db: sqlx::SqlitePool, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
            calls: Arc::new(PendingCalls::new()),
        }
    }
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/register", post(users::register))
        .route("/status", get(users::status))
        .route("/friend", post(users::add_friend))
        .route("/channel", post(channels::create_channel))
        .route("/invite", post(channels::invite))
        .route("/call", get(signal::call_handler))
        .route("/answer/{name}", get(signal::answer_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
        "pending_calls": state.calls.len(),
    }))
}
