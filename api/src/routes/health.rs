//! Liveness endpoint (/health), outside the transaction layer

use axum::{Router, extract::State, http::StatusCode, routing::get};
use std::sync::Arc;

use request_trx::LogErr;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// GET /health - Round-trip to the database pool
async fn health(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .log_status("Health check error", StatusCode::SERVICE_UNAVAILABLE)?;

    Ok("ok")
}
