pub mod health;
pub mod notes;

use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;

use request_trx::TrxLayer;

use crate::AppState;

/// Build all routes for the API. Only the notes routes run in a transaction.
pub fn build_routes(trx: TrxLayer<PgPool>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(notes::routes().layer(trx))
        .merge(health::routes())
}
