mod config;
mod domain;
mod logging;
mod models;
mod routes;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use request_trx::{TrxConfig, TrxLayer};

use config::ServerConfig;

#[derive(Clone)]
struct AppState {
    db: PgPool,
}

fn trx_config(config: &ServerConfig) -> TrxConfig {
    let mut trx = TrxConfig::new();
    if config.log_transactions {
        trx = trx.logger(|line| log::info!("{}", line));
    }
    if let Some(limit) = config.abandon_after {
        trx = trx.abandon_after(limit);
    }
    trx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let config = ServerConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    domain::notes::ensure_schema(&pool)
        .await
        .context("Failed to create schema")?;

    let trx = TrxLayer::with_config(pool.clone(), trx_config(&config))?;
    let state = Arc::new(AppState { db: pool });

    let app = routes::build_routes(trx)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    log::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
