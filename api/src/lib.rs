//! Request-scoped database transactions for axum/tower services.
//!
//! [`TrxLayer`] begins a transaction for every request, binds it into a
//! task-local [`context`] scope for the duration of the request, and commits or
//! rolls it back once the response body has finished:
//!
//! - status `< 400` and a clean finish commits
//! - status `>= 400`, a body error, or a dropped response rolls back
//!
//! Handlers reach the transaction without it being passed to them:
//!
//! ```ignore
//! use request_trx::{TrxLayer, active_transaction};
//!
//! type PgTx = sqlx::Transaction<'static, sqlx::Postgres>;
//!
//! async fn create(body: String) -> Result<StatusCode, TrxError> {
//!     let mut trx = active_transaction::<PgTx>().await?;
//!     sqlx::query("INSERT INTO notes (body) VALUES ($1)")
//!         .bind(body)
//!         .execute(&mut **trx)
//!         .await?;
//!     Ok(StatusCode::CREATED)
//! }
//!
//! let app = Router::new()
//!     .route("/notes", post(create))
//!     .layer(TrxLayer::new(pool)?);
//! ```
//!
//! The commit is issued after the response has been handed to the transport,
//! so a client may observe a `200` before the commit lands. Callers that need
//! read-your-writes across requests must not rely on this layer alone.

pub mod constants;
pub mod context;
pub mod services;

pub use services::accessor::{Active, Scoped, Trx, active_transaction, active_transaction_for};
pub use services::db::{TransactionHandle, TransactionSource};
pub use services::error::{ConfigError, ContextError, FinishError, LogErr, TrxError};
pub use services::middleware::{RequestSignature, TrxConfig, TrxLayer, TrxService};
pub use services::outcome::{Completion, Outcome};
