//! Database transaction contract
//!
//! The transaction layer only needs two capabilities from the database
//! client: begin a transaction, and finish it exactly once. Both are
//! implemented for sqlx pools, so any `sqlx::Pool<DB>` can be handed to
//! [`TrxLayer`](super::middleware::TrxLayer) directly.
//!
//! # Usage Pattern
//!
//! Domain functions keep using sqlx's generic Executor trait. Inside a
//! request, pass them the connection behind the active transaction:
//!
//! ```ignore
//! let mut trx = active_transaction::<sqlx::Transaction<'static, Postgres>>().await?;
//! domain::do_something(&mut **trx, ...).await?;
//! domain::do_another_thing(&mut **trx, ...).await?;
//! ```
//!
//! The layer commits or rolls back when the response finishes, so handlers
//! never call `commit()` themselves.

use std::future::Future;

/// An open transaction. Consuming `self` makes each call possible at most once.
pub trait TransactionHandle: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn commit(self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A database client able to begin transactions.
pub trait TransactionSource: Clone + Send + Sync + 'static {
    type Transaction: TransactionHandle;

    fn begin(
        &self,
    ) -> impl Future<
        Output = Result<Self::Transaction, <Self::Transaction as TransactionHandle>::Error>,
    > + Send;

    /// Checked once when the layer is built. Return the reason the client
    /// cannot serve transactions, if any.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

impl<DB> TransactionHandle for sqlx::Transaction<'static, DB>
where
    DB: sqlx::Database,
{
    type Error = sqlx::Error;

    async fn commit(self) -> Result<(), sqlx::Error> {
        sqlx::Transaction::commit(self).await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        sqlx::Transaction::rollback(self).await
    }
}

impl<DB> TransactionSource for sqlx::Pool<DB>
where
    DB: sqlx::Database,
{
    type Transaction = sqlx::Transaction<'static, DB>;

    async fn begin(&self) -> Result<Self::Transaction, sqlx::Error> {
        sqlx::Pool::begin(self).await
    }

    fn check(&self) -> Result<(), String> {
        if self.is_closed() {
            return Err("pool is closed".to_string());
        }
        Ok(())
    }
}
