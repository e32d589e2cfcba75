//! Reaching the request's transaction from handler code.
//!
//! [`active_transaction`] reads the transaction bound by
//! [`TrxLayer`](super::middleware::TrxLayer) from the task-local scope;
//! [`Trx`] is the same thing as an axum extractor, read from request
//! extensions. Both hand out an [`Active`] guard. The layer's finalizer waits
//! for outstanding guards to be dropped before it commits or rolls back.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};

use super::db::TransactionHandle;
use super::error::TrxError;
use super::outcome::Outcome;
use crate::constants::TRX_KEY;
use crate::context;

pub(crate) enum SlotState<T> {
    Open(T),
    Finalizing(Outcome),
    Closed(Outcome),
}

impl<T> SlotState<T> {
    fn outcome(&self) -> Option<Outcome> {
        match self {
            SlotState::Open(_) => None,
            SlotState::Finalizing(outcome) | SlotState::Closed(outcome) => Some(*outcome),
        }
    }
}

/// Shared home of one request's transaction: `Open -> Finalizing -> Closed`.
pub(crate) struct Slot<T> {
    state: Arc<Mutex<SlotState<T>>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: TransactionHandle> Slot<T> {
    pub(crate) fn new(trx: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState::Open(trx))),
        }
    }

    pub(crate) async fn acquire(&self) -> Result<Active<T>, TrxError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        OwnedMutexGuard::try_map(guard, |state| match state {
            SlotState::Open(trx) => Some(trx),
            _ => None,
        })
        .map(|guard| Active { guard })
        .map_err(|guard| match guard.outcome() {
            Some(outcome) => TrxError::Finalized(outcome),
            None => TrxError::NotBound,
        })
    }

    /// Move `Open` to `Finalizing`, handing back the transaction.
    ///
    /// Returns `None` if the slot was already finalized.
    pub(crate) async fn begin_finalize(&self, outcome: Outcome) -> Option<T> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, SlotState::Finalizing(outcome)) {
            SlotState::Open(trx) => Some(trx),
            other => {
                *state = other;
                None
            }
        }
    }

    pub(crate) async fn close(&self, outcome: Outcome) {
        *self.state.lock().await = SlotState::Closed(outcome);
    }

    #[cfg(test)]
    pub(crate) async fn outcome(&self) -> Option<Outcome> {
        self.state.lock().await.outcome()
    }

    #[cfg(test)]
    pub(crate) async fn is_closed(&self) -> bool {
        matches!(*self.state.lock().await, SlotState::Closed(_))
    }
}

/// Exclusive access to the request's open transaction.
pub struct Active<T> {
    guard: OwnedMappedMutexGuard<SlotState<T>, T>,
}

impl<T> Deref for Active<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for Active<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// The active transaction qualified by a resource (table) name.
pub struct Scoped<T> {
    active: Active<T>,
    resource: String,
}

impl<T> Scoped<T> {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The resource as a quoted SQL identifier, e.g. `"app"."notes"`.
    pub fn quoted(&self) -> String {
        self.resource
            .split('.')
            .map(|part| format!("\"{}\"", part))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn into_inner(self) -> Active<T> {
        self.active
    }
}

impl<DB> Scoped<sqlx::Transaction<'static, DB>>
where
    DB: sqlx::Database,
    <DB as sqlx::Database>::Arguments<'static>: Default,
{
    /// Start a query against the resource: `query("SELECT * FROM")` builds
    /// `SELECT * FROM "notes"`.
    pub fn query(&self, head: &str) -> sqlx::QueryBuilder<'static, DB> {
        sqlx::QueryBuilder::new(format!("{} {}", head, self.quoted()))
    }
}

impl<T> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.active
    }
}

impl<T> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.active
    }
}

/// The transaction bound to the current request.
///
/// Fails with [`TrxError::NoActiveScope`] outside a request handled by the
/// layer, and with [`TrxError::Finalized`] once it has committed or rolled
/// back. Hold one guard at a time; a second call on the same task waits for
/// the first guard to drop.
pub async fn active_transaction<T>() -> Result<Active<T>, TrxError>
where
    T: TransactionHandle,
{
    let slot = context::get::<Slot<T>>(TRX_KEY)?.ok_or(TrxError::NotBound)?;
    slot.acquire().await
}

/// Like [`active_transaction`], scoped to a named resource.
pub async fn active_transaction_for<T>(resource: &str) -> Result<Scoped<T>, TrxError>
where
    T: TransactionHandle,
{
    validate_resource(resource)?;
    let active = active_transaction::<T>().await?;
    Ok(Scoped {
        active,
        resource: resource.to_string(),
    })
}

fn validate_resource(resource: &str) -> Result<(), TrxError> {
    let valid = !resource.is_empty()
        && resource.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(TrxError::InvalidResource(resource.to_string()));
    }
    Ok(())
}

/// Extractor for the request's transaction, read from request extensions
pub struct Trx<T>(pub Active<T>);

impl<T> Deref for Trx<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Trx<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<S, T> FromRequestParts<S> for Trx<T>
where
    S: Send + Sync,
    T: TransactionHandle,
{
    type Rejection = TrxError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let slot = parts
            .extensions
            .get::<Slot<T>>()
            .cloned()
            .ok_or(TrxError::NotBound)?;
        slot.acquire().await.map(Trx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Scope;
    use crate::services::testing::{MockSource, MockTrx};

    async fn bound_scope() -> (Scope, Slot<MockTrx>) {
        let source = MockSource::new();
        let slot = Slot::new(source.begin_now());
        let scope = Scope::new();
        scope.set(TRX_KEY, slot.clone());
        (scope, slot)
    }

    #[tokio::test]
    async fn outside_scope_is_distinct_from_finalized() {
        let err = active_transaction::<MockTrx>().await.err().unwrap();
        assert!(matches!(err, TrxError::NoActiveScope));

        let (scope, slot) = bound_scope().await;
        let trx = slot.begin_finalize(Outcome::Rollback).await.unwrap();
        trx.rollback().await.unwrap();
        slot.close(Outcome::Rollback).await;

        let err = scope
            .run(async { active_transaction::<MockTrx>().await.err().unwrap() })
            .await;
        assert!(matches!(err, TrxError::Finalized(Outcome::Rollback)));
    }

    #[tokio::test]
    async fn scope_without_binding_reports_not_bound() {
        let err = context::run_scoped(async { active_transaction::<MockTrx>().await.err().unwrap() })
            .await;
        assert!(matches!(err, TrxError::NotBound));
    }

    #[tokio::test]
    async fn wrong_handle_type_is_reported() {
        let (scope, _slot) = bound_scope().await;
        let err = scope
            .run(async {
                active_transaction::<sqlx::Transaction<'static, sqlx::Sqlite>>()
                    .await
                    .err()
                    .unwrap()
            })
            .await;
        assert!(matches!(err, TrxError::HandleType { .. }));
    }

    #[tokio::test]
    async fn same_handle_after_suspension() {
        let (scope, _slot) = bound_scope().await;
        let (first, second) = scope
            .run(async {
                let first = active_transaction::<MockTrx>().await.unwrap().id();
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                let second = context::spawn(async {
                    active_transaction::<MockTrx>().await.unwrap().id()
                })
                .await
                .unwrap();
                (first, second)
            })
            .await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn finalize_happens_once() {
        let (_scope, slot) = bound_scope().await;
        assert!(slot.begin_finalize(Outcome::Commit).await.is_some());
        assert!(slot.begin_finalize(Outcome::Rollback).await.is_none());
        assert_eq!(slot.outcome().await, Some(Outcome::Commit));
    }

    #[tokio::test]
    async fn scoped_handle_quotes_resource() {
        let (scope, _slot) = bound_scope().await;
        scope
            .run(async {
                let scoped = active_transaction_for::<MockTrx>("app.notes").await.unwrap();
                assert_eq!(scoped.resource(), "app.notes");
                assert_eq!(scoped.quoted(), "\"app\".\"notes\"");

                let err = active_transaction_for::<MockTrx>("notes; DROP").await.err().unwrap();
                assert!(matches!(err, TrxError::InvalidResource(_)));
            })
            .await;
    }
}
