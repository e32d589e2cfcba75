//! Task-local context scopes.
//!
//! A [`Scope`] is a small keyed map that lives in tokio task-local storage for
//! the duration of a future. Anything polled inside that future (including
//! code running after an `.await`) can read the values back through [`get`]
//! without them being threaded through function signatures.
//!
//! Tokio task-locals do not follow `tokio::spawn`. Use [`spawn`] to start a
//! sub-task that inherits the caller's scope.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::task_local;

use crate::services::error::ContextError;

type Value = Arc<dyn Any + Send + Sync>;

task_local! {
    static CURRENT: Scope;
}

/// Handle to one logical task's bindings. Clones share the same map.
#[derive(Clone, Default)]
pub struct Scope {
    values: Arc<Mutex<HashMap<&'static str, Value>>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `key`, replacing any previous binding.
    pub fn set<T>(&self, key: &'static str, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(value));
    }

    /// Read the value bound under `key`.
    ///
    /// `Ok(None)` means the key was never set in this scope.
    pub fn get<T>(&self, key: &'static str) -> Result<Option<Arc<T>>, ContextError>
    where
        T: Any + Send + Sync,
    {
        let value = self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();

        match value {
            None => Ok(None),
            Some(value) => value
                .downcast::<T>()
                .map(Some)
                .map_err(|_| ContextError::TypeMismatch {
                    key,
                    expected: std::any::type_name::<T>(),
                }),
        }
    }

    /// Poll `future` with this scope active.
    pub async fn run<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, future).await
    }

    /// Run `f` synchronously with this scope active.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self.clone(), f)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Scope")
            .field("keys", &values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Run `future` inside a fresh, empty scope.
pub async fn run_scoped<F>(future: F) -> F::Output
where
    F: Future,
{
    Scope::new().run(future).await
}

/// The scope active on the current task.
pub fn current() -> Result<Scope, ContextError> {
    CURRENT
        .try_with(Scope::clone)
        .map_err(|_| ContextError::NoActiveScope)
}

/// Bind `value` under `key` in the active scope.
///
/// Fails with [`ContextError::NoActiveScope`] when called outside a scope;
/// the value is not stored anywhere in that case.
pub fn set<T>(key: &'static str, value: T) -> Result<(), ContextError>
where
    T: Any + Send + Sync,
{
    current()?.set(key, value);
    Ok(())
}

/// Read the value bound under `key` in the active scope.
pub fn get<T>(key: &'static str) -> Result<Option<Arc<T>>, ContextError>
where
    T: Any + Send + Sync,
{
    current()?.get(key)
}

/// Spawn a task that inherits the caller's scope, if there is one.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Ok(scope) => tokio::spawn(scope.run(future)),
        Err(_) => tokio::spawn(future),
    }
}
