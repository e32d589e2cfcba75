//! Error types for the transaction layer, plus handler helpers

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::outcome::Outcome;

/// The database client handed to [`TrxLayer`](super::middleware::TrxLayer)
/// cannot begin transactions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("database client must be able to begin transactions. Got {type_name}: {reason}")]
    Unusable {
        type_name: &'static str,
        reason: String,
    },
}

/// Misuse of the task-local context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("no context scope is active on this task")]
    NoActiveScope,

    #[error("context key {key:?} does not hold a {expected}")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
    },
}

/// Why a response finished without completing cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinishError {
    #[error("response body failed: {0}")]
    Transport(String),

    #[error("response dropped before it finished")]
    Aborted,

    #[error("response did not finish within {0:?}")]
    Abandoned(Duration),
}

/// Errors surfaced to request handlers.
#[derive(Debug, Error)]
pub enum TrxError {
    /// Called outside any request handled by the transaction layer
    #[error("no transaction scope is active; is the handler behind TrxLayer?")]
    NoActiveScope,

    #[error("no transaction is bound in the active scope")]
    NotBound,

    #[error("the bound transaction is not a {expected}")]
    HandleType { expected: &'static str },

    /// The transaction was already committed or rolled back
    #[error("transaction already finalized ({0})")]
    Finalized(Outcome),

    #[error("invalid resource name {0:?}")]
    InvalidResource(String),

    #[error("failed to begin transaction: {0}")]
    Begin(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ContextError> for TrxError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::NoActiveScope => TrxError::NoActiveScope,
            ContextError::TypeMismatch { expected, .. } => TrxError::HandleType { expected },
        }
    }
}

impl IntoResponse for TrxError {
    fn into_response(self) -> Response {
        log::error!("{}", self);
        let body = match self {
            TrxError::Begin(_) => "failed to begin transaction",
            TrxError::Database(_) => "database error",
            _ => "transaction unavailable",
        };
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Extension trait for logging errors and converting to StatusCode
pub trait LogErr<T> {
    /// Log error with context and return INTERNAL_SERVER_ERROR
    fn log_500(self, context: &str) -> Result<T, StatusCode>;

    /// Log error with context and return a custom StatusCode
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode> {
        self.log_status(context, StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.map_err(|e| {
            log::error!("{}: {}", context, e);
            status
        })
    }
}
