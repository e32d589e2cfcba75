//! Commit/rollback decision from a response's terminal state

use std::fmt;

use axum::http::StatusCode;

use super::error::FinishError;
use crate::constants::ROLLBACK_STATUS_FLOOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

impl Outcome {
    /// Rollback on any finish error or a status of 400 and up; commit otherwise.
    ///
    /// An error wins over a success status. A missing status with no error
    /// commits.
    pub fn decide(status: Option<StatusCode>, error: Option<&FinishError>) -> Self {
        if error.is_some() {
            return Outcome::Rollback;
        }
        match status {
            Some(status) if status.as_u16() >= ROLLBACK_STATUS_FLOOR => Outcome::Rollback,
            _ => Outcome::Commit,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Commit => f.write_str("commit"),
            Outcome::Rollback => f.write_str("rollback"),
        }
    }
}

/// Terminal state of one response, delivered once to the finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: Option<StatusCode>,
    pub error: Option<FinishError>,
}

impl Completion {
    pub fn finished(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    pub fn failed(status: Option<StatusCode>, error: FinishError) -> Self {
        Self {
            status,
            error: Some(error),
        }
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::decide(self.status, self.error.as_ref())
    }
}
