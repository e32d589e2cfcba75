//! Shared data models used across modules

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A note record from the database
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Note {
    pub id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}
