//! Notes endpoints (/notes)
//!
//! Handlers never begin or commit: the transaction layer wraps each request,
//! and a 4xx/5xx response rolls back everything the handler wrote.

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::Postgres;
use std::sync::Arc;

use request_trx::{LogErr, Trx, TrxError, active_transaction, active_transaction_for};

use crate::AppState;
use crate::domain::notes;
use crate::models::Note;

type PgTx = sqlx::Transaction<'static, Postgres>;

const MAX_NOTE_CHARS: usize = 10_000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notes", get(list_notes).post(create_note))
        .route("/notes/batch", post(create_batch))
        .route("/notes/count", get(count_notes))
        .route("/notes/{id}", axum::routing::delete(delete_note))
}

#[derive(Debug, Deserialize)]
struct NewNote {
    body: String,
}

#[derive(Debug, Deserialize)]
struct NewNotes {
    bodies: Vec<String>,
}

#[derive(Serialize)]
struct BatchResponse {
    created: Vec<Note>,
}

#[derive(Serialize)]
struct CountResponse {
    count: i64,
}

/// Trimmed note text, or None if empty or too long
fn validate_body(body: &str) -> Option<&str> {
    let body = body.trim();
    if body.is_empty() || body.chars().count() > MAX_NOTE_CHARS {
        return None;
    }
    Some(body)
}

/// GET /notes - List all notes
async fn list_notes() -> Result<Json<Vec<Note>>, StatusCode> {
    let mut trx = active_transaction::<PgTx>()
        .await
        .log_500("Active transaction error")?;

    let notes = notes::list_notes(&mut **trx)
        .await
        .log_500("List notes error")?;

    Ok(Json(notes))
}

/// POST /notes - Create one note
async fn create_note(
    Json(req): Json<NewNote>,
) -> Result<(StatusCode, Json<Note>), StatusCode> {
    let body = validate_body(&req.body).ok_or(StatusCode::BAD_REQUEST)?;

    let mut trx = active_transaction::<PgTx>()
        .await
        .log_500("Active transaction error")?;

    let note = notes::insert_note(&mut **trx, body)
        .await
        .log_500("Insert note error")?;

    Ok((StatusCode::CREATED, Json(note)))
}

/// POST /notes/batch - Create several notes, all or nothing
async fn create_batch(
    Json(req): Json<NewNotes>,
) -> Result<(StatusCode, Json<BatchResponse>), StatusCode> {
    let mut trx = active_transaction::<PgTx>()
        .await
        .log_500("Active transaction error")?;

    let mut created = Vec::with_capacity(req.bodies.len());
    for body in &req.bodies {
        // Rows inserted so far are rolled back with the 422.
        let body = validate_body(body).ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
        let note = notes::insert_note(&mut **trx, body)
            .await
            .log_500("Insert note error")?;
        created.push(note);
    }

    Ok((StatusCode::CREATED, Json(BatchResponse { created })))
}

/// GET /notes/count - Count notes through the table-scoped accessor
async fn count_notes() -> Result<Json<CountResponse>, TrxError> {
    let mut notes = active_transaction_for::<PgTx>("notes").await?;

    let count: i64 = notes
        .query("SELECT COUNT(*) FROM")
        .build_query_scalar()
        .fetch_one(&mut **notes)
        .await?;

    Ok(Json(CountResponse { count }))
}

/// DELETE /notes/:id - Delete a note
async fn delete_note(
    mut trx: Trx<PgTx>,
    Path(note_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let deleted = notes::delete_note(&mut **trx, note_id)
        .await
        .log_500("Delete note error")?;

    if deleted == 0 {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(StatusCode::NO_CONTENT)
}
