//! Notes domain - DB queries for notes
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for the
//! request's transaction).

use sqlx::{Executor, Postgres};

use crate::models::Note;

/// Create the notes table if it does not exist
pub async fn ensure_schema<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id BIGSERIAL PRIMARY KEY,
            body TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(executor)
    .await?;

    Ok(())
}

/// Insert a note and return the stored row
pub async fn insert_note<'e, E>(executor: E, body: &str) -> Result<Note, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        INSERT INTO notes (body)
        VALUES ($1)
        RETURNING id, body, created_at
        "#,
    )
    .bind(body)
    .fetch_one(executor)
    .await
}

/// List notes, newest first
pub async fn list_notes<'e, E>(executor: E) -> Result<Vec<Note>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, body, created_at
        FROM notes
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// Delete a note. Returns the number of rows removed.
pub async fn delete_note<'e, E>(executor: E, note_id: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM notes WHERE id = $1")
        .bind(note_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
