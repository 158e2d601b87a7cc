//! Query functions for the append-only `checkpoints` table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::Checkpoint;

/// Fields for a new checkpoint row. Item lists arrive already JSON-encoded;
/// the store keeps them as opaque TEXT.
#[derive(Debug, Clone)]
pub struct NewCheckpoint<'a> {
    pub role: &'a str,
    pub summary: &'a str,
    pub completed_items: &'a str,
    pub pending_items: &'a str,
    pub active_files: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub estimated_context_usage: Option<i64>,
}

/// Insert a checkpoint row. Returns the row with its assigned id.
pub async fn insert_checkpoint(
    pool: &SqlitePool,
    new: &NewCheckpoint<'_>,
) -> Result<Checkpoint> {
    let checkpoint = sqlx::query_as::<_, Checkpoint>(
        "INSERT INTO checkpoints \
         (role, created_at, summary, completed_items, pending_items, active_files, notes, estimated_context_usage) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         RETURNING *",
    )
    .bind(new.role)
    .bind(Utc::now())
    .bind(new.summary)
    .bind(new.completed_items)
    .bind(new.pending_items)
    .bind(new.active_files)
    .bind(new.notes)
    .bind(new.estimated_context_usage)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert checkpoint for {:?}", new.role))?;

    Ok(checkpoint)
}

/// Fetch the newest checkpoint for a role, if any.
pub async fn get_latest_for_role(pool: &SqlitePool, role: &str) -> Result<Option<Checkpoint>> {
    let checkpoint = sqlx::query_as::<_, Checkpoint>(
        "SELECT * FROM checkpoints \
         WHERE role = ?1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT 1",
    )
    .bind(role)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch latest checkpoint for {role:?}"))?;

    Ok(checkpoint)
}

/// List checkpoints for a role, newest first, optionally limited.
pub async fn list_for_role(
    pool: &SqlitePool,
    role: &str,
    limit: Option<i64>,
) -> Result<Vec<Checkpoint>> {
    let checkpoints = sqlx::query_as::<_, Checkpoint>(
        "SELECT * FROM checkpoints \
         WHERE role = ?1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT ?2",
    )
    .bind(role)
    .bind(limit.unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list checkpoints for {role:?}"))?;

    Ok(checkpoints)
}
