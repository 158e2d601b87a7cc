//! Query functions for the append-only `messages` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{Message, MessageType};

/// The broadcast sentinel: a message addressed to `all` matches every role
/// filter.
pub const BROADCAST_ROLE: &str = "all";

/// Fields for a new message row.
#[derive(Debug, Clone)]
pub struct NewMessageRow<'a> {
    pub id: &'a str,
    pub from_role: &'a str,
    pub to_role: &'a str,
    pub msg_type: MessageType,
    pub content: &'a str,
    pub artifacts: Option<&'a serde_json::Value>,
    pub metadata: Option<&'a serde_json::Value>,
}

/// Insert a message row, deduplicating on id.
///
/// Returns the inserted row, or `None` when a row with the same id already
/// exists (at-least-once delivery: the duplicate is absorbed silently).
pub async fn insert_message(
    pool: &SqlitePool,
    new: &NewMessageRow<'_>,
) -> Result<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages \
         (id, from_role, to_role, msg_type, created_at, content, artifacts, metadata) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT (id) DO NOTHING \
         RETURNING *",
    )
    .bind(new.id)
    .bind(new.from_role)
    .bind(new.to_role)
    .bind(new.msg_type)
    .bind(Utc::now())
    .bind(new.content)
    .bind(new.artifacts)
    .bind(new.metadata)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to insert message {:?}", new.id))?;

    Ok(message)
}

/// Fetch a message by id.
pub async fn get_message(pool: &SqlitePool, id: &str) -> Result<Option<Message>> {
    let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch message {id:?}"))?;

    Ok(message)
}

/// Messages visible to a role: addressed to it, broadcast, or sent by it.
///
/// `since` is exclusive. Results are in persistence order.
pub async fn get_for_role(
    pool: &SqlitePool,
    role: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages \
         WHERE (to_role = ?1 OR to_role = ?2 OR from_role = ?1) \
           AND (?3 IS NULL OR created_at > ?3) \
         ORDER BY created_at ASC, rowid ASC",
    )
    .bind(role)
    .bind(BROADCAST_ROLE)
    .bind(since)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to fetch messages for {role:?}"))?;

    Ok(messages)
}

/// All messages in persistence order, optionally capped to the most recent
/// `limit` (the cap keeps the order: oldest of the kept window first).
pub async fn get_all(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<Message>> {
    let mut messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages \
         ORDER BY created_at DESC, rowid DESC \
         LIMIT ?1",
    )
    .bind(limit.unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await
    .context("failed to fetch messages")?;

    messages.reverse();
    Ok(messages)
}
