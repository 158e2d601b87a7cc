//! Query functions for the `agents` table.
//!
//! The `role` primary key is declared `COLLATE NOCASE`, so equality in
//! `WHERE role = ?` is case-insensitive at the store level; callers still
//! normalize roles at the edges for in-memory comparisons.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;

use crate::models::Agent;

/// Fields needed to create an agent row. Everything else starts at the
/// schema defaults (`pending`, retry 0, no timestamps).
#[derive(Debug, Clone)]
pub struct NewAgent<'a> {
    pub role: &'a str,
    pub worker_kind: &'a str,
    pub dependencies: &'a [String],
}

/// Insert an agent row. Returns the inserted row, or `None` when a row for
/// the role already exists (restart recovery keeps the existing state).
pub async fn insert_agent(pool: &SqlitePool, new: &NewAgent<'_>) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>(
        "INSERT INTO agents (role, worker_kind, dependencies, created_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (role) DO NOTHING \
         RETURNING *",
    )
    .bind(new.role)
    .bind(new.worker_kind)
    .bind(Json(new.dependencies.to_vec()))
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to insert agent {:?}", new.role))?;

    Ok(agent)
}

/// Fetch a single agent by role (case-insensitive).
pub async fn get_agent(pool: &SqlitePool, role: &str) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE role = ?1")
        .bind(role)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch agent {role:?}"))?;

    Ok(agent)
}

/// List all agents, ordered by creation time then role.
pub async fn list_agents(pool: &SqlitePool) -> Result<Vec<Agent>> {
    let agents =
        sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY created_at ASC, role ASC")
            .fetch_all(pool)
            .await
            .context("failed to list agents")?;

    Ok(agents)
}

/// Write back every mutable field of an agent row.
///
/// This is the single write path used by the state manager's
/// read-modify-write; per-role serialization comes from the store's single
/// writer. Returns the number of rows affected (0 means the role vanished).
pub async fn update_agent_row(pool: &SqlitePool, agent: &Agent) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE agents \
         SET worker_kind = ?1, \
             status = ?2, \
             dependencies = ?3, \
             task_id = ?4, \
             spawned_at = ?5, \
             completed_at = ?6, \
             last_heartbeat_at = ?7, \
             timeout_at = ?8, \
             retry_count = ?9, \
             last_message = ?10, \
             last_error = ?11, \
             recovery_context = ?12, \
             estimated_context_usage = ?13, \
             artifacts = ?14 \
         WHERE role = ?15",
    )
    .bind(&agent.worker_kind)
    .bind(agent.status)
    .bind(&agent.dependencies)
    .bind(&agent.task_id)
    .bind(agent.spawned_at)
    .bind(agent.completed_at)
    .bind(agent.last_heartbeat_at)
    .bind(agent.timeout_at)
    .bind(agent.retry_count)
    .bind(&agent.last_message)
    .bind(&agent.last_error)
    .bind(&agent.recovery_context)
    .bind(agent.estimated_context_usage)
    .bind(&agent.artifacts)
    .bind(&agent.role)
    .execute(pool)
    .await
    .with_context(|| format!("failed to update agent {:?}", agent.role))?;

    Ok(result.rows_affected())
}
