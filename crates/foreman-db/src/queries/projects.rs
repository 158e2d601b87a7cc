//! Query functions for the `project` singleton table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{Project, ProjectPhase};

/// Insert the project singleton row (`id = 1`).
///
/// Fails if a project row already exists; callers that want idempotent
/// startup should check [`get_project`] first.
pub async fn insert_project(
    pool: &SqlitePool,
    name: &str,
    working_dir: &str,
    brief: Option<&str>,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO project (id, name, working_dir, phase, started_at, brief) \
         VALUES (1, ?1, ?2, ?3, ?4, ?5) \
         RETURNING *",
    )
    .bind(name)
    .bind(working_dir)
    .bind(ProjectPhase::Initializing)
    .bind(Utc::now())
    .bind(brief)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch the project singleton, if initialized.
pub async fn get_project(pool: &SqlitePool) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM project WHERE id = 1")
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// Update the project phase. Terminal phases also set `completed_at`.
pub async fn update_phase(pool: &SqlitePool, phase: ProjectPhase) -> Result<u64> {
    let completed_at = if phase.is_terminal() {
        Some(Utc::now())
    } else {
        None
    };

    let result = sqlx::query(
        "UPDATE project \
         SET phase = ?1, \
             completed_at = COALESCE(?2, completed_at) \
         WHERE id = 1",
    )
    .bind(phase)
    .bind(completed_at)
    .execute(pool)
    .await
    .context("failed to update project phase")?;

    Ok(result.rows_affected())
}

/// Replace the free-text project brief.
pub async fn update_brief(pool: &SqlitePool, brief: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE project SET brief = ?1 WHERE id = 1")
        .bind(brief)
        .execute(pool)
        .await
        .context("failed to update project brief")?;

    Ok(result.rows_affected())
}
