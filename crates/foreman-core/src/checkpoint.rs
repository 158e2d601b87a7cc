//! Checkpoint service: persists worker progress snapshots and synthesizes
//! the resumption context fed back into restarted workers.
//!
//! The resumption context is a deterministic ASCII markdown document built
//! from the latest checkpoint. Item lists live as JSON-encoded string
//! arrays on the row; a list that fails to parse is embedded verbatim
//! rather than lost.

use anyhow::Result;
use chrono::SecondsFormat;
use sqlx::SqlitePool;

use foreman_db::models::Checkpoint;
use foreman_db::queries::checkpoints::{self, NewCheckpoint};

use crate::state::normalize_role;

/// Worker-supplied checkpoint fields, before storage encoding.
#[derive(Debug, Clone, Default)]
pub struct CheckpointInput {
    pub summary: String,
    pub completed_items: Vec<String>,
    pub pending_items: Vec<String>,
    pub active_files: Option<Vec<String>>,
    pub notes: Option<String>,
    pub estimated_context_usage: Option<i64>,
}

/// Persistence and resumption-context synthesis for checkpoints.
pub struct CheckpointService {
    pool: SqlitePool,
}

impl CheckpointService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a checkpoint for a role (the role on the row is normalized).
    pub async fn save(&self, role: &str, input: &CheckpointInput) -> Result<Checkpoint> {
        let role = normalize_role(role);
        let completed = serde_json::to_string(&input.completed_items)?;
        let pending = serde_json::to_string(&input.pending_items)?;
        let active = input
            .active_files
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        checkpoints::insert_checkpoint(
            &self.pool,
            &NewCheckpoint {
                role: &role,
                summary: &input.summary,
                completed_items: &completed,
                pending_items: &pending,
                active_files: active.as_deref(),
                notes: input.notes.as_deref(),
                estimated_context_usage: input.estimated_context_usage,
            },
        )
        .await
    }

    /// The newest checkpoint for a role, if any.
    pub async fn latest(&self, role: &str) -> Result<Option<Checkpoint>> {
        checkpoints::get_latest_for_role(&self.pool, &normalize_role(role)).await
    }

    /// Checkpoint history for a role, newest first.
    pub async fn history(&self, role: &str, limit: Option<i64>) -> Result<Vec<Checkpoint>> {
        checkpoints::list_for_role(&self.pool, &normalize_role(role), limit).await
    }

    /// Compose the resumption context from the latest checkpoint.
    ///
    /// Returns `None` when the role has never checkpointed.
    pub async fn resumption_context(&self, role: &str) -> Result<Option<String>> {
        Ok(self.latest(role).await?.map(|cp| render_resumption(&cp)))
    }
}

/// Fraction of completed items, as a whole percentage.
///
/// `completed / max(1, completed + pending)`, so a checkpoint with no items
/// reports 0%.
pub fn percent_complete(checkpoint: &Checkpoint) -> u32 {
    let completed = parse_items(&checkpoint.completed_items).len();
    let pending = parse_items(&checkpoint.pending_items).len();
    let total = (completed + pending).max(1);
    ((completed as f64 / total as f64) * 100.0).round() as u32
}

/// Render the deterministic resumption markdown for a checkpoint.
///
/// Section order is fixed: header, summary, progress line, Completed,
/// Remaining, Active Files (only when present), Notes, trailing directive.
/// Markers are plain ASCII so the document survives any platform encoding.
pub fn render_resumption(checkpoint: &Checkpoint) -> String {
    let completed = parse_items(&checkpoint.completed_items);
    let pending = parse_items(&checkpoint.pending_items);
    let total = completed.len() + pending.len();
    let percent = percent_complete(checkpoint);

    let mut out = String::new();

    out.push_str(&format!(
        "## Resuming From Checkpoint ({})\n\n",
        checkpoint
            .created_at
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    ));

    out.push_str(checkpoint.summary.trim());
    out.push_str("\n\n");

    out.push_str(&format!(
        "Progress: {percent}% complete ({}/{} items)\n\n",
        completed.len(),
        total
    ));

    out.push_str("### Completed\n");
    if completed.is_empty() {
        out.push_str("- None\n");
    } else {
        for item in &completed {
            out.push_str(&format!("- [x] {item}\n"));
        }
    }
    out.push('\n');

    out.push_str("### Remaining\n");
    if pending.is_empty() {
        out.push_str("- None\n");
    } else {
        for item in &pending {
            out.push_str(&format!("- [ ] {item}\n"));
        }
    }
    out.push('\n');

    if let Some(raw) = checkpoint.active_files.as_deref() {
        let files = parse_items(raw);
        if !files.is_empty() {
            out.push_str("### Active Files\n");
            for file in &files {
                out.push_str(&format!("- `{file}`\n"));
            }
            out.push('\n');
        }
    }

    out.push_str("### Notes\n");
    match checkpoint.notes.as_deref().map(str::trim) {
        Some(notes) if !notes.is_empty() => {
            out.push_str(notes);
            out.push('\n');
        }
        _ => out.push_str("None recorded.\n"),
    }
    out.push('\n');

    out.push_str("Continue from this checkpoint.\n");
    out
}

/// Parse a JSON-encoded string array leniently.
///
/// On parse failure the raw string is kept verbatim as a single item so
/// worker-supplied content is never dropped.
fn parse_items(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(items) => items,
        Err(_) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![raw.to_string()]
            }
        }
    }
}
