//! Roster definition: the static description of roles the engine manages.
//!
//! Rosters are authored as TOML and map directly onto these types via
//! `serde` + the `toml` crate:
//!
//! ```toml
//! [project]
//! name = "checkout-rework"
//! brief = "Replace the legacy checkout flow."
//!
//! [[agents]]
//! role = "architect"
//! worker_kind = "architect"
//! depends_on = []
//!
//! [[agents]]
//! role = "developer"
//! worker_kind = "developer"
//! depends_on = ["architect"]
//! timeout_secs = 5400
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level structure of a roster file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Roster {
    /// Project metadata.
    pub project: ProjectMeta,
    /// Roles managed by the engine.
    #[serde(default)]
    pub agents: Vec<RoleSpec>,
}

/// Project-level metadata in `[project]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMeta {
    /// Human-readable project name.
    pub name: String,
    /// Optional free-text project brief, handed to worker prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
}

/// A single `[[agents]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleSpec {
    /// Unique role name. Compared case-insensitively everywhere.
    pub role: String,
    /// Opaque string selecting the worker prompt template.
    pub worker_kind: String,
    /// Roles that must be completed before this one may leave pending.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-role deadline override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Roster {
    /// Look up a role spec by name (case-insensitive).
    pub fn get(&self, role: &str) -> Option<&RoleSpec> {
        self.agents
            .iter()
            .find(|a| a.role.eq_ignore_ascii_case(role))
    }
}

/// Errors that can occur while parsing a roster file.
///
/// Structural problems (missing dependency references, cycles) are reported
/// by the dependency resolver as an aggregate, not here.
#[derive(Debug, Error)]
pub enum RosterParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("duplicate role: {0:?} (roles compare case-insensitively)")]
    DuplicateRole(String),

    #[error("empty role name in agents entry {0}")]
    EmptyRole(usize),

    #[error("roster must define at least one agent")]
    NoAgents,
}

/// Parse a roster TOML string.
///
/// Rejects duplicate roles (case-insensitive), empty role names, and empty
/// rosters. DAG validation happens separately in the resolver.
pub fn parse_roster_toml(content: &str) -> Result<Roster, RosterParseError> {
    let roster: Roster = toml::from_str(content)?;

    if roster.agents.is_empty() {
        return Err(RosterParseError::NoAgents);
    }

    let mut seen: Vec<String> = Vec::with_capacity(roster.agents.len());
    for (idx, agent) in roster.agents.iter().enumerate() {
        let normalized = agent.role.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(RosterParseError::EmptyRole(idx));
        }
        if seen.contains(&normalized) {
            return Err(RosterParseError::DuplicateRole(agent.role.clone()));
        }
        seen.push(normalized);
    }

    Ok(roster)
}
