use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle phase of the (singleton) project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    Initializing,
    Planning,
    Building,
    Testing,
    Reviewing,
    Completing,
    Completed,
    Failed,
    Paused,
}

impl ProjectPhase {
    /// A terminal phase ends the project's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Planning => "planning",
            Self::Building => "building",
            Self::Testing => "testing",
            Self::Reviewing => "reviewing",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

impl FromStr for ProjectPhase {
    type Err = ProjectPhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "planning" => Ok(Self::Planning),
            "building" => Ok(Self::Building),
            "testing" => Ok(Self::Testing),
            "reviewing" => Ok(Self::Reviewing),
            "completing" => Ok(Self::Completing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            other => Err(ProjectPhaseParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProjectPhase`] string.
#[derive(Debug, Clone)]
pub struct ProjectPhaseParseError(pub String);

impl fmt::Display for ProjectPhaseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid project phase: {:?}", self.0)
    }
}

impl std::error::Error for ProjectPhaseParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Queued,
    Spawning,
    Running,
    Paused,
    Completed,
    Failed,
    TimedOut,
    Escalated,
}

impl AgentStatus {
    /// Terminal for the current retry count: no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Escalated)
    }

    /// An active agent has (or is acquiring) a live worker process.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Spawning | Self::Paused)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentStatus {
    type Err = AgentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "spawning" => Ok(Self::Spawning),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "escalated" => Ok(Self::Escalated),
            other => Err(AgentStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AgentStatus`] string.
#[derive(Debug, Clone)]
pub struct AgentStatusParseError(pub String);

impl fmt::Display for AgentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid agent status: {:?}", self.0)
    }
}

impl std::error::Error for AgentStatusParseError {}

// ---------------------------------------------------------------------------

/// Type of a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Info,
    Progress,
    Done,
    Error,
    Help,
    Heartbeat,
    Checkpoint,
    Question,
    NeedsReview,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Progress => "progress",
            Self::Done => "done",
            Self::Error => "error",
            Self::Help => "help",
            Self::Heartbeat => "heartbeat",
            Self::Checkpoint => "checkpoint",
            Self::Question => "question",
            Self::NeedsReview => "needs_review",
        };
        f.write_str(s)
    }
}

impl FromStr for MessageType {
    type Err = MessageTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "progress" => Ok(Self::Progress),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            "help" => Ok(Self::Help),
            "heartbeat" => Ok(Self::Heartbeat),
            "checkpoint" => Ok(Self::Checkpoint),
            "question" => Ok(Self::Question),
            "needs_review" => Ok(Self::NeedsReview),
            other => Err(MessageTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MessageType`] string.
#[derive(Debug, Clone)]
pub struct MessageTypeParseError(pub String);

impl fmt::Display for MessageTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message type: {:?}", self.0)
    }
}

impl std::error::Error for MessageTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// The project singleton (`id = 1`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub working_dir: String,
    pub phase: ProjectPhase,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub brief: Option<String>,
}

/// An agent row: an intended unit of work keyed by role.
///
/// The row outlives any worker process; `status` cycles while the row
/// persists for the whole project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub role: String,
    pub worker_kind: String,
    pub status: AgentStatus,
    /// Roles that must be `completed` before this agent may leave `pending`.
    /// Serialized on the row so the ready check is local to a single read.
    pub dependencies: Json<Vec<String>>,
    pub task_id: Option<String>,
    pub spawned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
    pub last_message: Option<String>,
    pub last_error: Option<String>,
    /// Consumed and cleared by the next spawn.
    pub recovery_context: Option<String>,
    pub estimated_context_usage: Option<i64>,
    pub artifacts: Option<Json<Vec<String>>>,
    pub created_at: DateTime<Utc>,
}

/// A worker-authored progress snapshot. Append-only, retained forever.
///
/// Item lists are stored as JSON-encoded string arrays in TEXT columns and
/// parsed leniently by the checkpoint service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Checkpoint {
    pub id: i64,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub completed_items: String,
    pub pending_items: String,
    pub active_files: Option<String>,
    pub notes: Option<String>,
    pub estimated_context_usage: Option<i64>,
}

/// A persisted bus message. The `id` is the dedup key for at-least-once
/// delivery.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    pub from_role: String,
    pub to_role: String,
    pub msg_type: MessageType,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub artifacts: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
