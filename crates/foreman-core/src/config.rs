//! Engine configuration.
//!
//! Every recognized option is a field here; the CLI builds this struct from
//! its config file and flags. Per-role timeout overrides resolve through
//! [`EngineConfig::role_timeout_for`].

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the supervisor loop.
    pub polling_interval: Duration,
    /// Liveness threshold: a running agent whose last signal is older than
    /// this is treated as stalled.
    pub heartbeat_timeout: Duration,
    /// Deadline added to `spawned_at` for roles without an override.
    pub default_role_timeout: Duration,
    /// Per-role deadline overrides, keyed by lowercase role.
    pub role_timeouts: HashMap<String, Duration>,
    /// Retry budget before the timeout handler escalates.
    pub max_retries: u32,
    /// Bound on graceful worker termination before the process tree is
    /// killed.
    pub graceful_shutdown_timeout: Duration,
    /// TTL of the state manager's read cache.
    pub cache_ttl: Duration,
    /// Cap on message slices returned to observers and workers.
    pub max_recent_messages: usize,
    /// Worker command-line options, passed through verbatim.
    pub worker: WorkerCommandConfig,
    /// How spawned workers reach the inbound tool facade.
    pub tool_transport: ToolTransport,
    /// Task-decomposer tuning, consumed by the decomposer subsystem.
    pub decomposition: DecompositionConfig,
    /// Escalation notification route.
    pub notifications: NotificationChannel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(120),
            default_role_timeout: Duration::from_secs(3600),
            role_timeouts: HashMap::new(),
            max_retries: 3,
            graceful_shutdown_timeout: Duration::from_millis(10_000),
            cache_ttl: Duration::from_secs(30),
            max_recent_messages: 50,
            worker: WorkerCommandConfig::default(),
            tool_transport: ToolTransport::default(),
            decomposition: DecompositionConfig::default(),
            notifications: NotificationChannel::Console,
        }
    }
}

impl EngineConfig {
    /// Resolve the deadline for a role: per-role override or the default.
    pub fn role_timeout_for(&self, role: &str) -> Duration {
        self.role_timeouts
            .get(&role.to_lowercase())
            .copied()
            .unwrap_or(self.default_role_timeout)
    }
}

/// Options forwarded verbatim into the spawned worker command line.
#[derive(Debug, Clone)]
pub struct WorkerCommandConfig {
    /// Path to the worker binary (found via `$PATH` by default).
    pub binary_path: String,
    pub model: Option<String>,
    pub output_format: Option<String>,
    pub max_turns: Option<u32>,
    pub dangerously_skip_permissions: bool,
}

impl Default for WorkerCommandConfig {
    fn default() -> Self {
        Self {
            binary_path: "claude".to_string(),
            model: None,
            output_format: Some("stream-json".to_string()),
            max_turns: None,
            dangerously_skip_permissions: false,
        }
    }
}

/// Transport over which a worker reaches the inbound tool facade.
///
/// Serialized into the per-instance endpoint config file the spawner writes
/// for each worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ToolTransport {
    Stdio,
    HttpSse { host: String, port: u16 },
}

impl Default for ToolTransport {
    fn default() -> Self {
        Self::Stdio
    }
}

/// Tuning for the task decomposer (splits oversized work items).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecompositionConfig {
    pub tokens_per_file: u64,
    pub safe_context_tokens: u64,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            tokens_per_file: 2_000,
            safe_context_tokens: 120_000,
        }
    }
}

/// Escalation route, selected once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Console,
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_timeout_falls_back_to_default() {
        let config = EngineConfig::default();
        assert_eq!(config.role_timeout_for("anything"), config.default_role_timeout);
    }

    #[test]
    fn role_timeout_override_is_case_insensitive() {
        let mut config = EngineConfig::default();
        config
            .role_timeouts
            .insert("architect".to_string(), Duration::from_secs(60));
        assert_eq!(config.role_timeout_for("Architect"), Duration::from_secs(60));
        assert_eq!(config.role_timeout_for("ARCHITECT"), Duration::from_secs(60));
    }

    #[test]
    fn tool_transport_serializes_tagged() {
        let t = ToolTransport::HttpSse {
            host: "127.0.0.1".to_string(),
            port: 8700,
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "http-sse");
        assert_eq!(json["port"], 8700);

        let stdio = serde_json::to_value(ToolTransport::Stdio).unwrap();
        assert_eq!(stdio["type"], "stdio");
    }
}
