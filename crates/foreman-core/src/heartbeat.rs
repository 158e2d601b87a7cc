//! Heartbeat-based liveness detection.
//!
//! Workers report liveness through the tool facade; the monitor keeps the
//! last signal per role in memory and falls back to the persisted agent row
//! (max of `last_heartbeat_at` and `spawned_at`) when no in-memory entry
//! exists, e.g. right after an engine restart. The threshold comparison is
//! inclusive: a signal arriving exactly at the timeout is still healthy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use foreman_db::models::{Agent, AgentStatus};

use crate::state::{StateManager, normalize_role};

/// The last liveness signal recorded for a role.
#[derive(Debug, Clone)]
pub struct HeartbeatEntry {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub progress: Option<String>,
}

/// Records liveness signals and reports the unhealthy set.
pub struct HeartbeatMonitor {
    entries: Mutex<HashMap<String, HeartbeatEntry>>,
    timeout: Duration,
    state: Arc<StateManager>,
}

impl HeartbeatMonitor {
    pub fn new(state: Arc<StateManager>, timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            state,
        }
    }

    /// Upsert the liveness entry for a role.
    pub async fn record(&self, role: &str, status: &str, progress: Option<String>) {
        let entry = HeartbeatEntry {
            timestamp: Utc::now(),
            status: status.to_string(),
            progress,
        };
        self.entries.lock().await.insert(normalize_role(role), entry);
    }

    /// Force the role to be picked up as stalled at the next health check
    /// by recording an entry at the epoch. Used when a worker reports it
    /// has hit its context limit.
    pub async fn mark_stalled(&self, role: &str, status: &str) {
        let entry = HeartbeatEntry {
            timestamp: DateTime::UNIX_EPOCH,
            status: status.to_string(),
            progress: None,
        };
        self.entries.lock().await.insert(normalize_role(role), entry);
    }

    /// Remove the entry for a role on worker termination.
    pub async fn clear(&self, role: &str) {
        self.entries.lock().await.remove(&normalize_role(role));
    }

    /// The last recorded entry for a role, if any.
    pub async fn get(&self, role: &str) -> Option<HeartbeatEntry> {
        self.entries.lock().await.get(&normalize_role(role)).cloned()
    }

    /// Whether a role counts as healthy right now.
    pub async fn is_healthy(&self, role: &str) -> Result<bool> {
        let key = normalize_role(role);
        let entry = self.entries.lock().await.get(&key).cloned();
        if let Some(entry) = entry {
            return Ok(self.within_timeout(entry.timestamp, Utc::now()));
        }

        let agent = self.state.get_agent(&key).await?;
        Ok(self.agent_is_healthy(&agent, Utc::now()))
    }

    /// All running agents whose liveness signal has lapsed.
    pub async fn unhealthy_running(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let agents = self.state.get_all_agents().await?;
        let entries = self.entries.lock().await;

        let mut unhealthy = Vec::new();
        for agent in agents.iter().filter(|a| a.status == AgentStatus::Running) {
            let key = normalize_role(&agent.role);
            let healthy = match entries.get(&key) {
                Some(entry) => self.within_timeout(entry.timestamp, now),
                None => self.agent_is_healthy(agent, now),
            };
            if !healthy {
                unhealthy.push(key);
            }
        }
        Ok(unhealthy)
    }

    /// Fallback check against the persisted row: non-running agents are not
    /// monitored; a running agent with no timestamp at all is unhealthy.
    fn agent_is_healthy(&self, agent: &Agent, now: DateTime<Utc>) -> bool {
        if agent.status != AgentStatus::Running {
            return true;
        }
        let last_signal = match (agent.last_heartbeat_at, agent.spawned_at) {
            (Some(hb), Some(sp)) => Some(hb.max(sp)),
            (Some(hb), None) => Some(hb),
            (None, Some(sp)) => Some(sp),
            (None, None) => None,
        };
        match last_signal {
            Some(ts) => self.within_timeout(ts, now),
            None => false,
        }
    }

    fn within_timeout(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(ts);
        // A signal from the future counts as fresh.
        if elapsed < chrono::Duration::zero() {
            return true;
        }
        elapsed.to_std().map(|e| e <= self.timeout).unwrap_or(false)
    }
}
