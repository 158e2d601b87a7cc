//! Progressive timeout/retry policy for stalled agents.
//!
//! The supervisor delegates each unhealthy running role here. Keyed on the
//! agent's retry count against the configured budget: first stall restarts
//! from the latest checkpoint, second restarts with a reduced-scope
//! directive prepended, and once the budget is exhausted the agent is
//! escalated for human attention through the bus, the notifier, and the
//! event plane.

use std::sync::Arc;

use anyhow::Result;
use chrono::SecondsFormat;
use tracing::{debug, warn};

use foreman_db::models::{Agent, AgentStatus, Checkpoint, MessageType};

use crate::bus::{MessageBus, NewMessage};
use crate::checkpoint::{CheckpointService, percent_complete};
use crate::events::EventPublisher;
use crate::notify::Notifier;
use crate::spawner::WorkerSpawner;
use crate::state::{StateManager, normalize_role};

/// Sentinel recipient for engine-directed messages (escalations, help
/// requests).
pub const SUPERVISOR_ROLE: &str = "supervisor";

/// Fixed directive prepended to the recovery context on the second stall.
pub const REDUCED_SCOPE_PREAMBLE: &str = "Your previous run stalled. Reduce scope before continuing: break the \
remaining work into the smallest atomic tasks you can, record a checkpoint \
after each one, and send heartbeats frequently while you work.";

/// Applies the retry policy when a running agent's heartbeat lapses.
pub struct TimeoutHandler {
    state: Arc<StateManager>,
    checkpoints: Arc<CheckpointService>,
    bus: Arc<MessageBus>,
    events: Arc<EventPublisher>,
    spawner: Arc<WorkerSpawner>,
    notifier: Notifier,
    max_retries: u32,
}

impl TimeoutHandler {
    pub fn new(
        state: Arc<StateManager>,
        checkpoints: Arc<CheckpointService>,
        bus: Arc<MessageBus>,
        events: Arc<EventPublisher>,
        spawner: Arc<WorkerSpawner>,
        notifier: Notifier,
        max_retries: u32,
    ) -> Self {
        Self {
            state,
            checkpoints,
            bus,
            events,
            spawner,
            notifier,
            max_retries,
        }
    }

    /// Handle a stalled role: terminate its worker, mark it timed out, and
    /// either requeue it with recovery context or escalate.
    pub async fn handle_stall(&self, role: &str) -> Result<()> {
        let key = normalize_role(role);
        let agent = self.state.get_agent(&key).await?;

        if agent.status != AgentStatus::Running {
            debug!(role = %key, status = %agent.status, "stall delegation is stale, skipping");
            return Ok(());
        }

        // At most one live worker per role: reap the stalled one before any
        // restart can spawn a replacement. The spawner owns the process;
        // this only calls its API.
        match self.spawner.terminate(&key).await {
            Ok(true) => debug!(role = %key, "terminated stalled worker"),
            Ok(false) => debug!(role = %key, "no live worker to terminate"),
            Err(e) => warn!(role = %key, error = %e, "failed to terminate stalled worker"),
        }

        self.state
            .update_agent(&key, |a| {
                a.status = AgentStatus::TimedOut;
            })
            .await?;

        let retry_count = agent.retry_count.max(0) as u32;
        if retry_count >= self.max_retries.saturating_sub(1) {
            self.escalate(&key, &agent).await
        } else if retry_count == 1 {
            self.requeue(&key, true).await
        } else {
            self.requeue(&key, false).await
        }
    }

    /// Requeue a timed-out agent with recovery context.
    async fn requeue(&self, role: &str, reduced_scope: bool) -> Result<()> {
        let resumption = self.checkpoints.resumption_context(role).await?;

        let context = match (reduced_scope, resumption) {
            (true, Some(md)) => Some(format!("{REDUCED_SCOPE_PREAMBLE}\n\n{md}")),
            (true, None) => Some(REDUCED_SCOPE_PREAMBLE.to_string()),
            (false, Some(md)) => Some(md),
            (false, None) => {
                warn!(role = %role, "restarting without recovery context: no checkpoint recorded");
                None
            }
        };

        let last_error = if reduced_scope {
            "Heartbeat timeout - restarting with reduced scope"
        } else {
            "Heartbeat timeout - restarting from last checkpoint"
        };

        let updated = self
            .state
            .update_agent(role, |a| {
                a.status = AgentStatus::Queued;
                a.retry_count += 1;
                a.timeout_at = None;
                a.recovery_context = context;
                a.last_error = Some(last_error.to_string());
            })
            .await?;

        self.events.publish_agent_update(updated).await;
        Ok(())
    }

    /// Escalate an agent whose retry budget is exhausted.
    async fn escalate(&self, role: &str, agent: &Agent) -> Result<()> {
        let attempts = agent.retry_count + 1;
        let latest = self.checkpoints.latest(role).await?;
        let report = escalation_report(agent, attempts, latest.as_ref());

        let updated = self
            .state
            .update_agent(role, |a| {
                a.status = AgentStatus::Escalated;
                a.timeout_at = None;
                a.last_error = Some(format!("Timed out after {attempts} attempts"));
            })
            .await?;

        self.bus
            .publish(NewMessage::new(
                role,
                SUPERVISOR_ROLE,
                MessageType::Error,
                report.clone(),
            ))
            .await?;

        self.notifier.escalation(role, &report);
        self.events.publish_agent_update(updated).await;
        Ok(())
    }
}

/// Render the escalation report delivered to the supervisor sentinel.
fn escalation_report(agent: &Agent, attempts: i64, latest: Option<&Checkpoint>) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "ESCALATION: agent {:?} requires attention\n\n",
        agent.role
    ));
    out.push_str(&format!("- **Role**: {}\n", agent.role));
    out.push_str(&format!("- **Worker kind**: {}\n", agent.worker_kind));
    out.push_str(&format!("- **Attempts**: {attempts}\n"));
    out.push_str(&format!(
        "- **Last error**: {}\n",
        agent.last_error.as_deref().unwrap_or("none recorded")
    ));
    out.push_str(&format!(
        "- **Spawned at**: {}\n",
        agent
            .spawned_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "never".to_string())
    ));

    match latest {
        Some(cp) => {
            out.push_str("\n## Last Checkpoint\n\n");
            out.push_str(&format!("- **Summary**: {}\n", cp.summary));
            out.push_str(&format!("- **Progress**: {}%\n", percent_complete(cp)));
            if let Some(notes) = cp.notes.as_deref() {
                out.push_str(&format!("- **Notes**: {notes}\n"));
            }
        }
        None => {
            out.push_str("\nNo checkpoint was ever recorded for this agent.\n");
        }
    }

    out
}
