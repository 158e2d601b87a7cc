//! The supervisor loop: the periodic scheduler that drives all agent
//! transitions.
//!
//! Each tick runs three phases in a fixed order: health check (stalled
//! running agents go to the timeout handler), dependency promotion
//! (pending -> queued once dependencies complete), and the spawn pass
//! (queued -> spawning -> running/failed). Phase errors are logged and the
//! remaining phases still run; the loop backs off briefly on a failed tick
//! and continues until cancellation or a terminal roster configuration.
//!
//! Completion is never inferred from process exit: a worker that dies
//! silently stays `running` until its heartbeat lapses and the timeout
//! policy takes over.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foreman_db::models::{AgentStatus, ProjectPhase};

use crate::config::EngineConfig;
use crate::events::EventPublisher;
use crate::heartbeat::HeartbeatMonitor;
use crate::spawner::{SpawnOutcome, WorkerSpawner};
use crate::state::{StateManager, normalize_role};
use crate::timeout::TimeoutHandler;

/// How the supervisor loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Every agent completed.
    Completed,
    /// Nothing can make progress and at least one agent failed or
    /// escalated.
    Failed { failed_roles: Vec<String> },
    /// The loop was cancelled.
    Interrupted,
}

/// Wait this long for the external readiness signal before proceeding
/// anyway.
const READY_GRACE: Duration = Duration::from_secs(10);

/// Back off this long after a failed tick (e.g. store unreachable).
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The periodic scheduler driving agent lifecycle transitions.
pub struct Supervisor {
    config: Arc<EngineConfig>,
    state: Arc<StateManager>,
    heartbeats: Arc<HeartbeatMonitor>,
    timeouts: Arc<TimeoutHandler>,
    spawner: Arc<WorkerSpawner>,
    events: Arc<EventPublisher>,
    timeouts_total: AtomicU64,
    spawn_failures_total: AtomicU64,
}

impl Supervisor {
    pub fn new(
        config: Arc<EngineConfig>,
        state: Arc<StateManager>,
        heartbeats: Arc<HeartbeatMonitor>,
        timeouts: Arc<TimeoutHandler>,
        spawner: Arc<WorkerSpawner>,
        events: Arc<EventPublisher>,
    ) -> Self {
        Self {
            config,
            state,
            heartbeats,
            timeouts,
            spawner,
            events,
            timeouts_total: AtomicU64::new(0),
            spawn_failures_total: AtomicU64::new(0),
        }
    }

    /// Stall detections recorded so far.
    pub fn timeouts_recorded(&self) -> u64 {
        self.timeouts_total.load(Ordering::Relaxed)
    }

    /// Spawn failures recorded so far.
    pub fn spawn_failures_recorded(&self) -> u64 {
        self.spawn_failures_total.load(Ordering::Relaxed)
    }

    /// Run the loop until cancellation or a terminal roster configuration.
    ///
    /// `ready` optionally gates the first tick on an external readiness
    /// signal (the inbound tool facade endpoint); a lapsed grace logs a
    /// warning and proceeds.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        ready: Option<oneshot::Receiver<()>>,
    ) -> Result<SupervisorOutcome> {
        if let Some(rx) = ready {
            match tokio::time::timeout(READY_GRACE, rx).await {
                Ok(Ok(())) => debug!("readiness signal received"),
                Ok(Err(_)) => warn!("readiness channel dropped, proceeding"),
                Err(_) => warn!("readiness signal timed out, proceeding"),
            }
        }

        let mut interval = tokio::time::interval(self.config.polling_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("supervisor cancelled, terminating workers");
                    self.spawner.shutdown_all().await;
                    return Ok(SupervisorOutcome::Interrupted);
                }
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(Some(outcome)) => {
                    self.spawner.shutdown_all().await;
                    return Ok(outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "supervisor tick failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.spawner.shutdown_all().await;
                            return Ok(SupervisorOutcome::Interrupted);
                        }
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    /// One scheduler tick. Returns a terminal outcome when the roster has
    /// reached one.
    pub async fn tick(&self) -> Result<Option<SupervisorOutcome>> {
        let mut first_error: Option<anyhow::Error> = None;

        if let Err(e) = self.check_health().await {
            warn!(error = %e, "health check phase failed");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.promote_ready().await {
            warn!(error = %e, "dependency promotion phase failed");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.spawn_queued().await {
            warn!(error = %e, "spawn phase failed");
            first_error.get_or_insert(e);
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        self.refresh_project().await
    }

    /// Phase 1: delegate every unhealthy running role to the timeout
    /// handler.
    async fn check_health(&self) -> Result<()> {
        let unhealthy = self.heartbeats.unhealthy_running().await?;
        for role in unhealthy {
            self.timeouts_total.fetch_add(1, Ordering::Relaxed);
            warn!(role = %role, "heartbeat lapsed, applying timeout policy");
            if let Err(e) = self.timeouts.handle_stall(&role).await {
                warn!(role = %role, error = %e, "timeout handling failed");
                continue;
            }
            self.heartbeats.clear(&role).await;
        }
        Ok(())
    }

    /// Phase 2: promote pending agents whose dependencies are satisfied.
    async fn promote_ready(&self) -> Result<()> {
        let ready = self.state.get_ready_agents().await?;
        for agent in ready
            .into_iter()
            .filter(|a| a.status == AgentStatus::Pending)
        {
            let role = normalize_role(&agent.role);
            match self
                .state
                .update_agent(&role, |a| a.status = AgentStatus::Queued)
                .await
            {
                Ok(updated) => self.events.publish_agent_update(updated).await,
                Err(e) => warn!(role = %role, error = %e, "failed to promote agent"),
            }
        }
        Ok(())
    }

    /// Phase 3: spawn a worker for every ready queued agent.
    async fn spawn_queued(&self) -> Result<()> {
        let ready = self.state.get_ready_agents().await?;
        for agent in ready
            .into_iter()
            .filter(|a| a.status == AgentStatus::Queued)
        {
            let role = normalize_role(&agent.role);

            // Atomically capture-and-clear the recovery context while
            // moving to spawning.
            let mut recovery: Option<String> = None;
            let spawning = match self
                .state
                .update_agent(&role, |a| {
                    recovery = a.recovery_context.take();
                    a.status = AgentStatus::Spawning;
                })
                .await
            {
                Ok(updated) => updated,
                Err(e) => {
                    warn!(role = %role, error = %e, "failed to mark agent spawning");
                    continue;
                }
            };
            self.events.publish_agent_update(spawning).await;

            let outcome = match self
                .spawner
                .spawn(&role, &agent.worker_kind, recovery.as_deref())
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => SpawnOutcome {
                    task_id: String::new(),
                    success: false,
                    process_id: None,
                    error: Some(format!("{e:#}")),
                },
            };

            if outcome.success {
                let role_timeout = self.config.role_timeout_for(&role);
                let now = Utc::now();
                let deadline = now
                    + chrono::Duration::from_std(role_timeout)
                        .unwrap_or_else(|_| chrono::Duration::hours(1));
                let task_id = outcome.task_id.clone();
                match self
                    .state
                    .update_agent(&role, |a| {
                        a.status = AgentStatus::Running;
                        a.task_id = Some(task_id);
                        a.spawned_at = Some(now);
                        a.timeout_at = Some(deadline);
                        a.last_error = None;
                    })
                    .await
                {
                    Ok(updated) => {
                        info!(role = %role, task_id = %outcome.task_id, "worker running");
                        self.events.publish_agent_update(updated).await;
                    }
                    Err(e) => warn!(role = %role, error = %e, "failed to mark agent running"),
                }
            } else {
                self.spawn_failures_total.fetch_add(1, Ordering::Relaxed);
                let error = outcome
                    .error
                    .unwrap_or_else(|| "unknown spawn failure".to_string());
                warn!(role = %role, error = %error, "worker spawn failed");
                match self
                    .state
                    .update_agent(&role, |a| {
                        a.status = AgentStatus::Failed;
                        a.retry_count += 1;
                        a.last_error = Some(error);
                    })
                    .await
                {
                    Ok(updated) => self.events.publish_agent_update(updated).await,
                    Err(e) => warn!(role = %role, error = %e, "failed to mark agent failed"),
                }
            }
        }
        Ok(())
    }

    /// Track major project phase transitions and detect terminal roster
    /// configurations.
    async fn refresh_project(&self) -> Result<Option<SupervisorOutcome>> {
        let agents = self.state.get_all_agents().await?;
        if agents.is_empty() {
            return Ok(None);
        }

        if agents
            .iter()
            .all(|a| a.status == AgentStatus::Completed)
        {
            self.state.update_phase(ProjectPhase::Completed).await?;
            let project = self.state.get_project().await?;
            self.events.publish_project_update(project).await;
            return Ok(Some(SupervisorOutcome::Completed));
        }

        let in_flight = agents.iter().any(|a| {
            matches!(
                a.status,
                AgentStatus::Queued
                    | AgentStatus::Spawning
                    | AgentStatus::Running
                    | AgentStatus::Paused
                    | AgentStatus::TimedOut
            )
        });

        if in_flight {
            let project = self.state.get_project().await?;
            if project.phase == ProjectPhase::Initializing {
                self.state.update_phase(ProjectPhase::Building).await?;
                let project = self.state.get_project().await?;
                self.events.publish_project_update(project).await;
            }
            return Ok(None);
        }

        // Nothing in flight. If the remaining pending agents can never
        // become ready (a dependency failed or escalated), the project is
        // done failing.
        let ready = self.state.get_ready_agents().await?;
        let failed_roles: Vec<String> = agents
            .iter()
            .filter(|a| matches!(a.status, AgentStatus::Failed | AgentStatus::Escalated))
            .map(|a| normalize_role(&a.role))
            .collect();

        if ready.is_empty() && !failed_roles.is_empty() {
            self.state.update_phase(ProjectPhase::Failed).await?;
            let project = self.state.get_project().await?;
            self.events.publish_project_update(project).await;
            return Ok(Some(SupervisorOutcome::Failed { failed_roles }));
        }

        Ok(None)
    }
}
