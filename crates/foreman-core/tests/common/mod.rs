//! Shared harness for foreman-core integration tests.
//!
//! Builds the full component graph in the engine's construction order
//! against a temp-dir SQLite database, with a fake worker binary (a shell
//! script) standing in for the real agent CLI.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use foreman_core::bus::MessageBus;
use foreman_core::checkpoint::CheckpointService;
use foreman_core::config::EngineConfig;
use foreman_core::events::EventPublisher;
use foreman_core::facade::ToolFacade;
use foreman_core::heartbeat::HeartbeatMonitor;
use foreman_core::notify::Notifier;
use foreman_core::roster::{ProjectMeta, RoleSpec, Roster};
use foreman_core::spawner::WorkerSpawner;
use foreman_core::state::StateManager;
use foreman_core::supervisor::Supervisor;
use foreman_core::timeout::TimeoutHandler;
use foreman_test_utils::create_test_db;

pub struct TestEngine {
    pub config: Arc<EngineConfig>,
    pub state: Arc<StateManager>,
    pub bus: Arc<MessageBus>,
    pub checkpoints: Arc<CheckpointService>,
    pub heartbeats: Arc<HeartbeatMonitor>,
    pub events: Arc<EventPublisher>,
    pub spawner: Arc<WorkerSpawner>,
    pub timeouts: Arc<TimeoutHandler>,
    pub supervisor: Arc<Supervisor>,
    pub facade: ToolFacade,
    pub work_dir: TempDir,
    _db_dir: TempDir,
}

impl TestEngine {
    /// Build the engine with the given config. The project working
    /// directory and the scratch directory live under a fresh temp dir.
    pub async fn with_config(mut config: EngineConfig) -> Self {
        let (pool, db_dir) = create_test_db().await;
        let work_dir = TempDir::new().expect("failed to create work dir");

        // Default the worker binary to a quiet long-running fake unless the
        // test configured one.
        if config.worker.binary_path == "claude" {
            config.worker.binary_path = write_script(
                work_dir.path(),
                "fake_worker.sh",
                "#!/bin/sh\nexec sleep 300\n",
            )
            .display()
            .to_string();
        }

        let config = Arc::new(config);
        let state = Arc::new(StateManager::new(pool.clone(), config.cache_ttl));
        let bus = Arc::new(MessageBus::new(pool.clone()));
        let heartbeats = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&state),
            config.heartbeat_timeout,
        ));
        let checkpoints = Arc::new(CheckpointService::new(pool.clone()));
        let spawner = Arc::new(WorkerSpawner::new(
            Arc::clone(&config),
            Arc::clone(&state),
            work_dir.path().join("scratch"),
        ));
        let events = Arc::new(EventPublisher::new());
        let timeouts = Arc::new(TimeoutHandler::new(
            Arc::clone(&state),
            Arc::clone(&checkpoints),
            Arc::clone(&bus),
            Arc::clone(&events),
            Arc::clone(&spawner),
            Notifier::from_config(config.notifications),
            config.max_retries,
        ));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&config),
            Arc::clone(&state),
            Arc::clone(&heartbeats),
            Arc::clone(&timeouts),
            Arc::clone(&spawner),
            Arc::clone(&events),
        ));
        let facade = ToolFacade::new(
            Arc::clone(&config),
            Arc::clone(&state),
            Arc::clone(&bus),
            Arc::clone(&checkpoints),
            Arc::clone(&heartbeats),
            Arc::clone(&events),
        );

        let engine = Self {
            config,
            state,
            bus,
            checkpoints,
            heartbeats,
            events,
            spawner,
            timeouts,
            supervisor,
            facade,
            work_dir,
            _db_dir: db_dir,
        };

        engine
            .state
            .initialize_project(
                "test-project",
                &engine.work_dir.path().display().to_string(),
                None,
            )
            .await
            .expect("project init");

        engine
    }

    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Seed agent rows from `(role, deps)` pairs.
    pub async fn seed(&self, agents: &[(&str, &[&str])]) {
        let roster = make_roster(agents);
        self.state
            .seed_from_roster(&roster)
            .await
            .expect("seed roster");
    }

    /// Drive an agent straight to `running` with fresh timestamps, as the
    /// spawn pass would.
    pub async fn force_running(&self, role: &str) {
        use foreman_db::models::AgentStatus;

        let agent = self.state.get_agent(role).await.expect("agent exists");
        if agent.status == AgentStatus::Pending {
            self.state
                .update_agent(role, |a| a.status = AgentStatus::Queued)
                .await
                .expect("to queued");
        }
        self.state
            .update_agent(role, |a| a.status = AgentStatus::Spawning)
            .await
            .expect("to spawning");
        let now = chrono::Utc::now();
        self.state
            .update_agent(role, |a| {
                a.status = AgentStatus::Running;
                a.task_id = Some("test-task".to_string());
                a.spawned_at = Some(now);
                a.timeout_at = Some(now + chrono::Duration::hours(1));
            })
            .await
            .expect("to running");
    }

    /// Backdate an agent's liveness timestamps so the monitor sees a stall.
    pub async fn backdate_liveness(&self, role: &str, age: chrono::Duration) {
        let past = chrono::Utc::now() - age;
        self.state
            .update_agent(role, |a| {
                a.spawned_at = Some(past);
                a.last_heartbeat_at = Some(past);
            })
            .await
            .expect("backdate");
        self.heartbeats.clear(role).await;
    }
}

/// Config tuned for fast tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        polling_interval: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_secs(5),
        graceful_shutdown_timeout: Duration::from_millis(500),
        cache_ttl: Duration::from_secs(30),
        ..EngineConfig::default()
    }
}

/// Build a roster from `(role, deps)` pairs.
pub fn make_roster(agents: &[(&str, &[&str])]) -> Roster {
    Roster {
        project: ProjectMeta {
            name: "test-project".to_string(),
            brief: None,
        },
        agents: agents
            .iter()
            .map(|(role, deps)| RoleSpec {
                role: role.to_string(),
                worker_kind: "generic".to_string(),
                depends_on: deps.iter().map(|d| d.to_string()).collect(),
                timeout_secs: None,
            })
            .collect(),
    }
}

/// Write an executable shell script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
    }
    path
}
