//! The `foreman run` command: validate the roster, build the engine in
//! construction order, and drive the supervisor to completion.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use foreman_core::bus::MessageBus;
use foreman_core::checkpoint::CheckpointService;
use foreman_core::config::EngineConfig;
use foreman_core::events::EventPublisher;
use foreman_core::heartbeat::HeartbeatMonitor;
use foreman_core::notify::Notifier;
use foreman_core::resolver;
use foreman_core::roster::parse_roster_toml;
use foreman_core::spawner::WorkerSpawner;
use foreman_core::state::StateManager;
use foreman_core::supervisor::{Supervisor, SupervisorOutcome};
use foreman_core::timeout::TimeoutHandler;

pub async fn run_project(
    pool: &SqlitePool,
    engine_config: EngineConfig,
    roster_path: &str,
    working_dir: Option<&str>,
) -> Result<()> {
    // Parse and validate the roster before touching any state.
    let content = std::fs::read_to_string(roster_path)
        .with_context(|| format!("failed to read roster file {roster_path}"))?;
    let roster = parse_roster_toml(&content)?;

    let report = resolver::validate(&roster);
    for warning in &report.warnings {
        warn!("{warning}");
    }
    if !report.is_ok() {
        for error in &report.errors {
            eprintln!("error: {error}");
        }
        bail!("roster validation failed with {} error(s)", report.errors.len());
    }

    let working_dir = match working_dir {
        Some(dir) => dir.to_string(),
        None => std::env::current_dir()
            .context("failed to resolve current directory")?
            .display()
            .to_string(),
    };

    // Per-role timeout overrides from the roster land on the engine config.
    let mut engine_config = engine_config;
    for spec in &roster.agents {
        if let Some(secs) = spec.timeout_secs {
            engine_config.role_timeouts.insert(
                spec.role.to_lowercase(),
                std::time::Duration::from_secs(secs),
            );
        }
    }
    let config = Arc::new(engine_config);

    // Explicit construction order: store, state manager, bus, heartbeat,
    // checkpoint, spawner, timeout handler, supervisor, event publisher.
    let state = Arc::new(StateManager::new(pool.clone(), config.cache_ttl));
    let bus = Arc::new(MessageBus::new(pool.clone()));
    let heartbeats = Arc::new(HeartbeatMonitor::new(
        Arc::clone(&state),
        config.heartbeat_timeout,
    ));
    let checkpoints = Arc::new(CheckpointService::new(pool.clone()));
    let scratch_dir = std::path::Path::new(&working_dir).join(".foreman");
    let spawner = Arc::new(WorkerSpawner::new(
        Arc::clone(&config),
        Arc::clone(&state),
        scratch_dir,
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

    state
        .initialize_project(
            &roster.project.name,
            &working_dir,
            roster.project.brief.as_deref(),
        )
        .await?;
    let created = state.seed_from_roster(&roster).await?;
    println!(
        "Project {:?}: {} agent(s) seeded, {} total.",
        roster.project.name,
        created,
        roster.agents.len()
    );

    // Console observer: one line per event.
    events.start(&bus).await;
    let mut observer = events.subscribe().await;
    let observer_task = tokio::spawn(async move {
        while let Some(event) = observer.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to encode event"),
            }
        }
    });

    // Ctrl-C cancels the run; the supervisor reaps workers on its way out.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let outcome = supervisor.run(cancel, None).await?;

    events.stop().await;
    bus.close();
    let _ = observer_task.await;

    match outcome {
        SupervisorOutcome::Completed => {
            println!("All agents completed.");
            Ok(())
        }
        SupervisorOutcome::Failed { failed_roles } => {
            bail!("project failed; roles needing attention: {}", failed_roles.join(", "))
        }
        SupervisorOutcome::Interrupted => {
            println!("Interrupted; workers terminated.");
            Ok(())
        }
    }
}

/// The `foreman validate` command: parse and report without running.
pub fn validate_roster(roster_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(roster_path)
        .with_context(|| format!("failed to read roster file {roster_path}"))?;
    let roster = parse_roster_toml(&content)?;

    let report = resolver::validate(&roster);
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    if report.is_ok() {
        println!(
            "Roster OK: {} agent(s), no dependency errors.",
            roster.agents.len()
        );
        Ok(())
    } else {
        for error in &report.errors {
            eprintln!("error: {error}");
        }
        bail!("roster validation failed with {} error(s)", report.errors.len())
    }
}
