//! Tests for the worker spawner using fake shell-script workers.

mod common;

use std::time::{Duration, Instant};

use common::{TestEngine, test_config, write_script};

/// Scratch files currently present for a role (prompt + tool config).
fn scratch_files(engine: &TestEngine, role: &str) -> Vec<String> {
    let scratch = engine.work_dir.path().join("scratch");
    let Ok(entries) = std::fs::read_dir(&scratch) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(role) && !name.ends_with(".log"))
        .collect()
}

#[tokio::test]
async fn spawn_tracks_process_and_writes_scratch() {
    let engine = TestEngine::new().await;
    engine.seed(&[("dev", &[])]).await;

    let outcome = engine.spawner.spawn("dev", "developer", None).await.unwrap();
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert!(outcome.process_id.is_some());

    let info = engine.spawner.get_process("dev").await.expect("tracked");
    assert_eq!(info.role, "dev");
    assert_eq!(info.task_id, outcome.task_id);

    let files = scratch_files(&engine, "dev");
    assert_eq!(files.len(), 2, "prompt and tool config: {files:?}");
    assert!(files.iter().any(|f| f.ends_with("-prompt.md")));
    assert!(files.iter().any(|f| f.ends_with("-tools.json")));

    assert!(engine.spawner.terminate("dev").await.unwrap());
}

#[tokio::test]
async fn spawn_writes_prompt_with_recovery_context() {
    let engine = TestEngine::new().await;
    engine.seed(&[("dev", &[])]).await;

    let outcome = engine
        .spawner
        .spawn("dev", "developer", Some("## Resuming From Checkpoint\n- [x] step 1"))
        .await
        .unwrap();
    assert!(outcome.success);

    let scratch = engine.work_dir.path().join("scratch");
    let prompt_path = scratch.join(format!("dev-{}-prompt.md", outcome.task_id));
    let prompt = std::fs::read_to_string(&prompt_path).expect("prompt file exists");
    assert!(prompt.contains("# Role: dev"));
    assert!(prompt.contains("## Resuming From Checkpoint"));

    engine.spawner.terminate("dev").await.unwrap();
}

#[tokio::test]
async fn duplicate_spawn_is_rejected() {
    let engine = TestEngine::new().await;
    engine.seed(&[("dev", &[])]).await;

    let first = engine.spawner.spawn("dev", "developer", None).await.unwrap();
    assert!(first.success);

    let second = engine.spawner.spawn("dev", "developer", None).await.unwrap();
    assert!(!second.success);
    assert!(
        second.error.as_deref().unwrap_or("").contains("already running"),
        "error: {:?}",
        second.error
    );

    engine.spawner.terminate("dev").await.unwrap();
}

#[tokio::test]
async fn spawn_failure_cleans_scratch_and_reports_error() {
    let mut config = test_config();
    config.worker.binary_path = "/nonexistent/worker/binary".to_string();
    let engine = TestEngine::with_config(config).await;
    engine.seed(&[("dev", &[])]).await;

    let outcome = engine.spawner.spawn("dev", "developer", None).await.unwrap();
    assert!(!outcome.success);
    assert!(
        outcome.error.as_deref().unwrap_or("").contains("failed to spawn"),
        "error: {:?}",
        outcome.error
    );

    assert!(scratch_files(&engine, "dev").is_empty(), "scratch cleaned up");
    assert!(engine.spawner.get_process("dev").await.is_none());
}

#[tokio::test]
async fn terminate_unknown_role_returns_false() {
    let engine = TestEngine::new().await;
    assert!(!engine.spawner.terminate("ghost").await.unwrap());
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let engine = TestEngine::new().await;
    engine.seed(&[("dev", &[])]).await;

    engine.spawner.spawn("dev", "developer", None).await.unwrap();
    assert!(engine.spawner.terminate("dev").await.unwrap());
    assert!(!engine.spawner.terminate("dev").await.unwrap(), "second call finds nothing");
}

#[tokio::test]
async fn terminate_reaps_a_worker_that_already_exited() {
    let script_dir = tempfile::TempDir::new().unwrap();
    let script = write_script(script_dir.path(), "quick.sh", "#!/bin/sh\nexit 0\n");

    let mut config = test_config();
    config.worker.binary_path = script.display().to_string();
    let engine = TestEngine::with_config(config).await;
    engine.seed(&[("dev", &[])]).await;

    let outcome = engine.spawner.spawn("dev", "developer", None).await.unwrap();
    assert!(outcome.success);

    // Give the script time to exit on its own.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(engine.spawner.terminate("dev").await.unwrap());
    assert!(scratch_files(&engine, "dev").is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn stubborn_worker_is_force_killed_within_bounds() {
    // A worker that ignores SIGTERM.
    let script_dir = tempfile::TempDir::new().unwrap();
    let script = write_script(
        script_dir.path(),
        "stubborn.sh",
        "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 1; done\n",
    );

    let mut config = test_config();
    config.graceful_shutdown_timeout = Duration::from_millis(300);
    config.worker.binary_path = script.display().to_string();
    let engine = TestEngine::with_config(config).await;
    engine.seed(&[("dev", &[])]).await;

    let outcome = engine.spawner.spawn("dev", "developer", None).await.unwrap();
    assert!(outcome.success);

    let start = Instant::now();
    assert!(engine.spawner.terminate("dev").await.unwrap());
    let elapsed = start.elapsed();

    // Graceful window (300 ms) plus the 5 s forced-kill reap bound, with
    // generous slack for slow machines.
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
    assert!(engine.spawner.get_process("dev").await.is_none());
    assert!(scratch_files(&engine, "dev").is_empty(), "scratch deleted on forced kill");
}

#[tokio::test]
async fn shutdown_all_terminates_every_worker() {
    let engine = TestEngine::new().await;
    engine.seed(&[("a", &[]), ("b", &[])]).await;

    assert!(engine.spawner.spawn("a", "generic", None).await.unwrap().success);
    assert!(engine.spawner.spawn("b", "generic", None).await.unwrap().success);
    assert_eq!(engine.spawner.tracked_roles().await.len(), 2);

    engine.spawner.shutdown_all().await;
    assert!(engine.spawner.tracked_roles().await.is_empty());
}
