//! Worker process supervisor.
//!
//! Spawns one external worker per role, tracks it in a role-keyed map, and
//! owns graceful termination: SIGTERM to the process, bounded wait, then
//! SIGKILL to the whole process group. The spawner exclusively owns every
//! child it creates and every scratch file it writes; no other component
//! may signal or delete them.

pub mod prompt;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, WorkerCommandConfig};
use crate::state::{StateManager, normalize_role};

/// Result of a spawn attempt.
#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    pub task_id: String,
    pub success: bool,
    pub process_id: Option<u32>,
    pub error: Option<String>,
}

impl SpawnOutcome {
    fn failed(task_id: String, error: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            process_id: None,
            error: Some(error.into()),
        }
    }
}

/// Public view of a tracked worker process.
#[derive(Debug, Clone)]
pub struct WorkerProcessInfo {
    pub role: String,
    pub task_id: String,
    pub process_id: Option<u32>,
    pub started_at: DateTime<Utc>,
}

/// Internal bookkeeping per spawned worker.
struct TrackedWorker {
    child: Child,
    task_id: String,
    started_at: DateTime<Utc>,
    /// Per-instance scratch files, deleted on termination.
    scratch: Vec<PathBuf>,
}

/// Starts and terminates external worker processes.
pub struct WorkerSpawner {
    config: Arc<EngineConfig>,
    state: Arc<StateManager>,
    /// Directory for per-instance scratch files and worker logs.
    scratch_dir: PathBuf,
    processes: Mutex<HashMap<String, TrackedWorker>>,
}

impl WorkerSpawner {
    pub fn new(config: Arc<EngineConfig>, state: Arc<StateManager>, scratch_dir: PathBuf) -> Self {
        Self {
            config,
            state,
            scratch_dir,
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a worker for a role.
    ///
    /// Fails (with `success = false`) when a live process for the role is
    /// already tracked; a tracked-but-exited process is reaped first. An
    /// `Err` return means the engine itself could not prepare the spawn
    /// (no project, scratch dir unwritable).
    pub async fn spawn(
        &self,
        role: &str,
        worker_kind: &str,
        recovery_context: Option<&str>,
    ) -> Result<SpawnOutcome> {
        let key = normalize_role(role);
        let task_id = Uuid::new_v4().to_string();

        // Reap an already-exited worker; reject a live one.
        {
            let mut processes = self.processes.lock().await;
            if let Some(tracked) = processes.get_mut(&key) {
                match tracked.child.try_wait() {
                    Ok(Some(_status)) => {
                        let stale = processes.remove(&key).map(|t| t.scratch);
                        if let Some(paths) = stale {
                            cleanup_scratch(&paths);
                        }
                    }
                    _ => {
                        return Ok(SpawnOutcome::failed(
                            task_id,
                            format!("a worker for role {key:?} is already running"),
                        ));
                    }
                }
            }
        }

        let project = self.state.get_project().await?;

        std::fs::create_dir_all(&self.scratch_dir).with_context(|| {
            format!("failed to create scratch dir {}", self.scratch_dir.display())
        })?;

        // Materialize the system prompt and the tool-endpoint config.
        let prompt_text =
            prompt::render_system_prompt(worker_kind, &key, &project, recovery_context);
        let prompt_path = self.scratch_dir.join(format!("{key}-{task_id}-prompt.md"));
        let tools_path = self.scratch_dir.join(format!("{key}-{task_id}-tools.json"));
        let scratch = vec![prompt_path.clone(), tools_path.clone()];

        if let Err(e) = std::fs::write(&prompt_path, &prompt_text) {
            cleanup_scratch(&scratch);
            return Ok(SpawnOutcome::failed(
                task_id,
                format!("failed to write prompt file: {e}"),
            ));
        }
        let transport_json = serde_json::to_string_pretty(&self.config.tool_transport)
            .context("failed to serialize tool transport config")?;
        if let Err(e) = std::fs::write(&tools_path, transport_json) {
            cleanup_scratch(&scratch);
            return Ok(SpawnOutcome::failed(
                task_id,
                format!("failed to write tool config file: {e}"),
            ));
        }

        // Redirect the worker's stdio to a per-instance log. Logs are kept
        // for debugging; they are not scratch.
        let log_path = self.scratch_dir.join(format!("{key}-{task_id}.log"));
        let (stdout, stderr) = match open_log(&log_path) {
            Ok(pair) => pair,
            Err(e) => {
                cleanup_scratch(&scratch);
                return Ok(SpawnOutcome::failed(
                    task_id,
                    format!("failed to open worker log: {e}"),
                ));
            }
        };

        let mut cmd = Command::new(&self.config.worker.binary_path);
        cmd.args(worker_args(
            &self.config.worker,
            &task_id,
            &key,
            &prompt_path,
            &tools_path,
        ));
        cmd.current_dir(&project.working_dir);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(stdout);
        cmd.stderr(stderr);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                cleanup_scratch(&scratch);
                return Ok(SpawnOutcome::failed(
                    task_id,
                    format!(
                        "failed to spawn worker binary {:?}: {e}",
                        self.config.worker.binary_path
                    ),
                ));
            }
        };

        let process_id = child.id();

        debug!(role = %key, task_id = %task_id, pid = ?process_id, "worker spawned");

        self.processes.lock().await.insert(
            key,
            TrackedWorker {
                child,
                task_id: task_id.clone(),
                started_at: Utc::now(),
                scratch,
            },
        );

        Ok(SpawnOutcome {
            task_id,
            success: true,
            process_id,
            error: None,
        })
    }

    /// Terminate the worker for a role.
    ///
    /// Returns `false` when no process is tracked for the role. Otherwise:
    /// graceful signal to the process only, bounded wait, then SIGKILL to
    /// the whole process group with a 5 s reap window. Scratch files are
    /// deleted on every path.
    pub async fn terminate(&self, role: &str) -> Result<bool> {
        let key = normalize_role(role);
        let tracked = self.processes.lock().await.remove(&key);
        let Some(mut tracked) = tracked else {
            return Ok(false);
        };

        if let Ok(Some(status)) = tracked.child.try_wait() {
            debug!(role = %key, ?status, "worker already exited");
            cleanup_scratch(&tracked.scratch);
            return Ok(true);
        }

        let pid = tracked.child.id();

        #[cfg(unix)]
        if let Some(pid) = pid {
            // SIGTERM the process itself, not its group: children get a
            // chance to be reaped by the worker's own handler.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(role = %key, pid, "SIGTERM failed, will force kill");
            }
        }
        #[cfg(not(unix))]
        {
            // No graceful console signal without a platform API; go
            // straight to the kill below by skipping the soft stage.
            let _ = tracked.child.start_kill();
        }

        let graceful = tokio::time::timeout(
            self.config.graceful_shutdown_timeout,
            tracked.child.wait(),
        )
        .await;

        match graceful {
            Ok(Ok(status)) => {
                debug!(role = %key, ?status, "worker exited after graceful signal");
            }
            _ => {
                debug!(role = %key, "graceful shutdown lapsed, killing process tree");
                #[cfg(unix)]
                if let Some(pid) = pid {
                    // Negative pid: the whole process group.
                    unsafe {
                        libc::kill(-(pid as i32), libc::SIGKILL);
                    }
                }
                let _ = tracked.child.start_kill();
                let _ =
                    tokio::time::timeout(Duration::from_secs(5), tracked.child.wait()).await;
            }
        }

        cleanup_scratch(&tracked.scratch);
        Ok(true)
    }

    /// Info about the tracked worker for a role, if any.
    pub async fn get_process(&self, role: &str) -> Option<WorkerProcessInfo> {
        let key = normalize_role(role);
        self.processes.lock().await.get(&key).map(|t| WorkerProcessInfo {
            role: key.clone(),
            task_id: t.task_id.clone(),
            process_id: t.child.id(),
            started_at: t.started_at,
        })
    }

    /// Roles with a tracked worker process.
    pub async fn tracked_roles(&self) -> Vec<String> {
        self.processes.lock().await.keys().cloned().collect()
    }

    /// Terminate every tracked worker concurrently. Used on engine
    /// shutdown; each terminate is individually bounded by the graceful
    /// timeout.
    pub async fn shutdown_all(&self) {
        let roles = self.tracked_roles().await;
        let terminations = roles.iter().map(|role| self.terminate(role));
        for (role, result) in roles.iter().zip(futures::future::join_all(terminations).await) {
            if let Err(e) = result {
                warn!(role = %role, error = %e, "failed to terminate worker at shutdown");
            }
        }
    }
}

/// Build the worker command-line arguments from configured options.
fn worker_args(
    worker: &WorkerCommandConfig,
    task_id: &str,
    role: &str,
    prompt_path: &Path,
    tools_path: &Path,
) -> Vec<String> {
    let mut args = vec!["-p".to_string()];

    if let Some(format) = &worker.output_format {
        args.push("--output-format".to_string());
        args.push(format.clone());
    }
    if let Some(model) = &worker.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(max_turns) = worker.max_turns {
        args.push("--max-turns".to_string());
        args.push(max_turns.to_string());
    }
    args.push("--session-id".to_string());
    args.push(task_id.to_string());
    args.push("--system-prompt-file".to_string());
    args.push(prompt_path.display().to_string());
    args.push("--mcp-config".to_string());
    args.push(tools_path.display().to_string());
    if worker.dangerously_skip_permissions {
        args.push("--dangerously-skip-permissions".to_string());
    }

    // The initial user message references the role; the system prompt
    // carries the rest.
    args.push(format!(
        "You are the {role} agent. Follow your system prompt and report \
         progress through the foreman tools."
    ));

    args
}

fn open_log(path: &Path) -> std::io::Result<(std::process::Stdio, std::process::Stdio)> {
    let file = std::fs::File::create(path)?;
    let clone = file.try_clone()?;
    Ok((file.into(), clone.into()))
}

/// Best-effort deletion of per-instance scratch files.
fn cleanup_scratch(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to delete scratch file");
            }
        }
    }
}
