//! Inbound tool facade: the operation surface workers call back into.
//!
//! Each operation takes a JSON object and returns a structured result with
//! an `is_error` flag; no error ever crosses this boundary as a panic or a
//! crash of the host. Completion is signalled here (the `complete`
//! operation and `report_status` with `done`), never by process exit.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;

use foreman_db::models::{AgentStatus, MessageType};

use crate::bus::{MessageBus, NewMessage};
use crate::checkpoint::{CheckpointInput, CheckpointService};
use crate::config::EngineConfig;
use crate::events::EventPublisher;
use crate::heartbeat::HeartbeatMonitor;
use crate::state::{StateManager, normalize_role};
use crate::timeout::SUPERVISOR_ROLE;

/// Structured result of a tool operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub is_error: bool,
    pub text: String,
}

impl ToolResult {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            text: text.into(),
        }
    }
}

/// Converts worker-originated tool calls into core mutations.
pub struct ToolFacade {
    config: Arc<EngineConfig>,
    state: Arc<StateManager>,
    bus: Arc<MessageBus>,
    checkpoints: Arc<CheckpointService>,
    heartbeats: Arc<HeartbeatMonitor>,
    events: Arc<EventPublisher>,
}

impl ToolFacade {
    pub fn new(
        config: Arc<EngineConfig>,
        state: Arc<StateManager>,
        bus: Arc<MessageBus>,
        checkpoints: Arc<CheckpointService>,
        heartbeats: Arc<HeartbeatMonitor>,
        events: Arc<EventPublisher>,
    ) -> Self {
        Self {
            config,
            state,
            bus,
            checkpoints,
            heartbeats,
            events,
        }
    }

    /// Dispatch a named operation. Unknown operations and all errors come
    /// back as `is_error` results.
    pub async fn handle(&self, operation: &str, args: Value) -> ToolResult {
        let result = match operation {
            "heartbeat" => self.heartbeat(&args).await,
            "report_status" => self.report_status(&args).await,
            "checkpoint" => self.checkpoint(&args).await,
            "complete" => self.complete(&args).await,
            "send_message" => self.send_message(&args).await,
            "request_help" => self.request_help(&args).await,
            "get_context" => self.get_context(&args).await,
            other => Err(anyhow!("unknown operation {other:?}")),
        };

        match result {
            Ok(text) => ToolResult::ok(text),
            Err(e) => ToolResult::error(format!("{e:#}")),
        }
    }

    // -------------------------------------------------------------------
    // heartbeat
    // -------------------------------------------------------------------

    async fn heartbeat(&self, args: &Value) -> Result<String> {
        let role = require_str(args, "agentRole")?;
        let status = require_str(args, "status")?;
        if !matches!(status, "working" | "thinking" | "writing") {
            bail!("invalid heartbeat status {status:?} (expected working, thinking, or writing)");
        }
        let progress = opt_string(args, "progress");
        let estimated = opt_i64(args, "estimatedContextUsage");

        // Unknown roles are rejected before anything is recorded.
        self.state.get_agent(role).await?;

        self.heartbeats.record(role, status, progress.clone()).await;

        let now = Utc::now();
        let deadline = now
            + chrono::Duration::from_std(self.config.role_timeout_for(role))
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        self.state
            .update_agent(role, |a| {
                a.last_heartbeat_at = Some(now);
                a.timeout_at = Some(deadline);
                if let Some(progress) = progress {
                    a.last_message = Some(progress);
                }
                if let Some(estimated) = estimated {
                    a.estimated_context_usage = Some(estimated);
                }
            })
            .await?;

        Ok(format!("heartbeat recorded for {role}"))
    }

    // -------------------------------------------------------------------
    // report_status
    // -------------------------------------------------------------------

    async fn report_status(&self, args: &Value) -> Result<String> {
        let role = require_str(args, "agentRole")?;
        let status = require_str(args, "status")?;
        let message = require_str(args, "message")?;
        let blocked_reason = opt_string(args, "blockedReason");
        let artifacts = opt_string_list(args, "artifacts")?;

        match status {
            "done" => {
                self.complete_agent(role, Some(message.to_string()), artifacts)
                    .await
            }
            "working" | "blocked" | "context_limit" => {
                let last_message = match (status, blocked_reason) {
                    ("blocked", Some(reason)) => format!("{message} (blocked: {reason})"),
                    _ => message.to_string(),
                };
                let updated = self
                    .state
                    .update_agent(role, |a| {
                        a.last_message = Some(last_message);
                        if let Some(artifacts) = artifacts {
                            a.artifacts = Some(Json(artifacts));
                        }
                    })
                    .await?;

                if status == "context_limit" {
                    // Treated as a stall at the next supervisor tick.
                    self.heartbeats.mark_stalled(role, "context_limit").await;
                }

                self.events.publish_agent_update(updated).await;
                Ok(format!("status recorded for {role}"))
            }
            other => bail!(
                "invalid report status {other:?} (expected working, blocked, done, or context_limit)"
            ),
        }
    }

    // -------------------------------------------------------------------
    // checkpoint
    // -------------------------------------------------------------------

    async fn checkpoint(&self, args: &Value) -> Result<String> {
        let role = require_str(args, "agentRole")?;
        let summary = require_str(args, "summary")?;
        let completed = require_string_list(args, "completedItems")?;
        let pending = require_string_list(args, "pendingItems")?;
        let active_files = opt_string_list(args, "activeFiles")?;
        let notes = opt_string(args, "notes");
        let estimated = opt_i64(args, "estimatedContextUsage");

        self.state.get_agent(role).await?;

        let checkpoint = self
            .checkpoints
            .save(
                role,
                &CheckpointInput {
                    summary: summary.to_string(),
                    completed_items: completed,
                    pending_items: pending,
                    active_files,
                    notes,
                    estimated_context_usage: estimated,
                },
            )
            .await?;

        if let Some(estimated) = estimated {
            self.state
                .update_agent(role, |a| {
                    a.estimated_context_usage = Some(estimated);
                })
                .await?;
        }

        self.events.publish_checkpoint(checkpoint).await;
        Ok(format!("checkpoint saved for {role}"))
    }

    // -------------------------------------------------------------------
    // complete
    // -------------------------------------------------------------------

    async fn complete(&self, args: &Value) -> Result<String> {
        let role = require_str(args, "agentRole")?;
        let summary = opt_string(args, "summary");
        let artifacts = opt_string_list(args, "artifacts")?;
        self.complete_agent(role, summary, artifacts).await
    }

    /// Shared completion semantics for `complete` and
    /// `report_status(done)`. Idempotent per role.
    async fn complete_agent(
        &self,
        role: &str,
        summary: Option<String>,
        artifacts: Option<Vec<String>>,
    ) -> Result<String> {
        let key = normalize_role(role);
        let agent = self.state.get_agent(&key).await?;

        if agent.status == AgentStatus::Completed {
            return Ok(format!("{key} is already completed"));
        }
        if agent.status != AgentStatus::Running {
            bail!(
                "cannot complete {key:?}: status is {}, expected running",
                agent.status
            );
        }

        let now = Utc::now();
        let done_summary = summary.clone();
        let updated = self
            .state
            .update_agent(&key, |a| {
                a.status = AgentStatus::Completed;
                a.completed_at = Some(now);
                a.timeout_at = None;
                if let Some(summary) = summary {
                    a.last_message = Some(summary);
                }
                if let Some(artifacts) = artifacts {
                    a.artifacts = Some(Json(artifacts));
                }
            })
            .await?;

        self.heartbeats.clear(&key).await;

        self.bus
            .publish(NewMessage::new(
                key.as_str(),
                SUPERVISOR_ROLE,
                MessageType::Done,
                done_summary.unwrap_or_else(|| format!("{key} completed its work")),
            ))
            .await?;

        self.events.publish_agent_update(updated).await;
        Ok(format!("completion recorded for {key}"))
    }

    // -------------------------------------------------------------------
    // send_message
    // -------------------------------------------------------------------

    async fn send_message(&self, args: &Value) -> Result<String> {
        let from = require_str(args, "from")?;
        let to = require_str(args, "to")?;
        let type_str = require_str(args, "type")?;
        let content = require_str(args, "content")?;
        let msg_type: MessageType = type_str
            .parse()
            .map_err(|e| anyhow!("{e}"))?;

        let message = self
            .bus
            .publish(NewMessage {
                id: opt_string(args, "id"),
                from_role: from.to_string(),
                to_role: to.to_string(),
                msg_type,
                content: content.to_string(),
                artifacts: args.get("artifacts").cloned().filter(|v| !v.is_null()),
                metadata: args.get("metadata").cloned().filter(|v| !v.is_null()),
            })
            .await?;

        Ok(format!("message {} published", message.id))
    }

    // -------------------------------------------------------------------
    // request_help
    // -------------------------------------------------------------------

    async fn request_help(&self, args: &Value) -> Result<String> {
        let role = require_str(args, "agentRole")?;
        let help_type = require_str(args, "helpType")?;
        let issue = require_str(args, "issue")?;

        self.state.get_agent(role).await?;

        self.bus
            .publish(NewMessage::new(
                role,
                SUPERVISOR_ROLE,
                MessageType::Help,
                format!("[{help_type}] {issue}"),
            ))
            .await?;

        Ok(format!("help request recorded for {role}"))
    }

    // -------------------------------------------------------------------
    // get_context
    // -------------------------------------------------------------------

    async fn get_context(&self, args: &Value) -> Result<String> {
        const VALID: [&str; 4] = ["project", "agents", "messages", "artifacts"];

        let include: Vec<String> = match opt_string_list(args, "include")? {
            Some(include) => include,
            None => VALID.iter().map(|s| s.to_string()).collect(),
        };
        for member in &include {
            if !VALID.contains(&member.as_str()) {
                bail!(
                    "invalid include member {member:?} (expected project, agents, messages, or artifacts)"
                );
            }
        }

        let role_filter = opt_string_list(args, "agentRoles")?
            .map(|roles| roles.iter().map(|r| normalize_role(r)).collect::<Vec<_>>());

        let message_limit = opt_i64(args, "messageLimit")
            .unwrap_or(50)
            .clamp(1, self.config.max_recent_messages as i64);

        let mut reply = serde_json::Map::new();

        if include.iter().any(|m| m == "project") {
            let project = self.state.get_project().await?;
            reply.insert("project".to_string(), serde_json::to_value(project)?);
        }

        let wants_agents = include.iter().any(|m| m == "agents");
        let wants_artifacts = include.iter().any(|m| m == "artifacts");
        if wants_agents || wants_artifacts {
            let agents: Vec<_> = self
                .state
                .get_all_agents()
                .await?
                .into_iter()
                .filter(|a| match &role_filter {
                    Some(roles) => roles.contains(&normalize_role(&a.role)),
                    None => true,
                })
                .collect();

            if wants_agents {
                reply.insert("agents".to_string(), serde_json::to_value(&agents)?);
            }
            if wants_artifacts {
                let artifacts: serde_json::Map<String, Value> = agents
                    .iter()
                    .filter_map(|a| {
                        a.artifacts.as_ref().map(|list| {
                            (a.role.clone(), serde_json::json!(list.0))
                        })
                    })
                    .collect();
                reply.insert("artifacts".to_string(), Value::Object(artifacts));
            }
        }

        if include.iter().any(|m| m == "messages") {
            let messages = self.bus.get_all(Some(message_limit)).await?;
            reply.insert("messages".to_string(), serde_json::to_value(messages)?);
        }

        serde_json::to_string_pretty(&Value::Object(reply)).context("failed to encode context")
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .with_context(|| format!("missing required field {key:?}"))
}

fn opt_string(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn opt_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

fn opt_string_list(args: &Value, key: &str) -> Result<Option<Vec<String>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => bail!("field {key:?} must be an array of strings"),
                }
            }
            Ok(Some(out))
        }
        Some(_) => bail!("field {key:?} must be an array of strings"),
    }
}

fn require_string_list(args: &Value, key: &str) -> Result<Vec<String>> {
    opt_string_list(args, key)?
        .with_context(|| format!("missing required field {key:?}"))
}
