//! Event fan-out plane for live observers.
//!
//! State, checkpoint, and project changes are published here directly; bus
//! messages arrive through a role-less bus subscription the publisher pumps
//! itself. Observers get their own unbounded queue: the persistence layer
//! is the durable truth, so a slow observer costs memory, never data loss
//! for anyone else. Publish failures drop the dead observer silently.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use foreman_db::models::{Agent, Checkpoint, Message, Project};

use crate::bus::MessageBus;

/// An event on the observer plane.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    AgentUpdate { agent: Agent },
    Message { message: Message },
    Checkpoint { checkpoint: Checkpoint },
    ProjectUpdate { project: Project },
}

type ObserverList = Arc<Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>>;

/// Fan-out of engine events to live observers.
pub struct EventPublisher {
    observers: ObserverList,
    shutdown: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
            shutdown: CancellationToken::new(),
            pump: Mutex::new(None),
        }
    }

    /// Start the bus pump: a role-less subscription whose messages are
    /// republished to observers as [`EngineEvent::Message`].
    pub async fn start(&self, bus: &MessageBus) {
        use futures::StreamExt;

        let mut stream = bus.subscribe(None);
        let observers = Arc::clone(&self.observers);
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = stream.next() => match next {
                        Some(message) => {
                            deliver(&observers, EngineEvent::Message { message }).await;
                        }
                        None => break,
                    },
                }
            }
        });

        *self.pump.lock().await = Some(handle);
    }

    /// Deliver an event to every live observer, dropping closed ones.
    pub async fn publish(&self, event: EngineEvent) {
        deliver(&self.observers, event).await;
    }

    pub async fn publish_agent_update(&self, agent: Agent) {
        self.publish(EngineEvent::AgentUpdate { agent }).await;
    }

    pub async fn publish_checkpoint(&self, checkpoint: Checkpoint) {
        self.publish(EngineEvent::Checkpoint { checkpoint }).await;
    }

    pub async fn publish_project_update(&self, project: Project) {
        self.publish(EngineEvent::ProjectUpdate { project }).await;
    }

    /// Open a new observer stream.
    pub async fn subscribe(&self) -> UnboundedReceiverStream<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().await.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Stop the pump and end every observer stream.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.pump.lock().await.take() {
            if let Err(e) = handle.await {
                debug!(error = %e, "event pump ended abnormally");
            }
        }
        self.observers.lock().await.clear();
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver(observers: &ObserverList, event: EngineEvent) {
    let mut observers = observers.lock().await;
    observers.retain(|tx| tx.send(event.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foreman_db::models::{AgentStatus, ProjectPhase};
    use futures::StreamExt;

    fn project() -> Project {
        Project {
            id: 1,
            name: "demo".to_string(),
            working_dir: "/tmp".to_string(),
            phase: ProjectPhase::Building,
            started_at: Utc::now(),
            completed_at: None,
            brief: None,
        }
    }

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let event = EngineEvent::ProjectUpdate { project: project() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "project-update");
        assert_eq!(json["project"]["name"], "demo");
    }

    #[test]
    fn agent_update_tag() {
        let agent = Agent {
            role: "dev".to_string(),
            worker_kind: "developer".to_string(),
            status: AgentStatus::Running,
            dependencies: sqlx::types::Json(vec![]),
            task_id: None,
            spawned_at: None,
            completed_at: None,
            last_heartbeat_at: None,
            timeout_at: None,
            retry_count: 0,
            last_message: None,
            last_error: None,
            recovery_context: None,
            estimated_context_usage: None,
            artifacts: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(EngineEvent::AgentUpdate { agent }).unwrap();
        assert_eq!(json["type"], "agent-update");
        assert_eq!(json["agent"]["status"], "running");
    }

    #[tokio::test]
    async fn observers_receive_published_events() {
        let publisher = EventPublisher::new();
        let mut stream = publisher.subscribe().await;

        publisher
            .publish(EngineEvent::ProjectUpdate { project: project() })
            .await;

        let event = stream.next().await.expect("event delivered");
        assert!(matches!(event, EngineEvent::ProjectUpdate { .. }));
    }

    #[tokio::test]
    async fn dropped_observers_are_pruned() {
        let publisher = EventPublisher::new();
        let stream = publisher.subscribe().await;
        drop(stream);

        publisher
            .publish(EngineEvent::ProjectUpdate { project: project() })
            .await;
        assert!(publisher.observers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stop_ends_observer_streams() {
        let publisher = EventPublisher::new();
        let mut stream = publisher.subscribe().await;
        publisher.stop().await;
        assert!(stream.next().await.is_none());
    }
}
