//! Durable message bus: persist first, then fan out.
//!
//! Persistence is the delivery guarantee; the live fan-out over a broadcast
//! channel is best-effort and may drop silently (no subscribers, lagged
//! receivers). Subscribers that need historical catch-up call
//! [`MessageBus::get_for_role`] with a `since` timestamp before subscribing
//! and deduplicate by message id against the first live deliveries.

use std::pin::Pin;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use futures::Stream;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use foreman_db::models::{Message, MessageType};
use foreman_db::queries::messages::{self, BROADCAST_ROLE, NewMessageRow};

use crate::state::normalize_role;

/// Fields of a message to publish. The id is optional; a v4 UUID is
/// generated when absent.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Option<String>,
    pub from_role: String,
    pub to_role: String,
    pub msg_type: MessageType,
    pub content: String,
    pub artifacts: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

impl NewMessage {
    pub fn new(
        from_role: impl Into<String>,
        to_role: impl Into<String>,
        msg_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            from_role: from_role.into(),
            to_role: to_role.into(),
            msg_type,
            content: content.into(),
            artifacts: None,
            metadata: None,
        }
    }
}

/// Durable publish plus live role-filtered subscriptions.
pub struct MessageBus {
    pool: SqlitePool,
    fanout: broadcast::Sender<Message>,
    shutdown: CancellationToken,
}

impl MessageBus {
    /// Capacity of the live fan-out ring. Slow subscribers past this lag
    /// skip messages; the store remains the durable truth.
    const FANOUT_CAPACITY: usize = 1024;

    pub fn new(pool: SqlitePool) -> Self {
        let (fanout, _) = broadcast::channel(Self::FANOUT_CAPACITY);
        Self {
            pool,
            fanout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Persist a message, then fan it out to live subscribers.
    ///
    /// Rejects empty `from`/`to`. A duplicate id is absorbed: the stored
    /// message is returned and no second fan-out happens (at-least-once
    /// with dedup by id).
    pub async fn publish(&self, new: NewMessage) -> Result<Message> {
        let from_role = normalize_role(&new.from_role);
        let to_role = normalize_role(&new.to_role);
        if from_role.is_empty() {
            bail!("message from-role must not be empty");
        }
        if to_role.is_empty() {
            bail!("message to-role must not be empty");
        }

        let id = new
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let inserted = messages::insert_message(
            &self.pool,
            &NewMessageRow {
                id: &id,
                from_role: &from_role,
                to_role: &to_role,
                msg_type: new.msg_type,
                content: &new.content,
                artifacts: new.artifacts.as_ref(),
                metadata: new.metadata.as_ref(),
            },
        )
        .await?;

        match inserted {
            Some(message) => {
                // Best-effort live delivery; an error only means there are
                // no live subscribers right now.
                let _ = self.fanout.send(message.clone());
                Ok(message)
            }
            None => {
                debug!(id = %id, "duplicate message id absorbed");
                messages::get_message(&self.pool, &id)
                    .await?
                    .with_context(|| format!("duplicate message {id:?} vanished"))
            }
        }
    }

    /// Re-read path: messages visible to a role, optionally after `since`
    /// (exclusive), in persistence order.
    pub async fn get_for_role(
        &self,
        role: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        messages::get_for_role(&self.pool, &normalize_role(role), since).await
    }

    /// All persisted messages in order, optionally capped to the most
    /// recent `limit`.
    pub async fn get_all(&self, limit: Option<i64>) -> Result<Vec<Message>> {
        messages::get_all(&self.pool, limit).await
    }

    /// Live subscription.
    ///
    /// With `role = Some(r)` the stream yields a message iff `to == r`,
    /// `to == "all"`, or `from == r`; with `None` it yields everything.
    /// Only messages published after the subscription are delivered. The
    /// stream ends when the bus is closed; lagged receivers skip silently.
    pub fn subscribe(&self, role: Option<String>) -> Pin<Box<dyn Stream<Item = Message> + Send>> {
        let mut rx = self.fanout.subscribe();
        let shutdown = self.shutdown.clone();
        let filter_role = role.map(|r| normalize_role(&r));

        let stream = async_stream::stream! {
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => None,
                    received = rx.recv() => Some(received),
                };
                match received {
                    None => break,
                    Some(Ok(message)) => {
                        if matches_filter(filter_role.as_deref(), &message) {
                            yield message;
                        }
                    }
                    Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        debug!(skipped, "subscriber lagged, messages skipped");
                    }
                    Some(Err(broadcast::error::RecvError::Closed)) => break,
                }
            }
        };

        Box::pin(stream)
    }

    /// Close the bus: every live subscription ends. Messages still sitting
    /// in a subscriber's ring are dropped; the store keeps the durable
    /// copy.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// The live filter rule: to-match, broadcast, or from-match.
fn matches_filter(role: Option<&str>, message: &Message) -> bool {
    match role {
        None => true,
        Some(role) => {
            message.to_role == role || message.to_role == BROADCAST_ROLE || message.from_role == role
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str, to: &str) -> Message {
        Message {
            id: "m".to_string(),
            from_role: from.to_string(),
            to_role: to.to_string(),
            msg_type: MessageType::Info,
            created_at: Utc::now(),
            content: "x".to_string(),
            artifacts: None,
            metadata: None,
        }
    }

    #[test]
    fn filter_matches_to_role() {
        assert!(matches_filter(Some("a"), &message("s", "a")));
        assert!(!matches_filter(Some("b"), &message("s", "a")));
    }

    #[test]
    fn filter_matches_broadcast() {
        assert!(matches_filter(Some("a"), &message("s", "all")));
        assert!(matches_filter(Some("b"), &message("s", "all")));
    }

    #[test]
    fn filter_matches_from_role() {
        assert!(matches_filter(Some("s"), &message("s", "a")));
    }

    #[test]
    fn no_role_matches_everything() {
        assert!(matches_filter(None, &message("s", "a")));
        assert!(matches_filter(None, &message("x", "y")));
    }
}
