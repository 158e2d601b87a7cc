//! The agent status transition graph.
//!
//! ```text
//! pending   -> queued
//! queued    -> spawning
//! spawning  -> running | failed
//! running   -> completed | failed | timed_out | paused
//! paused    -> queued
//! timed_out -> queued (retry; increments retry_count) | escalated
//! ```
//!
//! `completed`, `failed`, and `escalated` are terminal for the current
//! retry count.

use foreman_db::models::AgentStatus;

/// Check whether `from -> to` is a valid edge in the status graph.
pub fn is_valid_transition(from: AgentStatus, to: AgentStatus) -> bool {
    use AgentStatus::*;
    matches!(
        (from, to),
        (Pending, Queued)
            | (Queued, Spawning)
            | (Spawning, Running)
            | (Spawning, Failed)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, TimedOut)
            | (Running, Paused)
            | (Paused, Queued)
            | (TimedOut, Queued)
            | (TimedOut, Escalated)
    )
}
