//! Escalation notification routing.
//!
//! One concrete route is selected at construction from config; the timeout
//! handler holds the variant and never dispatches dynamically. Routing
//! beyond the console (email, chat webhooks) belongs to external
//! collaborators feeding off the escalation message and event.

use tracing::error;

use crate::config::NotificationChannel;

/// The selected notification route.
#[derive(Debug, Clone, Copy)]
pub enum Notifier {
    Console,
    Disabled,
}

impl Notifier {
    pub fn from_config(channel: NotificationChannel) -> Self {
        match channel {
            NotificationChannel::Console => Self::Console,
            NotificationChannel::Disabled => Self::Disabled,
        }
    }

    /// Deliver an escalation packet.
    pub fn escalation(&self, role: &str, report: &str) {
        match self {
            Self::Console => {
                error!(role = %role, "agent escalated\n{report}");
            }
            Self::Disabled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_maps_variants() {
        assert!(matches!(
            Notifier::from_config(NotificationChannel::Console),
            Notifier::Console
        ));
        assert!(matches!(
            Notifier::from_config(NotificationChannel::Disabled),
            Notifier::Disabled
        ));
    }

    #[test]
    fn disabled_notifier_is_a_no_op() {
        Notifier::Disabled.escalation("dev", "report");
    }
}
