// ============================================================================
// Subscriber Notification Interface
// ============================================================================

use async_trait::async_trait;
use std::fmt;

use crate::storage::diff::ChangeSet;

/// Notification phase of the commit protocol.
///
/// Verify runs before anything is durable and may veto; apply runs after the
/// commit is decided and is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Verify,
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Verify => write!(f, "verify"),
            Phase::Apply => write!(f, "apply"),
        }
    }
}

/// Subscriber's answer to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Ack,
    /// Refuse the change. Only honored in the verify phase; during apply a
    /// veto is logged and ignored (the commit is already decided).
    Veto(String),
}

/// Handle onto an external subscriber. Implementations may perform I/O; the
/// registry bounds every call with a timeout.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, phase: Phase, module: &str, change_set: &ChangeSet) -> NotifyOutcome;
}
