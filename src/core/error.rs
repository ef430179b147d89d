use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfError {
    /// Cycle in the import/augment subgraph. Fatal, raised at load time only.
    #[error("Schema graph error: {0}")]
    SchemaGraph(String),

    #[error("Module '{0}' is not loaded")]
    ModuleNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Validation failed in module '{module}' at '{path}': {reason}")]
    Validation {
        module: String,
        path: String,
        reason: String,
    },

    /// The module's schema changed (feature toggle or deviation) after the
    /// session captured its version stamp.
    #[error("Stale schema for module '{module}': session saw version {seen}, current is {current}")]
    StaleSchema {
        module: String,
        seen: u64,
        current: u64,
    },

    #[error("Module '{0}' has no active subscriptions")]
    NoSubscriber(String),

    #[error("Commit vetoed by verify subscriber for module '{module}': {reason}")]
    VerifyVeto { module: String, reason: String },

    #[error("Subscriber '{subscriber}' for module '{module}' timed out after {timeout_ms} ms")]
    SubscriberTimeout {
        module: String,
        subscriber: String,
        timeout_ms: u64,
    },

    #[error("Access denied for module '{module}' at '{path}'")]
    AccessDenied { module: String, path: String },

    /// Persistence failure. When raised after the apply phase has run, the
    /// datastore is NOT rolled back (subscribers already observed the change)
    /// and the error requires an explicit reconciliation pass.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Execution error: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, ConfError>;

impl ConfError {
    /// Whether the session survives this error and the caller may retry
    /// after fixing state (commit-time and per-edit errors).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfError::InvalidPath(_)
                | ConfError::SchemaViolation(_)
                | ConfError::Validation { .. }
                | ConfError::StaleSchema { .. }
                | ConfError::NoSubscriber(_)
                | ConfError::VerifyVeto { .. }
                | ConfError::SubscriberTimeout { .. }
        )
    }

    /// Whether the error leaves the process in a state requiring manual
    /// intervention (load-time graph cycles, post-apply persistence loss).
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConfError::SchemaGraph(_) | ConfError::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ConfError::NoSubscriber("m".into()).is_recoverable());
        assert!(ConfError::VerifyVeto {
            module: "m".into(),
            reason: "nope".into()
        }
        .is_recoverable());
        assert!(!ConfError::SchemaGraph("cycle".into()).is_recoverable());
        assert!(!ConfError::AccessDenied {
            module: "m".into(),
            path: "/m:x".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ConfError::SchemaGraph("cycle".into()).is_fatal());
        assert!(ConfError::Persistence("disk gone".into()).is_fatal());
        assert!(!ConfError::InvalidPath("bad".into()).is_fatal());
    }
}
