// ============================================================================
// Commit Stages
// ============================================================================

use serde::{Deserialize, Serialize};

/// Stages of the commit pipeline, in execution order.
///
/// A failing commit records the stage it reached. Failures up to and
/// including `Verifying` leave the datastore untouched; once `Applying`
/// has begun the swap already happened and later failures are surfaced
/// without rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStage {
    Collecting,
    Validating,
    Verifying,
    Applying,
    Persisting,
    Committed,
}

impl CommitStage {
    /// True for stages where the datastore swap has not yet happened, so a
    /// failure leaves committed state untouched.
    pub fn pre_apply(&self) -> bool {
        matches!(
            self,
            CommitStage::Collecting | CommitStage::Validating | CommitStage::Verifying
        )
    }
}

impl std::fmt::Display for CommitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommitStage::Collecting => "collecting",
            CommitStage::Validating => "validating",
            CommitStage::Verifying => "verifying",
            CommitStage::Applying => "applying",
            CommitStage::Persisting => "persisting",
            CommitStage::Committed => "committed",
        };
        write!(f, "{name}")
    }
}
