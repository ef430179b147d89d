// ============================================================================
// Subscription Registry
// ============================================================================
//
// Maps module names to ordered verify/apply subscriber lists and performs
// phase dispatch for the commit pipeline. Dispatch order is registration
// order; the first verify veto (or timeout) short-circuits the rest of that
// module's verify list. Apply outcomes are advisory and only logged.
//
// ============================================================================

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::{ConfError, Result};
use crate::storage::diff::ChangeSet;
use crate::subscription::notifier::{Notifier, NotifyOutcome, Phase};

/// Handle returned by `register`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    phase: Phase,
    handle: Arc<dyn Notifier>,
}

pub struct SubscriptionRegistry {
    /// Per module, in registration order.
    subs: RwLock<HashMap<String, Vec<Subscription>>>,
    /// Per-handle dispatch deadline.
    timeout: Duration,
}

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            subs: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a subscriber for one (module, phase). Registering the same
    /// handle twice for the same pair is idempotent and returns the original
    /// id.
    pub async fn register(
        &self,
        module: &str,
        phase: Phase,
        handle: Arc<dyn Notifier>,
    ) -> SubscriptionId {
        let mut subs = self.subs.write().await;
        let list = subs.entry(module.to_string()).or_default();
        if let Some(existing) = list
            .iter()
            .find(|s| s.phase == phase && Arc::ptr_eq(&s.handle, &handle))
        {
            return existing.id;
        }
        let id = SubscriptionId::new();
        debug!("subscription {} registered for {} ({})", id, module, phase);
        list.push(Subscription { id, phase, handle });
        id
    }

    /// Remove a subscription. Unknown ids are a no-op, not an error.
    pub async fn unregister(&self, module: &str, id: SubscriptionId) {
        let mut subs = self.subs.write().await;
        if let Some(list) = subs.get_mut(module) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subs.remove(module);
            }
        }
    }

    /// True when the module has at least one subscription of any phase.
    pub async fn has_any(&self, module: &str) -> bool {
        self.subs
            .read()
            .await
            .get(module)
            .is_some_and(|l| !l.is_empty())
    }

    pub async fn has_phase(&self, module: &str, phase: Phase) -> bool {
        self.subs
            .read()
            .await
            .get(module)
            .is_some_and(|l| l.iter().any(|s| s.phase == phase))
    }

    /// Phases a commit must dispatch for a changed module: apply always,
    /// verify only when a verify subscriber is registered.
    pub async fn required_phases(&self, module: &str) -> Vec<Phase> {
        if self.has_phase(module, Phase::Verify).await {
            vec![Phase::Verify, Phase::Apply]
        } else {
            vec![Phase::Apply]
        }
    }

    /// Dispatch one phase for one module.
    ///
    /// # Errors
    /// Verify phase: `VerifyVeto` on the first veto, `SubscriberTimeout` on
    /// the first deadline overrun. The apply phase never fails; vetoes and
    /// timeouts there are logged and swallowed.
    pub async fn dispatch(&self, phase: Phase, module: &str, change_set: &ChangeSet) -> Result<()> {
        let handles: Vec<(SubscriptionId, Arc<dyn Notifier>)> = {
            let subs = self.subs.read().await;
            match subs.get(module) {
                Some(list) => list
                    .iter()
                    .filter(|s| s.phase == phase)
                    .map(|s| (s.id, Arc::clone(&s.handle)))
                    .collect(),
                None => Vec::new(),
            }
        };

        for (id, handle) in handles {
            let outcome = tokio::time::timeout(
                self.timeout,
                handle.notify(phase, module, change_set),
            )
            .await;

            match (phase, outcome) {
                (_, Ok(NotifyOutcome::Ack)) => {
                    debug!("subscriber {} acked {} for {}", id, phase, module);
                }
                (Phase::Verify, Ok(NotifyOutcome::Veto(reason))) => {
                    return Err(ConfError::VerifyVeto {
                        module: module.to_string(),
                        reason,
                    });
                }
                (Phase::Verify, Err(_)) => {
                    return Err(ConfError::SubscriberTimeout {
                        module: module.to_string(),
                        subscriber: id.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                (Phase::Apply, Ok(NotifyOutcome::Veto(reason))) => {
                    warn!(
                        "apply-phase veto from {} for {} ignored: {}",
                        id, module, reason
                    );
                }
                (Phase::Apply, Err(_)) => {
                    warn!(
                        "apply-phase subscriber {} for {} timed out after {:?}",
                        id, module, self.timeout
                    );
                }
            }
        }
        Ok(())
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
