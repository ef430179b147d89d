// ============================================================================
// Session Manager
// ============================================================================
//
// Tracks open sessions for diagnostics and enforces the explicit
// start/stop lifecycle. Uses a std RwLock (short, non-async critical
// sections) so a dropped session can still unregister itself.
//
// ============================================================================

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::session::session::SessionId;
use crate::storage::DatastoreKind;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: DatastoreKind,
    pub user: String,
    pub started_at: DateTime<Utc>,
}

pub struct SessionManager {
    active: RwLock<HashMap<SessionId, SessionInfo>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, info: SessionInfo) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.insert(info.id, info);
    }

    pub(crate) fn unregister(&self, id: SessionId) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.remove(&id);
    }

    pub fn active_count(&self) -> usize {
        self.active.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Open sessions ordered by start time.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        infos.sort_by_key(|i| i.started_at);
        infos
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
