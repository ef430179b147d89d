// ============================================================================
// Editing Session
// ============================================================================
//
// A session is bound to one datastore kind and one credential. The first
// edit against a module copies that module's committed tree into the
// session (copy-on-first-access); all edits then mutate the private copy
// and append to the change log. Nothing a session does is visible to other
// sessions or readers until its commit pipeline publishes.
//
// Sessions survive failed commits: the working trees and change log stay
// intact so the caller can inspect, fix and retry.
//
// ============================================================================

use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::{AccessOp, Credential};
use crate::commit::{pipeline, CommitOptions, CommitReport, CommitStage};
use crate::core::{ConfError, Path, Result, Value};
use crate::facade::Context;
use crate::session::change::ChangeOp;
use crate::session::manager::SessionInfo;
use crate::storage::diff::{diff, ChangeKind, ChangeSet};
use crate::storage::merge::{merge_into, MergePolicy};
use crate::storage::tree::{MovePosition, SetOutcome, Tree};
use crate::storage::DatastoreKind;

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

pub struct Session {
    id: SessionId,
    kind: DatastoreKind,
    credential: Credential,
    ctx: Arc<Context>,
    closed: bool,
    /// Private working copies, one per touched module.
    working: HashMap<String, Tree>,
    /// The committed snapshots the working copies were taken from.
    baselines: HashMap<String, Arc<Tree>>,
    change_log: Vec<ChangeOp>,
    /// Schema versions captured at first touch, checked at commit time.
    schema_versions: HashMap<String, u64>,
    last_failed_stage: Option<CommitStage>,
    started_at: DateTime<Utc>,
}

impl Session {
    pub(crate) async fn start(
        ctx: Arc<Context>,
        kind: DatastoreKind,
        credential: Credential,
    ) -> Result<Self> {
        let id = SessionId::new();
        let started_at = Utc::now();
        ctx.sessions.register(SessionInfo {
            id,
            kind,
            user: credential.user().to_string(),
            started_at,
        });
        debug!("{} started on {} by '{}'", id, kind, credential.user());
        Ok(Self {
            id,
            kind,
            credential,
            ctx,
            closed: false,
            working: HashMap::new(),
            baselines: HashMap::new(),
            change_log: Vec::new(),
            schema_versions: HashMap::new(),
            last_failed_stage: None,
            started_at,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> DatastoreKind {
        self.kind
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn change_log(&self) -> &[ChangeOp] {
        &self.change_log
    }

    pub fn has_changes(&self) -> bool {
        !self.change_log.is_empty()
    }

    /// Stage at which the most recent commit attempt failed, if any.
    pub fn last_failed_stage(&self) -> Option<CommitStage> {
        self.last_failed_stage
    }

    fn ensure_active(&self) -> Result<()> {
        if self.closed {
            return Err(ConfError::SessionClosed);
        }
        Ok(())
    }

    async fn authorize(&self, path: &Path, op: AccessOp) -> Result<()> {
        if self
            .ctx
            .access
            .authorize(&self.credential, path.module(), path, op)
            .await
        {
            Ok(())
        } else {
            Err(ConfError::AccessDenied {
                module: path.module().to_string(),
                path: path.to_string(),
            })
        }
    }

    /// Copy-on-first-access of the module's committed tree.
    async fn ensure_module(&mut self, module: &str) -> Result<()> {
        if self.working.contains_key(module) {
            return Ok(());
        }
        let schema_version = self.ctx.registry.schema_version(module).await?;
        let baseline = self.ctx.datastores.snapshot(self.kind, module).await;
        self.working.insert(module.to_string(), (*baseline).clone());
        self.baselines.insert(module.to_string(), baseline);
        self.schema_versions.insert(module.to_string(), schema_version);
        Ok(())
    }

    async fn working_mut(&mut self, module: &str) -> Result<&mut Tree> {
        self.ensure_module(module).await?;
        self.working
            .get_mut(module)
            .ok_or_else(|| ConfError::Execution(format!("no working copy for module '{module}'")))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Leaf value at `path`: from the working copy when the module was
    /// touched, otherwise from the committed snapshot.
    pub async fn get_item(&self, path: &str) -> Result<Option<Value>> {
        self.ensure_active()?;
        let path = Path::parse(path)?;
        self.authorize(&path, AccessOp::Read).await?;
        if let Some(tree) = self.working.get(path.module()) {
            return Ok(tree.get_value(&path).cloned());
        }
        let tree = self.ctx.datastores.snapshot(self.kind, path.module()).await;
        Ok(tree.get_value(&path).cloned())
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.ensure_active()?;
        let path = Path::parse(path)?;
        self.authorize(&path, AccessOp::Read).await?;
        if let Some(tree) = self.working.get(path.module()) {
            return Ok(tree.exists(&path));
        }
        let tree = self.ctx.datastores.snapshot(self.kind, path.module()).await;
        Ok(tree.exists(&path))
    }

    // ------------------------------------------------------------------
    // Edits (each call is atomic: no partial mutation on error)
    // ------------------------------------------------------------------

    pub async fn set_item(&mut self, path: &str, value: Value) -> Result<()> {
        self.ensure_active()?;
        let path = Path::parse(path)?;
        self.authorize(&path, AccessOp::Write).await?;
        let module = path.module().to_string();
        let tree = self.working_mut(&module).await?;
        match tree.set_leaf(&path, value.clone())? {
            SetOutcome::Unchanged => {}
            _ => self.change_log.push(ChangeOp::SetValue { path, value }),
        }
        Ok(())
    }

    pub async fn delete_item(&mut self, path: &str) -> Result<()> {
        self.ensure_active()?;
        let path = Path::parse(path)?;
        self.authorize(&path, AccessOp::Delete).await?;
        let module = path.module().to_string();
        let tree = self.working_mut(&module).await?;
        let old = tree.delete_subtree(&path)?;
        self.change_log.push(ChangeOp::DeleteSubtree { path, old });
        Ok(())
    }

    pub async fn create_list_entry(&mut self, path: &str) -> Result<()> {
        self.ensure_active()?;
        let path = Path::parse(path)?;
        self.authorize(&path, AccessOp::Write).await?;
        let module = path.module().to_string();
        let tree = self.working_mut(&module).await?;
        tree.create_list_entry(&path)?;
        self.change_log.push(ChangeOp::CreateListEntry { path });
        Ok(())
    }

    pub async fn move_list_entry(&mut self, path: &str, position: MovePosition) -> Result<()> {
        self.ensure_active()?;
        let path = Path::parse(path)?;
        self.authorize(&path, AccessOp::Write).await?;
        let module = path.module().to_string();
        let tree = self.working_mut(&module).await?;
        tree.move_list_entry(&path, &position)?;
        self.change_log.push(ChangeOp::MoveListEntry { path, position });
        Ok(())
    }

    /// Merge an externally supplied tree (e.g. an import) into the working
    /// copy of its module. Every node of the incoming tree is authorized
    /// for writing before anything is merged.
    pub async fn merge(&mut self, incoming: &Tree, policy: MergePolicy) -> Result<()> {
        self.ensure_active()?;
        for (path, _) in incoming.visit() {
            self.authorize(&path, AccessOp::Write).await?;
        }
        let module = incoming.module().to_string();
        let tree = self.working_mut(&module).await?;
        let before = tree.clone();
        merge_into(tree, incoming, policy)?;
        // log the merge as the ops an equivalent edit sequence would produce
        for entry in diff(&before, tree).entries {
            match entry.kind {
                ChangeKind::Created if !entry.path.last().keys.is_empty() => {
                    self.change_log.push(ChangeOp::CreateListEntry { path: entry.path });
                }
                ChangeKind::Created | ChangeKind::Modified => {
                    // created containers carry no value and need no op of
                    // their own
                    if let Some(value) = entry.new {
                        self.change_log.push(ChangeOp::SetValue {
                            path: entry.path,
                            value,
                        });
                    }
                }
                ChangeKind::Deleted => {
                    self.change_log.push(ChangeOp::DeleteSubtree {
                        path: entry.path,
                        old: entry.old,
                    });
                }
                ChangeKind::Moved => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection and lifecycle
    // ------------------------------------------------------------------

    /// JSON export of the module as this session sees it (working copy if
    /// touched, committed snapshot otherwise).
    pub async fn export_json(&self, module: &str) -> Result<serde_json::Value> {
        self.ensure_active()?;
        if !self.ctx.registry.contains(module).await {
            return Err(ConfError::ModuleNotFound(module.to_string()));
        }
        if let Some(tree) = self.working.get(module) {
            return Ok(tree.to_json());
        }
        Ok(self.ctx.datastores.snapshot(self.kind, module).await.to_json())
    }

    /// Structural diff of the module's working copy against its baseline.
    pub async fn diff(&self, module: &str) -> Result<ChangeSet> {
        self.ensure_active()?;
        match (self.working.get(module), self.baselines.get(module)) {
            (Some(work), Some(base)) => Ok(diff(base, work)),
            _ => Ok(ChangeSet::empty(module)),
        }
    }

    /// Drop working copies whose diff came out empty, so subsequent reads
    /// see the latest committed state. Modules with pending changes keep
    /// their copies and baselines (snapshot isolation until commit).
    pub async fn refresh(&mut self) -> Result<()> {
        self.ensure_active()?;
        let mut unchanged = Vec::new();
        for (module, work) in &self.working {
            if let Some(base) = self.baselines.get(module) {
                if diff(base, work).is_empty() {
                    unchanged.push(module.clone());
                }
            }
        }
        for module in unchanged {
            self.drop_module(&module);
        }
        Ok(())
    }

    /// Discard the working copy and pending changes of one module.
    pub fn discard(&mut self, module: &str) {
        self.drop_module(module);
        self.change_log.retain(|op| op.module() != module);
    }

    /// Discard all uncommitted state, keeping the session open.
    pub fn discard_all(&mut self) {
        self.working.clear();
        self.baselines.clear();
        self.schema_versions.clear();
        self.change_log.clear();
    }

    fn drop_module(&mut self, module: &str) {
        self.working.remove(module);
        self.baselines.remove(module);
        self.schema_versions.remove(module);
    }

    /// Stop the session, discarding uncommitted state.
    pub fn stop(mut self) {
        self.closed = true;
        self.ctx.sessions.unregister(self.id);
        debug!("{} stopped", self.id);
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Run the multi-phase commit pipeline over this session's changes.
    pub async fn commit(&mut self) -> Result<CommitReport> {
        self.ensure_active()?;
        pipeline::run(self, CommitOptions::default()).await
    }

    /// Commit against running and write the result through to the startup
    /// datastore in the same call.
    pub async fn commit_permanent(&mut self) -> Result<CommitReport> {
        self.ensure_active()?;
        pipeline::run(self, CommitOptions { permanent: true }).await
    }

    // ------------------------------------------------------------------
    // Pipeline internals
    // ------------------------------------------------------------------

    pub(crate) fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Touched modules in stable order.
    pub(crate) fn touched_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.working.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn working_tree(&self, module: &str) -> Option<&Tree> {
        self.working.get(module)
    }

    pub(crate) fn baseline(&self, module: &str) -> Option<&Arc<Tree>> {
        self.baselines.get(module)
    }

    pub(crate) fn schema_version_seen(&self, module: &str) -> Option<u64> {
        self.schema_versions.get(module).copied()
    }

    pub(crate) fn record_failed_stage(&mut self, stage: CommitStage) {
        self.last_failed_stage = Some(stage);
    }

    /// Called by the pipeline once the commit is durable and published.
    pub(crate) fn finish_commit(&mut self) {
        self.working.clear();
        self.baselines.clear();
        self.schema_versions.clear();
        self.change_log.clear();
        self.last_failed_stage = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.ctx.sessions.unregister(self.id);
            debug!("{} dropped without explicit stop", self.id);
        }
    }
}
