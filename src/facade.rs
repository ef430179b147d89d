// ============================================================================
// Engine Facade
// ============================================================================
//
// ConfDb bundles the process-scoped parts (module registry, dependency
// graph, datastores, subscriptions, adapters) into one explicit context
// object handed to every session. Nothing here is a global: independent
// engines can coexist in one process, which the test suite relies on.
//
// ============================================================================

use log::info;
use std::sync::Arc;
use std::time::Duration;

use crate::access::{AccessControl, AllowAll, Credential};
use crate::core::Result;
use crate::schema::{DependencyGraph, DependencyKind, Module, ModuleRegistry, PermissiveValidator, SchemaValidator};
use crate::session::{Session, SessionManager};
use crate::storage::{DatastoreKind, DatastoreSet, NullPersist, PersistAdapter};
use crate::subscription::{Notifier, Phase, SubscriptionId, SubscriptionRegistry};

/// Shared engine state. Constructed once by the builder; components receive
/// it by Arc instead of reaching for ambient globals.
pub struct Context {
    pub(crate) registry: ModuleRegistry,
    pub(crate) graph: DependencyGraph,
    pub(crate) datastores: DatastoreSet,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) validator: Arc<dyn SchemaValidator>,
    pub(crate) access: Arc<dyn AccessControl>,
    pub(crate) persist: Arc<dyn PersistAdapter>,
    pub(crate) sessions: SessionManager,
}

/// The configuration datastore engine.
///
/// # Examples
///
/// ```
/// use confdb::{ConfDb, Credential, DatastoreKind, Module};
///
/// # async fn demo() -> confdb::Result<()> {
/// let db = ConfDb::builder()
///     .module(Module::new("network", None))
///     .build()
///     .await?;
///
/// let mut session = db
///     .open_session(DatastoreKind::Running, Credential::new("admin"))
///     .await?;
/// session.set_item("/network:system/hostname", "router1".into()).await?;
/// # Ok(())
/// # }
/// ```
pub struct ConfDb {
    ctx: Arc<Context>,
}

impl ConfDb {
    pub fn builder() -> ConfDbBuilder {
        ConfDbBuilder::new()
    }

    /// Open an editing session bound to one datastore kind and credential.
    pub async fn open_session(&self, kind: DatastoreKind, credential: Credential) -> Result<Session> {
        Session::start(Arc::clone(&self.ctx), kind, credential).await
    }

    /// Register a subscriber for a module's commit notifications.
    pub async fn subscribe(
        &self,
        module: &str,
        phase: Phase,
        handle: Arc<dyn Notifier>,
    ) -> Result<SubscriptionId> {
        // subscribing to an unknown module is a caller bug, not a no-op
        self.ctx.registry.snapshot(module).await?;
        Ok(self.ctx.subscriptions.register(module, phase, handle).await)
    }

    pub async fn unsubscribe(&self, module: &str, id: SubscriptionId) {
        self.ctx.subscriptions.unregister(module, id).await;
    }

    /// Read a committed value without a session. Never blocks on an
    /// in-progress commit: the read sees either the pre- or post-commit
    /// snapshot.
    pub async fn get_committed(
        &self,
        kind: DatastoreKind,
        path: &str,
    ) -> Result<Option<crate::core::Value>> {
        let path = crate::core::Path::parse(path)?;
        let tree = self.ctx.datastores.snapshot(kind, path.module()).await;
        Ok(tree.get_value(&path).cloned())
    }

    /// Enable or disable an optional feature, bumping the module's schema
    /// version. Sessions opened before the bump fail their next commit
    /// touching the module with StaleSchema.
    pub async fn set_feature(&self, module: &str, feature: &str, enabled: bool) -> Result<u64> {
        let version = self.ctx.registry.set_feature(module, feature, enabled).await?;
        info!(
            "feature '{}' of module '{}' set to {} (schema version {})",
            feature, module, enabled, version
        );
        Ok(version)
    }

    /// Install a run-time deviation, bumping the module's schema version.
    pub async fn install_deviation(&self, module: &str, deviation: &str) -> Result<u64> {
        self.ctx.registry.install_deviation(module, deviation).await
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.ctx.registry
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.ctx.graph
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.ctx.sessions
    }

    /// Commit sequence number of a datastore kind (0 before any commit).
    pub fn commit_seq(&self, kind: DatastoreKind) -> u64 {
        self.ctx.datastores.get(kind).commit_seq()
    }
}

/// Builder assembling an engine from modules, dependency edges and adapter
/// implementations.
pub struct ConfDbBuilder {
    modules: Vec<Module>,
    edges: Vec<(String, String, DependencyKind)>,
    validator: Arc<dyn SchemaValidator>,
    access: Arc<dyn AccessControl>,
    persist: Arc<dyn PersistAdapter>,
    dispatch_timeout: Duration,
}

impl ConfDbBuilder {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            edges: Vec::new(),
            validator: Arc::new(PermissiveValidator),
            access: Arc::new(AllowAll),
            persist: Arc::new(NullPersist),
            dispatch_timeout: crate::subscription::DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn edge(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        kind: DependencyKind,
    ) -> Self {
        self.edges.push((source.into(), target.into(), kind));
        self
    }

    pub fn validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn access(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn persist(mut self, persist: Arc<dyn PersistAdapter>) -> Self {
        self.persist = persist;
        self
    }

    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Assemble the engine: verify the dependency graph, load the module
    /// registry and restore persisted startup/running state.
    ///
    /// # Errors
    /// `SchemaGraph` when the import/augment subgraph has a cycle or an edge
    /// references an unknown module; fatal, the engine does not start.
    pub async fn build(self) -> Result<ConfDb> {
        let mut graph = DependencyGraph::new();
        for module in &self.modules {
            graph.add_module(module.name());
        }
        for (source, target, kind) in self.edges {
            graph.add_edge(source, target, kind);
        }
        graph.check_acyclic()?;

        let registry = ModuleRegistry::new();
        let mut names = Vec::new();
        for module in self.modules {
            names.push(module.name().to_string());
            registry.load(module).await?;
        }

        let datastores = DatastoreSet::new();
        for name in &names {
            for kind in [DatastoreKind::Startup, DatastoreKind::Running] {
                if let Some(record) = self.persist.load(name, kind).await? {
                    info!(
                        "restored module '{}' ({}) at commit seq {}",
                        name, kind, record.commit_seq
                    );
                    datastores
                        .get(kind)
                        .install(name, record.tree, record.commit_seq)
                        .await;
                }
            }
        }

        info!("engine started with {} module(s)", names.len());
        Ok(ConfDb {
            ctx: Arc::new(Context {
                registry,
                graph,
                datastores,
                subscriptions: SubscriptionRegistry::with_timeout(self.dispatch_timeout),
                validator: self.validator,
                access: self.access,
                persist: self.persist,
                sessions: SessionManager::new(),
            }),
        })
    }
}

impl Default for ConfDbBuilder {
    fn default() -> Self {
        Self::new()
    }
}
