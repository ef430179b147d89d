// ============================================================================
// Commit Pipeline Integration Tests
// ============================================================================

use async_trait::async_trait;
use confdb::{
    ChangeKind, ChangeSet, CommitStage, ConfDb, ConfError, Credential, DatastoreKind,
    FeatureGate, FeatureGatedValidator, FilePersist, MemoryPersist, Module, Notifier,
    NotifyOutcome, Path, PersistAdapter, PersistedRecord, Phase, Tree, Value,
};
use std::sync::Arc;
use tokio::sync::Mutex;

struct Acker;

#[async_trait]
impl Notifier for Acker {
    async fn notify(&self, _: Phase, _: &str, _: &ChangeSet) -> NotifyOutcome {
        NotifyOutcome::Ack
    }
}

/// Records every change set it is handed.
struct Recorder {
    seen: Mutex<Vec<(Phase, ChangeSet)>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, phase: Phase, _: &str, cs: &ChangeSet) -> NotifyOutcome {
        self.seen.lock().await.push((phase, cs.clone()));
        NotifyOutcome::Ack
    }
}

struct Vetoer;

#[async_trait]
impl Notifier for Vetoer {
    async fn notify(&self, _: Phase, _: &str, _: &ChangeSet) -> NotifyOutcome {
        NotifyOutcome::Veto("not now".into())
    }
}

/// Delegates to an in-memory adapter but refuses every startup store.
struct StartupFailPersist {
    inner: MemoryPersist,
}

#[async_trait]
impl PersistAdapter for StartupFailPersist {
    async fn load(
        &self,
        module: &str,
        kind: DatastoreKind,
    ) -> confdb::Result<Option<PersistedRecord>> {
        self.inner.load(module, kind).await
    }

    async fn store(
        &self,
        module: &str,
        kind: DatastoreKind,
        tree: &Tree,
        seq: u64,
    ) -> confdb::Result<()> {
        if kind == DatastoreKind::Startup {
            return Err(ConfError::Persistence("startup volume offline".into()));
        }
        self.inner.store(module, kind, tree, seq).await
    }
}

async fn engine() -> ConfDb {
    ConfDb::builder()
        .module(Module::new("net", None))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_successful_commit_publishes_and_reports() {
    let db = engine().await;
    db.subscribe("net", Phase::Verify, Arc::new(Acker)).await.unwrap();

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/net:system/hostname", "r1".into()).await.unwrap();
    s.set_item("/net:system/mtu", Value::Int(1500)).await.unwrap();

    let report = s.commit().await.unwrap();
    assert_eq!(report.stage, CommitStage::Committed);
    assert_eq!(report.seq, 1);
    assert_eq!(report.modules, vec!["net".to_string()]);
    assert!(report.change_count >= 2);

    // the session is clean and reusable after a successful commit
    assert!(!s.has_changes());
    assert_eq!(s.last_failed_stage(), None);

    assert_eq!(
        db.get_committed(DatastoreKind::Running, "/net:system/hostname")
            .await
            .unwrap(),
        Some(Value::String("r1".into()))
    );
}

#[tokio::test]
async fn test_empty_commit_is_a_noop() {
    let db = engine().await;
    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();

    // no edits at all
    let report = s.commit().await.unwrap();
    assert_eq!(report.seq, 0);
    assert!(report.modules.is_empty());

    // edits that cancel out diff to nothing: no subscribers needed either
    s.set_item("/net:x", Value::Int(1)).await.unwrap();
    s.delete_item("/net:x").await.unwrap();
    let report = s.commit().await.unwrap();
    assert_eq!(report.seq, 0);
    assert_eq!(db.commit_seq(DatastoreKind::Running), 0);
}

#[tokio::test]
async fn test_change_sets_come_from_diff_not_the_edit_log() {
    let db = engine().await;
    let recorder = Recorder::new();
    db.subscribe("net", Phase::Verify, recorder.clone()).await.unwrap();

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    // three edits, net effect is a single created leaf
    s.set_item("/net:x", Value::Int(1)).await.unwrap();
    s.set_item("/net:x", Value::Int(2)).await.unwrap();
    s.set_item("/net:y", Value::Int(3)).await.unwrap();
    s.delete_item("/net:y").await.unwrap();
    s.commit().await.unwrap();

    let seen = recorder.seen.lock().await;
    assert_eq!(seen.len(), 1);
    let (_, cs) = &seen[0];
    let created: Vec<String> = cs
        .entries
        .iter()
        .filter(|e| e.kind == ChangeKind::Created)
        .map(|e| e.path.to_string())
        .collect();
    assert_eq!(created, vec!["/net:x"]);
    assert!(cs.entries.iter().all(|e| e.path.to_string() != "/net:y"));
}

#[tokio::test]
async fn test_veto_rolls_back_completely_and_allows_retry() {
    let db = engine().await;
    let veto_id = db.subscribe("net", Phase::Verify, Arc::new(Vetoer)).await.unwrap();

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/net:system/hostname", "r1".into()).await.unwrap();

    assert!(s.commit().await.is_err());
    assert_eq!(s.last_failed_stage(), Some(CommitStage::Verifying));
    // datastore untouched, session state intact
    assert_eq!(db.commit_seq(DatastoreKind::Running), 0);
    assert_eq!(
        s.get_item("/net:system/hostname").await.unwrap(),
        Some(Value::String("r1".into()))
    );

    // replace the vetoing subscriber and retry the same session
    db.unsubscribe("net", veto_id).await;
    db.subscribe("net", Phase::Verify, Arc::new(Acker)).await.unwrap();
    let report = s.commit().await.unwrap();
    assert_eq!(report.seq, 1);
    assert_eq!(s.last_failed_stage(), None);
}

#[tokio::test]
async fn test_schema_change_stales_open_sessions() {
    let db = ConfDb::builder()
        .module({
            let mut m = Module::new("net", None);
            m.declare_feature("vlan", false);
            m
        })
        .build()
        .await
        .unwrap();

    let mut s = db
        .open_session(DatastoreKind::Candidate, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/net:x", Value::Int(1)).await.unwrap();

    // schema changes under the open session's feet
    db.set_feature("net", "vlan", true).await.unwrap();

    let err = s.commit().await.unwrap_err();
    assert!(
        matches!(err, ConfError::StaleSchema { seen: 0, current: 1, .. }),
        "got {err:?}"
    );
    assert_eq!(s.last_failed_stage(), Some(CommitStage::Validating));

    // a fresh working copy picks up the new schema version
    s.discard_all();
    s.set_item("/net:x", Value::Int(1)).await.unwrap();
    s.commit().await.unwrap();
}

#[tokio::test]
async fn test_feature_gated_data_is_rejected_until_enabled() {
    let validator = FeatureGatedValidator::new(vec![FeatureGate {
        module: "net".into(),
        path: Path::parse("/net:vlans").unwrap(),
        feature: "vlan".into(),
    }]);
    let db = ConfDb::builder()
        .module({
            let mut m = Module::new("net", None);
            m.declare_feature("vlan", false);
            m
        })
        .validator(Arc::new(validator))
        .build()
        .await
        .unwrap();

    let mut s = db
        .open_session(DatastoreKind::Candidate, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/net:vlans/default-id", Value::Int(1)).await.unwrap();

    let err = s.commit().await.unwrap_err();
    assert!(
        matches!(err, ConfError::Validation { ref path, .. } if path.starts_with("/net:vlans")),
        "got {err:?}"
    );
    assert_eq!(s.last_failed_stage(), Some(CommitStage::Validating));

    db.set_feature("net", "vlan", true).await.unwrap();

    // the old working copy is now stale; a fresh one commits cleanly
    assert!(matches!(
        s.commit().await.unwrap_err(),
        ConfError::StaleSchema { .. }
    ));
    let mut s2 = db
        .open_session(DatastoreKind::Candidate, Credential::new("admin"))
        .await
        .unwrap();
    s2.set_item("/net:vlans/default-id", Value::Int(1)).await.unwrap();
    s2.commit().await.unwrap();
}

#[tokio::test]
async fn test_persist_failure_after_apply_is_reported_not_rolled_back() {
    let persist = Arc::new(MemoryPersist::new());
    let db = ConfDb::builder()
        .module(Module::new("net", None))
        .persist(persist.clone())
        .build()
        .await
        .unwrap();
    db.subscribe("net", Phase::Verify, Arc::new(Acker)).await.unwrap();

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/net:system/hostname", "r1".into()).await.unwrap();

    persist.fail_next_store();
    let err = s.commit().await.unwrap_err();
    assert!(matches!(err, ConfError::Persistence(_)));
    assert_eq!(s.last_failed_stage(), Some(CommitStage::Persisting));

    // the in-memory commit still took effect
    assert_eq!(db.commit_seq(DatastoreKind::Running), 1);
    assert_eq!(
        db.get_committed(DatastoreKind::Running, "/net:system/hostname")
            .await
            .unwrap(),
        Some(Value::String("r1".into()))
    );
    assert_eq!(persist.record_count().await, 0);
}

#[tokio::test]
async fn test_permanent_commit_writes_through_to_startup() {
    let persist = Arc::new(MemoryPersist::new());
    let db = ConfDb::builder()
        .module(Module::new("net", None))
        .persist(persist.clone())
        .build()
        .await
        .unwrap();
    db.subscribe("net", Phase::Verify, Arc::new(Acker)).await.unwrap();

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/net:system/hostname", "r1".into()).await.unwrap();
    s.commit_permanent().await.unwrap();

    assert_eq!(db.commit_seq(DatastoreKind::Running), 1);
    assert_eq!(db.commit_seq(DatastoreKind::Startup), 1);
    assert_eq!(
        db.get_committed(DatastoreKind::Startup, "/net:system/hostname")
            .await
            .unwrap(),
        Some(Value::String("r1".into()))
    );
    // one record per datastore kind
    assert_eq!(persist.record_count().await, 2);
}

#[tokio::test]
async fn test_startup_write_through_failure_still_clears_the_session() {
    let persist = Arc::new(StartupFailPersist {
        inner: MemoryPersist::new(),
    });
    let db = ConfDb::builder()
        .module(Module::new("net", None))
        .persist(persist.clone())
        .build()
        .await
        .unwrap();
    db.subscribe("net", Phase::Verify, Arc::new(Acker)).await.unwrap();

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/net:system/hostname", "r1".into()).await.unwrap();

    let err = s.commit_permanent().await.unwrap_err();
    assert!(matches!(err, ConfError::Persistence(_)));
    assert_eq!(s.last_failed_stage(), Some(CommitStage::Persisting));

    // the running commit took effect and the session is clean for new work
    assert_eq!(db.commit_seq(DatastoreKind::Running), 1);
    assert!(!s.has_changes());
    // only the running record reached durable storage
    assert_eq!(persist.inner.record_count().await, 1);

    // a later retry finds nothing left to commit
    let report = s.commit().await.unwrap();
    assert!(report.modules.is_empty());
}

#[tokio::test]
async fn test_restart_restores_persisted_state() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = ConfDb::builder()
            .module(Module::new("net", None))
            .persist(Arc::new(FilePersist::new(dir.path())))
            .build()
            .await
            .unwrap();
        db.subscribe("net", Phase::Verify, Arc::new(Acker)).await.unwrap();

        let mut s = db
            .open_session(DatastoreKind::Running, Credential::new("admin"))
            .await
            .unwrap();
        s.set_item("/net:system/hostname", "r1".into()).await.unwrap();
        s.create_list_entry("/net:ifaces/iface[name='eth0']").await.unwrap();
        s.commit_permanent().await.unwrap();
    }

    // second engine over the same directory comes up with the state
    let db = ConfDb::builder()
        .module(Module::new("net", None))
        .persist(Arc::new(FilePersist::new(dir.path())))
        .build()
        .await
        .unwrap();

    assert_eq!(db.commit_seq(DatastoreKind::Running), 1);
    assert_eq!(
        db.get_committed(DatastoreKind::Running, "/net:system/hostname")
            .await
            .unwrap(),
        Some(Value::String("r1".into()))
    );
    assert_eq!(
        db.get_committed(DatastoreKind::Startup, "/net:ifaces/iface[name='eth0']/name")
            .await
            .unwrap(),
        Some(Value::String("eth0".into()))
    );
}

#[tokio::test]
async fn test_candidate_commit_then_running_are_independent_sequences() {
    let db = engine().await;
    db.subscribe("net", Phase::Verify, Arc::new(Acker)).await.unwrap();

    let mut cand = db
        .open_session(DatastoreKind::Candidate, Credential::new("admin"))
        .await
        .unwrap();
    cand.set_item("/net:x", Value::Int(1)).await.unwrap();
    cand.commit().await.unwrap();

    let mut run = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    run.set_item("/net:x", Value::Int(2)).await.unwrap();
    run.commit().await.unwrap();

    assert_eq!(db.commit_seq(DatastoreKind::Candidate), 1);
    assert_eq!(db.commit_seq(DatastoreKind::Running), 1);
    assert_eq!(
        db.get_committed(DatastoreKind::Candidate, "/net:x").await.unwrap(),
        Some(Value::Int(1))
    );
    assert_eq!(
        db.get_committed(DatastoreKind::Running, "/net:x").await.unwrap(),
        Some(Value::Int(2))
    );
}
