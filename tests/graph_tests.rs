// ============================================================================
// Dependency Graph Integration Tests
// ============================================================================

use async_trait::async_trait;
use confdb::{
    ChangeSet, ConfDb, ConfError, Credential, DatastoreKind, DependencyKind, Module, Notifier,
    NotifyOutcome, Phase, Value,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Appends "<module>" to a shared trace on every verify call.
struct Tracer {
    trace: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Notifier for Tracer {
    async fn notify(&self, phase: Phase, module: &str, _: &ChangeSet) -> NotifyOutcome {
        if phase == Phase::Verify {
            self.trace.lock().await.push(module.to_string());
        }
        NotifyOutcome::Ack
    }
}

#[tokio::test]
async fn test_import_cycle_aborts_engine_start() {
    let result = ConfDb::builder()
        .module(Module::new("a", None))
        .module(Module::new("b", None))
        .module(Module::new("c", None))
        .edge("a", "b", DependencyKind::Import)
        .edge("b", "c", DependencyKind::Augment)
        .edge("c", "a", DependencyKind::Import)
        .build()
        .await;
    assert!(matches!(result, Err(ConfError::SchemaGraph(_))));
}

#[tokio::test]
async fn test_edge_to_unknown_module_aborts_engine_start() {
    let result = ConfDb::builder()
        .module(Module::new("a", None))
        .edge("a", "ghost", DependencyKind::Import)
        .build()
        .await;
    assert!(matches!(result, Err(ConfError::SchemaGraph(_))));
}

#[tokio::test]
async fn test_data_reference_cycles_are_tolerated() {
    let db = ConfDb::builder()
        .module(Module::new("a", None))
        .module(Module::new("b", None))
        .edge("a", "b", DependencyKind::DataRef)
        .edge("b", "a", DependencyKind::DataRef)
        .build()
        .await
        .unwrap();
    assert_eq!(db.modules().module_names().await, vec!["a", "b"]);
}

#[tokio::test]
async fn test_verify_dispatch_follows_import_order() {
    // routing imports interfaces: interfaces must be verified first
    let trace = Arc::new(Mutex::new(Vec::new()));
    let db = ConfDb::builder()
        .module(Module::new("interfaces", None))
        .module(Module::new("routing", None))
        .edge("routing", "interfaces", DependencyKind::Import)
        .build()
        .await
        .unwrap();
    for m in ["interfaces", "routing"] {
        db.subscribe(m, Phase::Verify, Arc::new(Tracer { trace: trace.clone() }))
            .await
            .unwrap();
    }

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/interfaces:eth0/mtu", Value::Int(1500)).await.unwrap();
    s.set_item("/routing:static/metric", Value::Int(10)).await.unwrap();
    s.commit().await.unwrap();

    assert_eq!(*trace.lock().await, vec!["interfaces", "routing"]);
}

#[tokio::test]
async fn test_data_references_widen_the_verify_set() {
    // routing data references interfaces data; a change to interfaces
    // alone must still give routing's verify subscriber its say
    let trace = Arc::new(Mutex::new(Vec::new()));
    let db = ConfDb::builder()
        .module(Module::new("interfaces", None))
        .module(Module::new("routing", None))
        .edge("routing", "interfaces", DependencyKind::DataRef)
        .build()
        .await
        .unwrap();
    db.subscribe(
        "interfaces",
        Phase::Verify,
        Arc::new(Tracer { trace: trace.clone() }),
    )
    .await
    .unwrap();
    db.subscribe(
        "routing",
        Phase::Verify,
        Arc::new(Tracer { trace: trace.clone() }),
    )
    .await
    .unwrap();

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/interfaces:eth0/mtu", Value::Int(9000)).await.unwrap();
    s.commit().await.unwrap();

    let seen = trace.lock().await;
    assert!(seen.contains(&"interfaces".to_string()));
    assert!(seen.contains(&"routing".to_string()));
}

/// Vetoes until the referenced target exists.
struct RefGuard {
    satisfied: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl Notifier for RefGuard {
    async fn notify(&self, phase: Phase, _: &str, _: &ChangeSet) -> NotifyOutcome {
        if phase == Phase::Verify && !self.satisfied.load(std::sync::atomic::Ordering::SeqCst) {
            return NotifyOutcome::Veto("referenced interface does not exist".into());
        }
        NotifyOutcome::Ack
    }
}

#[tokio::test]
async fn test_cross_module_reference_vetoes_until_target_exists() {
    let db = ConfDb::builder()
        .module(Module::new("interfaces", None))
        .module(Module::new("routing", None))
        .edge("routing", "interfaces", DependencyKind::DataRef)
        .build()
        .await
        .unwrap();

    let guard = Arc::new(RefGuard {
        satisfied: std::sync::atomic::AtomicBool::new(false),
    });
    db.subscribe("interfaces", Phase::Verify, guard.clone()).await.unwrap();
    db.subscribe("routing", Phase::Verify, Arc::new(Tracer { trace: Arc::new(Mutex::new(Vec::new())) }))
        .await
        .unwrap();

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/routing:static/next-hop-if", "eth0".into()).await.unwrap();

    // the interfaces guard sits in the widened verify set and vetoes
    let err = s.commit().await.unwrap_err();
    assert!(matches!(err, ConfError::VerifyVeto { ref module, .. } if module == "interfaces"));
    assert_eq!(db.commit_seq(DatastoreKind::Running), 0);

    // once the referenced entry exists the same session commits cleanly
    guard.satisfied.store(true, std::sync::atomic::Ordering::SeqCst);
    s.create_list_entry("/interfaces:ifaces/iface[name='eth0']").await.unwrap();
    s.commit().await.unwrap();
    assert_eq!(db.commit_seq(DatastoreKind::Running), 1);
}

#[tokio::test]
async fn test_unrelated_modules_stay_out_of_the_commit() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let db = ConfDb::builder()
        .module(Module::new("net", None))
        .module(Module::new("island", None))
        .build()
        .await
        .unwrap();
    for m in ["net", "island"] {
        db.subscribe(m, Phase::Verify, Arc::new(Tracer { trace: trace.clone() }))
            .await
            .unwrap();
    }

    let mut s = db
        .open_session(DatastoreKind::Running, Credential::new("admin"))
        .await
        .unwrap();
    s.set_item("/net:x", Value::Int(1)).await.unwrap();
    s.commit().await.unwrap();

    assert_eq!(*trace.lock().await, vec!["net"]);
}
