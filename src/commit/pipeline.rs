// ============================================================================
// Commit Pipeline
// ============================================================================
//
// Turns a session's working trees into published datastore state:
//
//   Collecting:  diff working trees against their baselines
//   Validating:  stale-schema check, then schema validation of every
//                module in the required set
//   Verifying:   running only: subscriber presence check and verify
//                dispatch in dependency order; any veto aborts
//   Applying:    atomic Arc swap of the changed trees, then advisory
//                apply dispatch
//   Persisting:  durable store of the changed trees
//
// Everything from Validating through Persisting runs under the target
// datastore's commit mutex. A failure before Applying leaves the datastore
// untouched and the session's working state intact for retry. Once the
// swap has happened the commit is in effect; a persistence failure after
// that point is reported but not rolled back.
//
// ============================================================================

use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::commit::stage::CommitStage;
use crate::core::{ConfError, Result};
use crate::session::Session;
use crate::storage::diff::{diff, ChangeSet};
use crate::storage::tree::Tree;
use crate::storage::DatastoreKind;
use crate::subscription::Phase;

#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Write the committed result through to the startup datastore.
    pub permanent: bool,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub stage: CommitStage,
    /// Sequence number the commit published under; unchanged for an empty
    /// commit.
    pub seq: u64,
    /// Changed modules in dispatch order. Empty for an empty commit.
    pub modules: Vec<String>,
    pub change_count: usize,
}

/// Run the pipeline for one session.
pub async fn run(session: &mut Session, options: CommitOptions) -> Result<CommitReport> {
    let ctx = Arc::clone(session.ctx());
    let kind = session.kind();
    let datastore = ctx.datastores.get(kind);

    // Collecting: authoritative change sets come from structural diffs, not
    // the session's change log.
    let mut change_sets: HashMap<String, ChangeSet> = HashMap::new();
    for module in session.touched_modules() {
        let (Some(work), Some(base)) = (session.working_tree(&module), session.baseline(&module))
        else {
            continue;
        };
        let cs = diff(base, work);
        if !cs.is_empty() {
            change_sets.insert(module, cs);
        }
    }

    if change_sets.is_empty() {
        debug!("{}: empty commit, nothing to do", session.id());
        session.finish_commit();
        return Ok(CommitReport {
            stage: CommitStage::Committed,
            seq: datastore.commit_seq(),
            modules: Vec::new(),
            change_count: 0,
        });
    }

    let changed: BTreeSet<String> = change_sets.keys().cloned().collect();
    let required = ctx.graph.resolve_required_modules(&changed);
    let order = ctx.graph.commit_order(&required);

    // Validating..Persisting runs under the per-kind commit mutex.
    let _guard = datastore.lock_commit().await;

    if let Err(e) = validate(session, &ctx, kind, &order, &change_sets).await {
        session.record_failed_stage(CommitStage::Validating);
        return Err(e);
    }

    if kind.requires_subscribers() {
        if let Err(e) = verify(session, &ctx, &order, &change_sets).await {
            session.record_failed_stage(CommitStage::Verifying);
            return Err(e);
        }
    }

    // Applying: swap the changed trees in one write-locked publication.
    let seq = datastore.next_commit_seq();
    let mut new_trees: HashMap<String, Arc<Tree>> = HashMap::new();
    for module in change_sets.keys() {
        if let Some(work) = session.working_tree(module) {
            new_trees.insert(module.clone(), Arc::new(work.compacted()));
        }
    }
    datastore.publish(new_trees.clone(), seq).await;

    if kind.requires_subscribers() {
        for module in &order {
            if let Some(cs) = change_sets.get(module) {
                // apply outcomes are advisory; dispatch never fails here
                let _ = ctx.subscriptions.dispatch(Phase::Apply, module, cs).await;
            }
        }
    }

    // Persisting: the swap already happened, so a store failure is surfaced
    // without rollback. Candidate state is volatile.
    let mut persist_error = None;
    if kind != DatastoreKind::Candidate {
        for (module, tree) in &new_trees {
            if let Err(e) = ctx.persist.store(module, kind, tree, seq).await {
                warn!("persist failed for module '{}' after apply: {}", module, e);
                persist_error.get_or_insert(e);
            }
        }
    }

    let mut startup_seq = None;
    if options.permanent && kind == DatastoreKind::Running && persist_error.is_none() {
        match write_through_startup(&ctx, &new_trees).await {
            Ok(sseq) => startup_seq = Some(sseq),
            Err(e) => {
                warn!("startup write-through failed after apply: {}", e);
                persist_error = Some(e);
            }
        }
    }

    let changed_in_order: Vec<String> = order
        .iter()
        .filter(|m| change_sets.contains_key(*m))
        .cloned()
        .collect();
    let change_count = change_sets.values().map(|cs| cs.len()).sum();

    session.finish_commit();
    if let Some(e) = persist_error {
        session.record_failed_stage(CommitStage::Persisting);
        return Err(e);
    }

    info!(
        "{}: committed {} change(s) across {} module(s) to {} (seq {})",
        session.id(),
        change_count,
        changed_in_order.len(),
        kind,
        seq
    );
    if let Some(sseq) = startup_seq {
        debug!("{}: written through to startup (seq {})", session.id(), sseq);
    }

    Ok(CommitReport {
        stage: CommitStage::Committed,
        seq,
        modules: changed_in_order,
        change_count,
    })
}

/// Stale-schema check, then schema validation of every module in the
/// required set. Modules without pending changes are validated against
/// their current committed tree.
async fn validate(
    session: &Session,
    ctx: &crate::facade::Context,
    kind: DatastoreKind,
    order: &[String],
    change_sets: &HashMap<String, ChangeSet>,
) -> Result<()> {
    for module in change_sets.keys() {
        let current = ctx.registry.schema_version(module).await?;
        if let Some(seen) = session.schema_version_seen(module) {
            if seen != current {
                return Err(ConfError::StaleSchema {
                    module: module.clone(),
                    seen,
                    current,
                });
            }
        }
    }

    for module in order {
        let schema = ctx.registry.snapshot(module).await?;
        let committed;
        let candidate: &Tree = match session.working_tree(module) {
            Some(work) => work,
            None => {
                committed = ctx.datastores.snapshot(kind, module).await;
                &committed
            }
        };
        if let Err(violation) = ctx.validator.validate(candidate, &schema).await {
            return Err(ConfError::Validation {
                module: module.clone(),
                path: violation.path,
                reason: violation.reason,
            });
        }
    }
    Ok(())
}

/// Running-datastore verify round: every changed module must have a live
/// verify subscriber (apply-only subscribers cannot guard a change), then
/// verify dispatch runs in dependency order. Required-set modules without
/// changes are verified with an empty change set so cross-module references
/// get their say.
async fn verify(
    session: &Session,
    ctx: &crate::facade::Context,
    order: &[String],
    change_sets: &HashMap<String, ChangeSet>,
) -> Result<()> {
    for module in change_sets.keys() {
        if !ctx.subscriptions.has_phase(module, Phase::Verify).await {
            return Err(ConfError::NoSubscriber(module.clone()));
        }
    }

    for module in order {
        let empty;
        let cs = match change_sets.get(module) {
            Some(cs) => cs,
            None => {
                if !ctx.subscriptions.has_phase(module, Phase::Verify).await {
                    continue;
                }
                empty = ChangeSet::empty(module.clone());
                &empty
            }
        };
        debug!(
            "{}: verify dispatch for module '{}' ({} change(s))",
            session.id(),
            module,
            cs.len()
        );
        ctx.subscriptions.dispatch(Phase::Verify, module, cs).await?;
    }
    Ok(())
}

/// Permanent commit: publish the just-committed running trees to startup,
/// then persist them there. No second subscriber round. Like the running
/// leg, a store failure after the publication is surfaced, not rolled back.
async fn write_through_startup(
    ctx: &crate::facade::Context,
    new_trees: &HashMap<String, Arc<Tree>>,
) -> Result<u64> {
    let startup = ctx.datastores.get(DatastoreKind::Startup);
    let seq = startup.next_commit_seq();
    startup.publish(new_trees.clone(), seq).await;
    for (module, tree) in new_trees {
        ctx.persist
            .store(module, DatastoreKind::Startup, tree, seq)
            .await?;
    }
    Ok(seq)
}
