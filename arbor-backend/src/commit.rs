//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

//! Commit and validate orchestration.
//!
//! Every entry point drives the same state machine over the plugin bus:
//!
//! ```text
//! CREATED -> BEGIN -> VALIDATE -> COMPLETE -> COMMIT -> COMMIT_DONE -> END
//!                                          \-> ABORT <- (any failure)
//! ```
//!
//! Failures before COMMIT leave every datastore untouched. Failures inside
//! COMMIT are completed best-effort and reported; the running store keeps
//! the committed content and the operator reconciles plugin-side state.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use arbor_data::bind::{BindMode, bind};
use arbor_data::defaults::add_defaults;
use arbor_data::netconf::{RpcError, Validity};
use arbor_data::validate::{validate_add, validate_all};
use arbor_datastore::{Db, snapshot_clear};
use arbor_utils::SessionId;
use arbor_xml::{XmlFlags, XmlTree};
use arbor_yang::SchemaStore;

use crate::confirmed::{CommitState, DEFAULT_CONFIRM_TIMEOUT};
use crate::context::Context;
use crate::error::Error;
use crate::plugin::Phase;
use crate::transaction::Transaction;

/// Parameters of an inbound `<commit>` rpc (RFC 6241 §8.4).
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct CommitParams {
    pub confirmed: bool,
    /// Seconds; `None` means the protocol default of 600.
    pub confirm_timeout: Option<u32>,
    pub persist: Option<String>,
    pub persist_id: Option<String>,
}

/// Commits a candidate store into running through the full plugin state
/// machine. `db` is usually `candidate`, but the failsafe and rollback
/// paths commit other stores through the same engine.
pub fn candidate_commit(
    ctx: &mut Context,
    params: Option<&CommitParams>,
    db: Db,
    session: Option<SessionId>,
) -> Result<Validity, Error> {
    let mut holder = None;
    let result = candidate_commit_steps(ctx, params, db, session, &mut holder);
    if !matches!(result, Ok(Validity::Valid))
        && let Some(tx) = holder.as_mut()
    {
        ctx.plugins.abort_observers(tx);
    }
    result
}

fn candidate_commit_steps(
    ctx: &mut Context,
    params: Option<&CommitParams>,
    db: Db,
    session: Option<SessionId>,
    holder: &mut Option<Transaction>,
) -> Result<Validity, Error> {
    // Steps 1-4: load both sides, diff, and run the validation phases.
    if let Validity::Invalid(error) = validate_common(ctx, db, holder)? {
        return Ok(Validity::Invalid(error));
    }
    let tx = holder.as_mut().unwrap();

    // Step 5: confirmed-commit phase two, unless this commit *is* the
    // rollback event (its timers are already gone).
    if ctx.schema.feature_enabled("ietf-netconf", "confirmed-commit")
        && !matches!(ctx.confirmed.state(), CommitState::Rollback)
        && let Some(params) = params
        && params.confirmed
    {
        let timeout =
            params.confirm_timeout.unwrap_or(DEFAULT_CONFIRM_TIMEOUT);
        if ctx.confirmed.is_pending() {
            ctx.confirmed.extend(timeout, params.persist.clone(), session);
        } else {
            ctx.confirmed.arm(
                &mut ctx.datastores,
                timeout,
                params.persist.clone(),
                session,
            )?;
        }
    }

    // Step 7: COMMIT and COMMIT_DONE. A failure here is completed
    // best-effort: plugins already past their commit cannot be un-asked,
    // so the datastore swap still happens and the error is surfaced.
    let commit_result = ctx.plugins.phase_all(Phase::Commit, tx);
    if let Err(commit_error) = commit_result {
        error!(
            error = %commit_error,
            "plugin failed during commit; running may have diverged from \
             plugin state, operator attention required"
        );
        let _ = ctx.plugins.phase_all(Phase::CommitDone, tx);
        ctx.datastores.copy(db, Db::Running)?;
        ctx.datastores.modified_set(db, false);
        return Err(commit_error);
    }
    ctx.plugins.phase_all(Phase::CommitDone, tx)?;

    // Step 8: the datastore swap, then the candidate is clean.
    snapshot_clear(&mut tx.target);
    snapshot_clear(&mut tx.src);
    ctx.datastores.copy(db, Db::Running)?;
    ctx.datastores.modified_set(db, false);

    // Step 9.
    if let Err(end_error) = ctx.plugins.phase_all(Phase::End, tx) {
        warn!(error = %end_error, "plugin failed in transaction end");
    }
    Ok(Validity::Valid)
}

/// Validates a candidate store against running without touching any
/// datastore: steps 1-4 of the commit, then end.
pub fn candidate_validate(
    ctx: &mut Context,
    db: Db,
) -> Result<Validity, Error> {
    let mut holder = None;
    let result = (|| -> Result<Validity, Error> {
        if let Validity::Invalid(error) =
            validate_common(ctx, db, &mut holder)?
        {
            return Ok(Validity::Invalid(error));
        }
        let tx = holder.as_mut().unwrap();
        snapshot_clear(&mut tx.target);
        snapshot_clear(&mut tx.src);
        if let Err(end_error) = ctx.plugins.phase_all(Phase::End, tx) {
            warn!(error = %end_error, "plugin failed in transaction end");
        }
        Ok(Validity::Valid)
    })();
    if !matches!(result, Ok(Validity::Valid))
        && let Some(tx) = holder.as_mut()
    {
        ctx.plugins.abort_observers(tx);
    }
    result
}

// Loads target and source stores, computes and marks the diff, and runs
// BEGIN, generic validation, plugin VALIDATE and COMPLETE. The built
// transaction is parked in `holder` so callers can abort observers on any
// outcome.
fn validate_common(
    ctx: &mut Context,
    db: Db,
    holder: &mut Option<Transaction>,
) -> Result<Validity, Error> {
    // The state we are going to.
    let target = match ctx.datastores.get(
        db,
        &ctx.schema,
        BindMode::Module,
        None,
    ) {
        Ok(snapshot) => snapshot.tree,
        Err(arbor_datastore::Error::Invalid(error)) => {
            return Ok(Validity::Invalid(error));
        }
        Err(error) => return Err(error.into()),
    };
    // The state we are going from.
    let src = ctx
        .datastores
        .get(Db::Running, &ctx.schema, BindMode::Module, None)?
        .tree;

    let mut tx = Transaction::new(ctx.next_transaction_id(), src, target);
    clear_transient(&mut tx.src);
    clear_transient(&mut tx.target);
    tx.compute_diff(&ctx.schema);
    tx.debug_dump(&ctx.schema);
    *holder = Some(tx);
    let tx = holder.as_mut().unwrap();

    ctx.plugins.phase_all(Phase::Begin, tx)?;
    if let Validity::Invalid(error) = generic_validate(tx, &ctx.schema)? {
        return Ok(Validity::Invalid(error));
    }
    ctx.plugins.phase_all(Phase::Validate, tx)?;
    ctx.plugins.phase_all(Phase::Complete, tx)?;
    Ok(Validity::Valid)
}

// Generic (schema-driven) validation: every constraint over the whole
// target, then the added-data constraints over each changed and added
// subtree.
fn generic_validate(
    tx: &Transaction,
    schema: &SchemaStore,
) -> Result<Validity, Error> {
    if let Validity::Invalid(error) = validate_all(&tx.target, schema)? {
        return Ok(Validity::Invalid(error));
    }
    for node in tx.changed_target.iter().chain(&tx.added) {
        if let Validity::Invalid(error) =
            validate_add(&tx.target, schema, *node)?
        {
            return Ok(Validity::Invalid(error));
        }
    }
    Ok(Validity::Valid)
}

/// Commits a startup-class store into running: the source side is empty,
/// the diff degenerates to all-adds, and the datastore upgrade pipeline
/// runs between load and validation.
pub fn startup_commit(ctx: &mut Context, db: Db) -> Result<Validity, Error> {
    if db == Db::Running {
        return Err(Error::Internal(
            "startup may not commit from running".to_owned(),
        ));
    }
    let mut holder = None;
    let result = startup_commit_steps(ctx, db, &mut holder);
    if !matches!(result, Ok(Validity::Valid))
        && let Some(tx) = holder.as_mut()
    {
        ctx.plugins.abort_observers(tx);
    }
    result
}

fn startup_commit_steps(
    ctx: &mut Context,
    db: Db,
    holder: &mut Option<Transaction>,
) -> Result<Validity, Error> {
    let target = match startup_load(ctx, db)? {
        Ok(tree) => tree,
        Err(error) => return Ok(Validity::Invalid(error)),
    };

    let mut tx = Transaction::new(
        ctx.next_transaction_id(),
        XmlTree::new("config"),
        target,
    );
    tx.mark_all_added();
    *holder = Some(tx);
    let tx = holder.as_mut().unwrap();

    ctx.plugins.phase_all(Phase::Begin, tx)?;
    debug!(%db, "validating startup store");
    if let Validity::Invalid(error) = generic_validate(tx, &ctx.schema)? {
        return Ok(Validity::Invalid(error));
    }
    ctx.plugins.phase_all(Phase::Validate, tx)?;
    ctx.plugins.phase_all(Phase::Complete, tx)?;
    ctx.plugins.phase_all(Phase::Commit, tx)?;
    ctx.plugins.phase_all(Phase::CommitDone, tx)?;

    // Write the (potentially upgraded) tree as the new running store.
    snapshot_clear(&mut tx.target);
    if ctx.datastores.exists(Db::Running) {
        ctx.datastores.delete(Db::Running)?;
    }
    ctx.datastores.create(Db::Running)?;
    ctx.datastores.replace(Db::Running, &tx.target, &ctx.schema)?;

    if let Err(end_error) = ctx.plugins.phase_all(Phase::End, tx) {
        warn!(error = %end_error, "plugin failed in transaction end");
    }
    Ok(Validity::Valid)
}

// Reads a startup-class store without schema binding, runs the changelog
// upgrade against its recorded module-state, then binds, sorts and
// populates defaults. Client-diagnostic failures come back as `Err(..)`
// in the inner result.
fn startup_load(
    ctx: &mut Context,
    db: Db,
) -> Result<Result<XmlTree, RpcError>, Error> {
    debug!(%db, "reading initial configuration");
    let snapshot =
        ctx.datastores.get(db, &ctx.schema, BindMode::None, None)?;
    let msdiff = snapshot.modstate.unwrap_or_default();
    if !msdiff.recorded {
        warn!(
            %db,
            "no module-state found in datastore; this is normal on first \
             boot, and module-state will be recorded on next write"
        );
    }
    let mut tree = snapshot.tree;
    clear_transient(&mut tree);

    if let Some(changelog) = &ctx.changelog
        && !msdiff.is_clean()
        && let Validity::Invalid(error) =
            changelog.upgrade(&mut tree, &msdiff, &ctx.schema)?
    {
        return Ok(Err(error));
    }

    // An empty store skips binding; upgrading may legitimately leave
    // nothing behind.
    if tree.child_elements(tree.root()).next().is_none() {
        return Ok(Ok(tree));
    }
    if let Validity::Invalid(error) = bind(&mut tree, &ctx.schema, BindMode::Module)? {
        return Ok(Err(error));
    }
    tree.sort_by_schema(&ctx.schema);
    add_defaults(&mut tree, &ctx.schema);
    Ok(Ok(tree))
}

/// The `-q` inspection mode: load and upgrade a startup store, write the
/// upgraded tree to `out`, change nothing.
pub fn startup_upgrade_inspect(
    ctx: &mut Context,
    db: Db,
    out: &mut dyn std::io::Write,
) -> Result<Validity, Error> {
    let mut tree = match startup_load(ctx, db)? {
        Ok(tree) => tree,
        Err(error) => return Ok(Validity::Invalid(error)),
    };
    snapshot_clear(&mut tree);
    out.write_all(
        arbor_xml::print::tree_to_string(&tree, true).as_bytes(),
    )
    .map_err(|error| Error::Internal(error.to_string()))?;
    Ok(Validity::Valid)
}

/// Runs the full transaction state machine against a single plugin, using
/// the `tmp` store as the source side. Lets one backend application be
/// restarted without replaying every other plugin.
pub fn restart_one(
    ctx: &mut Context,
    plugin: &str,
) -> Result<Validity, Error> {
    let idx = ctx
        .plugins
        .index_of(plugin)
        .ok_or_else(|| Error::PluginNotFound(plugin.to_owned()))?;

    ctx.datastores.reset(Db::Tmp)?;
    ctx.plugins.reset_one(idx, Db::Tmp)?;

    // The state we are going to is running itself.
    let target = ctx
        .datastores
        .get(Db::Running, &ctx.schema, BindMode::Module, None)?
        .tree;
    if let Validity::Invalid(error) = validate_all(&target, &ctx.schema)? {
        return Ok(Validity::Invalid(error));
    }
    let src = ctx
        .datastores
        .get(Db::Tmp, &ctx.schema, BindMode::Module, None)?
        .tree;

    let mut tx = Transaction::new(ctx.next_transaction_id(), src, target);
    clear_transient(&mut tx.src);
    clear_transient(&mut tx.target);
    tx.compute_diff(&ctx.schema);

    let result = (|| -> Result<Validity, Error> {
        ctx.plugins.phase_one(idx, Phase::Begin, &mut tx)?;
        if let Validity::Invalid(error) = generic_validate(&tx, &ctx.schema)?
        {
            return Ok(Validity::Invalid(error));
        }
        ctx.plugins.phase_one(idx, Phase::Validate, &mut tx)?;
        ctx.plugins.phase_one(idx, Phase::Complete, &mut tx)?;
        ctx.plugins.phase_one(idx, Phase::Commit, &mut tx)?;
        ctx.plugins.phase_one(idx, Phase::CommitDone, &mut tx)?;
        ctx.plugins.phase_one(idx, Phase::End, &mut tx)?;
        Ok(Validity::Valid)
    })();
    if !matches!(result, Ok(Validity::Valid)) {
        ctx.plugins.abort_observers(&mut tx);
    }
    result
}

/// Last-resort recovery: back running up to `tmp`, reset it, and commit
/// the failsafe store. On failure the backup is restored and the caller
/// is expected to terminate.
pub fn load_failsafe(ctx: &mut Context, phase: &str) -> Result<(), Error> {
    if !ctx.datastores.exists(Db::Failsafe) {
        return Err(Error::FailsafeMissing(phase.to_owned()));
    }
    ctx.datastores.copy(Db::Running, Db::Tmp)?;
    ctx.datastores.reset(Db::Running)?;
    match candidate_commit(ctx, None, Db::Failsafe, None) {
        Ok(Validity::Valid) => {
            info!(%phase, "failure recovered, failsafe store loaded");
            Ok(())
        }
        Ok(Validity::Invalid(error)) => {
            ctx.datastores.copy(Db::Tmp, Db::Running)?;
            Err(Error::FailsafeInvalid(error.to_string()))
        }
        Err(error) => {
            ctx.datastores.copy(Db::Tmp, Db::Running)?;
            Err(error)
        }
    }
}

/// Reverts the candidate to the running configuration.
pub fn discard_changes(ctx: &mut Context) -> Result<(), Error> {
    ctx.datastores.copy(Db::Running, Db::Candidate)?;
    ctx.datastores.modified_set(Db::Candidate, false);
    Ok(())
}

/// Handles an inbound `<cancel-commit>`: authorization, then a rollback
/// commit from the snapshot store.
pub fn cancel_commit(
    ctx: &mut Context,
    persist_id: Option<&str>,
    session: Option<SessionId>,
) -> Result<Validity, Error> {
    if !ctx.confirmed.is_pending() {
        return Ok(Validity::Invalid(RpcError::operation_failed(
            "no confirmed commit is pending",
        )));
    }
    if let Err(error) = ctx.confirmed.authorize(session, persist_id) {
        return Ok(Validity::Invalid(error));
    }
    info!("confirmed commit cancelled, reverting to rollback store");
    rollback_now(ctx)?;
    Ok(Validity::Valid)
}

/// The rollback timer fired without a confirming commit.
pub fn confirmed_rollback(ctx: &mut Context) -> Result<(), Error> {
    info!(
        "confirmed commit timed out, rolling back to previous configuration"
    );
    rollback_now(ctx)
}

// Drives the running store back to the rollback snapshot through a full
// transaction; a rollback that cannot commit falls through to failsafe.
fn rollback_now(ctx: &mut Context) -> Result<(), Error> {
    ctx.confirmed.begin_rollback();
    let result = candidate_commit(ctx, None, Db::Rollback, None);
    ctx.confirmed.finish_rollback(&mut ctx.datastores);
    match result {
        Ok(Validity::Valid) => Ok(()),
        Ok(Validity::Invalid(error)) => {
            warn!(%error, "rollback store failed validation");
            load_failsafe(ctx, "confirmed-commit rollback")
        }
        Err(error) => {
            warn!(%error, "rollback commit failed");
            load_failsafe(ctx, "confirmed-commit rollback")
        }
    }
}

/// First phase of `<commit>` parameter handling: a confirming commit
/// (pending state, authorized, no new `confirmed`) completes here and
/// skips the engine entirely.
pub fn commit_phase1(
    ctx: &mut Context,
    params: &CommitParams,
    session: Option<SessionId>,
) -> Result<crate::confirmed::Phase1, Error> {
    use crate::confirmed::Phase1;

    if !ctx.confirmed.is_pending() {
        if params.persist_id.is_some() {
            return Ok(Phase1::Invalid(RpcError::invalid_value(
                "persist-id given but no confirmed commit is pending",
            )));
        }
        return Ok(Phase1::Proceed);
    }
    if let Err(error) =
        ctx.confirmed.authorize(session, params.persist_id.as_deref())
    {
        return Ok(Phase1::Invalid(error));
    }
    if !params.confirmed {
        // A confirming commit: the candidate was already committed when
        // the confirmed commit was armed.
        ctx.confirmed.disarm(&mut ctx.datastores)?;
        return Ok(Phase1::Done);
    }
    Ok(Phase1::Proceed)
}

// Clears transaction-transient flags a fresh snapshot might carry.
fn clear_transient(tree: &mut XmlTree) {
    let root = tree.root();
    tree.flag_reset_subtree(
        root,
        XmlFlags::ADD | XmlFlags::DEL | XmlFlags::CHANGE | XmlFlags::MARK,
    );
}
