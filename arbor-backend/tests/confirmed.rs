//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use arbor_backend::commit::{
    cancel_commit, candidate_commit, commit_phase1, confirmed_rollback,
};
use arbor_backend::{CommitParams, CommitState, Phase1};
use arbor_data::netconf::Validity;
use arbor_data::ErrorTag;
use arbor_datastore::Db;
use arbor_utils::SessionId;

use common::{db_text, put_candidate, test_context, test_dir};

fn confirmed_ctx() -> arbor_backend::Context {
    let mut ctx = test_context(test_dir());
    ctx.schema.enable_feature("ietf-netconf", "confirmed-commit");
    ctx
}

fn confirmed_params(timeout: u32) -> CommitParams {
    CommitParams {
        confirmed: true,
        confirm_timeout: Some(timeout),
        persist: None,
        persist_id: None,
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_reverts_to_pre_arm_snapshot() {
    let mut ctx = confirmed_ctx();
    let session = Some(SessionId(1));

    // Baseline configuration.
    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>base0</name></interface></interfaces>",
    );
    candidate_commit(&mut ctx, None, Db::Candidate, session).unwrap();
    let pre_arm = db_text(&ctx, Db::Running);

    // Confirmed commit of a further change, two-second timeout.
    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>risky0</name></interface></interfaces>",
    );
    let params = confirmed_params(2);
    let result =
        candidate_commit(&mut ctx, Some(&params), Db::Candidate, session)
            .unwrap();
    assert_eq!(result, Validity::Valid);
    assert!(ctx.confirmed.is_pending());
    assert!(db_text(&ctx, Db::Running).contains("risky0"));

    // No confirming commit arrives; the timer fires.
    ctx.confirmed.rx.recv().await.unwrap();
    confirmed_rollback(&mut ctx).unwrap();

    assert_eq!(db_text(&ctx, Db::Running), pre_arm);
    assert_eq!(*ctx.confirmed.state(), CommitState::Idle);
    assert!(!ctx.datastores.exists(Db::Rollback));
    assert_eq!(ctx.datastores.islocked(Db::Running), None);
}

#[tokio::test(start_paused = true)]
async fn confirming_commit_cancels_the_rollback() {
    let mut ctx = confirmed_ctx();
    let session = Some(SessionId(1));

    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    let params = confirmed_params(600);
    candidate_commit(&mut ctx, Some(&params), Db::Candidate, session)
        .unwrap();
    assert!(ctx.confirmed.is_pending());
    assert!(ctx.datastores.exists(Db::Rollback));

    // The plain follow-up commit from the same session confirms.
    let confirm = CommitParams::default();
    let outcome = commit_phase1(&mut ctx, &confirm, session).unwrap();
    assert!(matches!(outcome, Phase1::Done));
    assert_eq!(*ctx.confirmed.state(), CommitState::Idle);
    assert!(!ctx.datastores.exists(Db::Rollback));
    assert!(db_text(&ctx, Db::Running).contains("eth0"));
}

#[tokio::test(start_paused = true)]
async fn extending_commit_rearms_the_timer() {
    let mut ctx = confirmed_ctx();
    let session = Some(SessionId(1));

    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    candidate_commit(
        &mut ctx,
        Some(&confirmed_params(60)),
        Db::Candidate,
        session,
    )
    .unwrap();
    let first_deadline = match ctx.confirmed.state() {
        CommitState::Pending { deadline, .. } => *deadline,
        state => panic!("expected pending, got {state:?}"),
    };

    // Extend with a longer timeout.
    candidate_commit(
        &mut ctx,
        Some(&confirmed_params(600)),
        Db::Candidate,
        session,
    )
    .unwrap();
    match ctx.confirmed.state() {
        CommitState::Pending { deadline, .. } => {
            assert!(*deadline > first_deadline);
        }
        state => panic!("expected pending, got {state:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn persist_token_admits_other_sessions() {
    let mut ctx = confirmed_ctx();

    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    let params = CommitParams {
        confirmed: true,
        confirm_timeout: Some(600),
        persist: Some("tok-1".to_owned()),
        persist_id: None,
    };
    candidate_commit(&mut ctx, Some(&params), Db::Candidate, Some(SessionId(1)))
        .unwrap();

    // Another session without the token is refused.
    let plain = CommitParams::default();
    match commit_phase1(&mut ctx, &plain, Some(SessionId(2))).unwrap() {
        Phase1::Invalid(error) => {
            assert_eq!(error.tag, ErrorTag::OperationFailed)
        }
        outcome => panic!("expected rejection, got {outcome:?}"),
    }

    // A wrong persist-id is invalid-value.
    let wrong = CommitParams {
        persist_id: Some("tok-9".to_owned()),
        ..Default::default()
    };
    match commit_phase1(&mut ctx, &wrong, Some(SessionId(2))).unwrap() {
        Phase1::Invalid(error) => {
            assert_eq!(error.tag, ErrorTag::InvalidValue)
        }
        outcome => panic!("expected rejection, got {outcome:?}"),
    }

    // The matching token confirms, whoever presents it.
    let matching = CommitParams {
        persist_id: Some("tok-1".to_owned()),
        ..Default::default()
    };
    let outcome =
        commit_phase1(&mut ctx, &matching, Some(SessionId(2))).unwrap();
    assert!(matches!(outcome, Phase1::Done));
    assert_eq!(*ctx.confirmed.state(), CommitState::Idle);
}

#[tokio::test(start_paused = true)]
async fn unmatched_persist_id_without_pending_commit() {
    let mut ctx = confirmed_ctx();
    let params = CommitParams {
        persist_id: Some("ghost".to_owned()),
        ..Default::default()
    };
    match commit_phase1(&mut ctx, &params, Some(SessionId(1))).unwrap() {
        Phase1::Invalid(error) => {
            assert_eq!(error.tag, ErrorTag::InvalidValue)
        }
        outcome => panic!("expected rejection, got {outcome:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_commit_reverts_immediately() {
    let mut ctx = confirmed_ctx();
    let session = Some(SessionId(1));

    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>base0</name></interface></interfaces>",
    );
    candidate_commit(&mut ctx, None, Db::Candidate, session).unwrap();
    let pre_arm = db_text(&ctx, Db::Running);

    put_candidate(
        &mut ctx,
        "<interfaces><interface><name>risky0</name></interface></interfaces>",
    );
    let params = CommitParams {
        confirmed: true,
        confirm_timeout: Some(600),
        persist: Some("tok-1".to_owned()),
        persist_id: None,
    };
    candidate_commit(&mut ctx, Some(&params), Db::Candidate, session)
        .unwrap();
    assert!(db_text(&ctx, Db::Running).contains("risky0"));

    let result =
        cancel_commit(&mut ctx, Some("tok-1"), Some(SessionId(2))).unwrap();
    assert_eq!(result, Validity::Valid);
    assert_eq!(db_text(&ctx, Db::Running), pre_arm);
    assert_eq!(*ctx.confirmed.state(), CommitState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancel_without_pending_commit_fails() {
    let mut ctx = confirmed_ctx();
    let result = cancel_commit(&mut ctx, Some("tok"), None).unwrap();
    match result {
        Validity::Invalid(error) => {
            assert_eq!(error.tag, ErrorTag::OperationFailed)
        }
        Validity::Valid => panic!("expected failure"),
    }
}
