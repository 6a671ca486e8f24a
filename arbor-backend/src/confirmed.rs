//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tracing::{debug, info};

use arbor_data::netconf::RpcError;
use arbor_datastore::{DatastoreManager, Db};
use arbor_utils::SessionId;
use arbor_utils::task::TimeoutTask;

use crate::error::Error;

/// Default confirm-timeout (RFC 6241 §8.4), seconds.
pub const DEFAULT_CONFIRM_TIMEOUT: u32 = 600;

/// Confirmed-commit state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommitState {
    Idle,
    /// A confirmed commit is awaiting confirmation.
    Pending {
        // Token admitting confirming commits from other sessions.
        persist: Option<String>,
        // Originating session; authoritative only without a token.
        session: Option<SessionId>,
        deadline: DateTime<Utc>,
    },
    /// The rollback timer fired; the revert commit is in flight.
    Rollback,
}

/// What the first phase of commit-parameter handling decided.
#[derive(Debug)]
pub enum Phase1 {
    /// Carry on with the normal commit.
    Proceed,
    /// A confirming commit completed; nothing further to do.
    Done,
    /// Parameter rejection.
    Invalid(RpcError),
}

/// The confirmed-commit machinery: pending state, the one-shot rollback
/// timer, and the channel the daemon's reactor listens on for expiry.
pub struct ConfirmedCommit {
    state: CommitState,
    timer: Option<TimeoutTask>,
    tx: Sender<()>,
    /// Timer-expiry events; the reactor owns the receive side.
    pub rx: Receiver<()>,
}

// ===== impl ConfirmedCommit =====

impl ConfirmedCommit {
    pub fn new() -> ConfirmedCommit {
        let (tx, rx) = channel(4);
        ConfirmedCommit {
            state: CommitState::Idle,
            timer: None,
            tx,
            rx,
        }
    }

    pub fn state(&self) -> &CommitState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, CommitState::Pending { .. })
    }

    /// Checks whether a commit/cancel request may act on the pending
    /// confirmed commit: a matching persist-id is authoritative; without
    /// one the originating session must match.
    pub fn authorize(
        &self,
        session: Option<SessionId>,
        persist_id: Option<&str>,
    ) -> Result<(), RpcError> {
        let CommitState::Pending {
            persist,
            session: originator,
            ..
        } = &self.state
        else {
            return Ok(());
        };
        match persist_id {
            Some(persist_id) => {
                if persist.as_deref() == Some(persist_id) {
                    Ok(())
                } else {
                    Err(RpcError::invalid_value(
                        "persist-id does not match the pending confirmed \
                         commit",
                    ))
                }
            }
            None if session.is_some() && session == *originator => Ok(()),
            None => Err(RpcError::operation_failed(
                "confirmed commit pending for another session; a matching \
                 persist-id is required",
            )),
        }
    }

    /// Arms a new confirmed commit: snapshots running into the rollback
    /// store and starts the one-shot timer.
    pub fn arm(
        &mut self,
        datastores: &mut DatastoreManager,
        timeout: u32,
        persist: Option<String>,
        session: Option<SessionId>,
    ) -> Result<(), Error> {
        datastores.copy(Db::Running, Db::Rollback)?;
        self.state = CommitState::Pending {
            persist,
            session,
            deadline: Utc::now() + chrono::Duration::seconds(timeout as i64),
        };
        self.timer = Some(self.timeout_task(timeout));
        debug!(%timeout, "confirmed commit armed");
        Ok(())
    }

    /// Re-arms a pending confirmed commit with a fresh timeout, keeping
    /// the rollback snapshot. A new persist token replaces the old one.
    pub fn extend(
        &mut self,
        timeout: u32,
        new_persist: Option<String>,
        session: Option<SessionId>,
    ) {
        let CommitState::Pending {
            persist,
            session: originator,
            ..
        } = &self.state
        else {
            return;
        };
        let persist = new_persist.or_else(|| persist.clone());
        let originator = session.or(*originator);
        self.state = CommitState::Pending {
            persist,
            session: originator,
            deadline: Utc::now() + chrono::Duration::seconds(timeout as i64),
        };
        match &mut self.timer {
            Some(timer) => {
                timer.reset(Some(Duration::from_secs(timeout as u64)));
            }
            None => self.timer = Some(self.timeout_task(timeout)),
        }
        debug!(%timeout, "confirmed commit extended");
    }

    /// Confirms or cancels: stops the timer, drops the rollback snapshot,
    /// and returns to idle.
    pub fn disarm(
        &mut self,
        datastores: &mut DatastoreManager,
    ) -> Result<(), Error> {
        self.timer = None;
        self.state = CommitState::Idle;
        datastores.delete(Db::Rollback)?;
        info!("confirmed commit completed");
        Ok(())
    }

    /// Marks the rollback commit as in flight (timer expiry or explicit
    /// cancel-commit).
    pub fn begin_rollback(&mut self) {
        self.timer = None;
        self.state = CommitState::Rollback;
    }

    /// Rollback finished (either way); back to idle.
    pub fn finish_rollback(&mut self, datastores: &mut DatastoreManager) {
        self.state = CommitState::Idle;
        let _ = datastores.delete(Db::Rollback);
    }

    fn timeout_task(&self, timeout: u32) -> TimeoutTask {
        let tx = self.tx.clone();
        TimeoutTask::new(
            Duration::from_secs(timeout as u64),
            move || async move {
                let _ = tx.send(()).await;
            },
        )
    }
}

impl Default for ConfirmedCommit {
    fn default() -> ConfirmedCommit {
        ConfirmedCommit::new()
    }
}
