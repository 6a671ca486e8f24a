//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::sync::oneshot;
use tracing::{error, info, instrument, trace, warn};

use arbor_backend::commit::{
    cancel_commit, candidate_commit, candidate_validate, commit_phase1,
    confirmed_rollback, discard_changes,
};
use arbor_backend::{CommitParams, Context, Phase1};
use arbor_data::bind::BindMode;
use arbor_data::netconf::{RpcError, Validity};
use arbor_datastore::{Db, EditOp, Error as DatastoreError};
use arbor_utils::SessionId;
use arbor_xml::parse::parse_document;
use arbor_xml::print::tree_to_string;

/// The channel request surface of the backend. NETCONF and RESTCONF
/// front-ends (out of scope here) translate their wire operations onto
/// this API and render the replies.
pub mod api {
    use super::*;

    #[derive(Debug)]
    pub enum Request {
        OpenSession {
            responder: oneshot::Sender<SessionId>,
        },
        CloseSession {
            session: SessionId,
        },
        Get {
            db: Db,
            xpath: Option<String>,
            // Merge plugin-provided operational state into the reply.
            with_state: bool,
            responder: Responder<String>,
        },
        Rpc {
            name: String,
            input: String,
            responder: Responder<String>,
        },
        Edit {
            db: Db,
            op: EditOp,
            config: String,
            session: SessionId,
            responder: Responder<()>,
        },
        Validate {
            db: Db,
            responder: Responder<()>,
        },
        Commit {
            params: CommitParams,
            session: SessionId,
            responder: Responder<()>,
        },
        CancelCommit {
            persist_id: Option<String>,
            session: SessionId,
            responder: Responder<()>,
        },
        DiscardChanges {
            session: SessionId,
            responder: Responder<()>,
        },
        Lock {
            db: Db,
            session: SessionId,
            responder: Responder<()>,
        },
        Unlock {
            db: Db,
            session: SessionId,
            responder: Responder<()>,
        },
    }

    /// Replies carry either the payload or a ready-to-render rpc-error.
    pub type Responder<T> = oneshot::Sender<Result<T, RpcError>>;
}

/// The backend reactor: single-threaded dispatch of client requests and
/// confirmed-commit timer events, one handler at a time, run to
/// completion.
pub struct Northbound {
    ctx: Context,
    rx: Receiver<api::Request>,
}

// ===== impl Northbound =====

impl Northbound {
    pub fn new(ctx: Context) -> (Northbound, Sender<api::Request>) {
        let (tx, rx) = channel(16);
        (Northbound { ctx, rx }, tx)
    }

    /// Main event loop.
    #[instrument(skip_all, name = "northbound")]
    pub async fn run(mut self, mut shutdown_rx: Receiver<()>) {
        loop {
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => self.process_request(request),
                    None => break,
                },
                Some(_) = self.ctx.confirmed.rx.recv() => {
                    if let Err(error) = confirmed_rollback(&mut self.ctx) {
                        // The rollback path already fell through to the
                        // failsafe store; failure here means neither store
                        // is usable.
                        error!(%error, "confirmed-commit rollback failed");
                        std::process::exit(255);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutting down");
                    self.rx.close();
                }
                else => break,
            }
        }
    }

    fn process_request(&mut self, request: api::Request) {
        trace!(?request, "received client request");
        match request {
            api::Request::OpenSession { responder } => {
                let session = self.ctx.sessions.open();
                let _ = responder.send(session);
            }
            api::Request::CloseSession { session } => {
                self.ctx.close_session(session);
            }
            api::Request::Get {
                db,
                xpath,
                with_state,
                responder,
            } => {
                let response =
                    self.process_get(db, xpath.as_deref(), with_state);
                let _ = responder.send(response);
            }
            api::Request::Rpc {
                name,
                input,
                responder,
            } => {
                let response = self.process_rpc(&name, &input);
                if let Err(error) = &response {
                    warn!(%error, "rpc failed");
                }
                let _ = responder.send(response);
            }
            api::Request::Edit {
                db,
                op,
                config,
                session,
                responder,
            } => {
                let response = self.process_edit(db, op, &config, session);
                if let Err(error) = &response {
                    warn!(%error, "edit failed");
                }
                let _ = responder.send(response);
            }
            api::Request::Validate { db, responder } => {
                let response = self.process_validate(db);
                if let Err(error) = &response {
                    warn!(%error, "validation failed");
                }
                let _ = responder.send(response);
            }
            api::Request::Commit {
                params,
                session,
                responder,
            } => {
                let response = self.process_commit(params, session);
                if let Err(error) = &response {
                    warn!(%error, "commit failed");
                }
                let _ = responder.send(response);
            }
            api::Request::CancelCommit {
                persist_id,
                session,
                responder,
            } => {
                let response = cancel_commit(
                    &mut self.ctx,
                    persist_id.as_deref(),
                    Some(session),
                )
                .map_err(internal_error)
                .and_then(Validity::into_result);
                let _ = responder.send(response);
            }
            api::Request::DiscardChanges { session, responder } => {
                let response = self.process_discard_changes(session);
                let _ = responder.send(response);
            }
            api::Request::Lock {
                db,
                session,
                responder,
            } => {
                let response = self
                    .ctx
                    .datastores
                    .lock(db, session)
                    .map_err(datastore_error);
                let _ = responder.send(response);
            }
            api::Request::Unlock {
                db,
                session,
                responder,
            } => {
                let response = self
                    .ctx
                    .datastores
                    .unlock(db, session)
                    .map_err(datastore_error);
                let _ = responder.send(response);
            }
        }
    }

    fn process_get(
        &mut self,
        db: Db,
        xpath: Option<&str>,
        with_state: bool,
    ) -> Result<String, RpcError> {
        let mut snapshot = self
            .ctx
            .datastores
            .get(db, &self.ctx.schema, BindMode::Module, xpath)
            .map_err(datastore_error)?;
        if with_state {
            // Plugin state data is appended under the same root.
            let root = snapshot.tree.root();
            for state in
                self.ctx.plugins.statedata_all(xpath.unwrap_or("/"))
            {
                for top in
                    state.child_elements(state.root()).collect::<Vec<_>>()
                {
                    snapshot.tree.copy_from(root, &state, top);
                }
            }
        }
        Ok(tree_to_string(&snapshot.tree, true))
    }

    // A YANG rpc: bind and validate the input, then dispatch it to the
    // first plugin claiming it.
    fn process_rpc(
        &mut self,
        name: &str,
        input: &str,
    ) -> Result<String, RpcError> {
        let mut input = parse_document(input).map_err(|error| {
            RpcError::new(
                arbor_data::ErrorType::Protocol,
                arbor_data::ErrorTag::MalformedMessage,
            )
            .with_message(error.to_string())
        })?;
        arbor_data::bind::bind(&mut input, &self.ctx.schema, BindMode::Rpc)
            .map_err(|error| {
                error!(%error, "rpc bind failed");
                RpcError::operation_failed("internal error")
            })?
            .into_result()?;
        arbor_data::validate::validate_rpc(&input, &self.ctx.schema)
            .map_err(|error| {
                error!(%error, "rpc validation failed");
                RpcError::operation_failed("internal error")
            })?
            .into_result()?;
        match self.ctx.plugins.rpc_dispatch(name, &input) {
            Some(Ok(output)) => Ok(tree_to_string(&output, true)),
            Some(Err(error)) => Err(error),
            None => Err(RpcError::operation_failed(format!(
                "no handler for rpc \"{name}\""
            ))),
        }
    }

    fn process_edit(
        &mut self,
        db: Db,
        op: EditOp,
        config: &str,
        session: SessionId,
    ) -> Result<(), RpcError> {
        self.check_lock(db, session)?;
        let edit = parse_document(config).map_err(|error| {
            RpcError::new(
                arbor_data::ErrorType::Protocol,
                arbor_data::ErrorTag::MalformedMessage,
            )
            .with_message(error.to_string())
        })?;
        self.ctx
            .datastores
            .put(db, op, &edit, &self.ctx.schema)
            .map_err(datastore_error)?
            .into_result()
    }

    fn process_validate(&mut self, db: Db) -> Result<(), RpcError> {
        candidate_validate(&mut self.ctx, db)
            .map_err(internal_error)?
            .into_result()
    }

    fn process_commit(
        &mut self,
        params: CommitParams,
        session: SessionId,
    ) -> Result<(), RpcError> {
        // Phase one: a confirming commit may complete right here.
        match commit_phase1(&mut self.ctx, &params, Some(session))
            .map_err(internal_error)?
        {
            Phase1::Done => return Ok(()),
            Phase1::Invalid(error) => return Err(error),
            Phase1::Proceed => (),
        }
        self.check_lock(Db::Running, session)?;
        candidate_commit(
            &mut self.ctx,
            Some(&params),
            Db::Candidate,
            Some(session),
        )
        .map_err(internal_error)?
        .into_result()
    }

    fn process_discard_changes(
        &mut self,
        session: SessionId,
    ) -> Result<(), RpcError> {
        self.check_lock(Db::Candidate, session)?;
        discard_changes(&mut self.ctx).map_err(internal_error)
    }

    // A write-path operation on a store locked by somebody else fails
    // with in-use.
    fn check_lock(&self, db: Db, session: SessionId) -> Result<(), RpcError> {
        match self.ctx.datastores.islocked(db) {
            Some(holder) if holder != session => Err(RpcError::in_use(
                format!("operation failed, \"{db}\" is locked by session {holder}"),
            )),
            _ => Ok(()),
        }
    }
}

// ===== helper functions =====

fn internal_error(error: arbor_backend::Error) -> RpcError {
    error!(%error, "internal error");
    RpcError::operation_failed("internal error")
}

fn datastore_error(error: DatastoreError) -> RpcError {
    match error {
        DatastoreError::Invalid(rpc_error) => rpc_error,
        DatastoreError::LockDenied(_, holder) => RpcError::lock_denied(
            holder.0,
            "operation failed, lock is already held",
        ),
        DatastoreError::NotLocked(db) => RpcError::operation_failed(
            format!("\"{db}\" is not locked by this session"),
        ),
        error => {
            error!(%error, "datastore error");
            RpcError::operation_failed("internal error")
        }
    }
}
