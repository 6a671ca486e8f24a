//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use arbor_datastore::{Changelog, DatastoreManager, Db};
use arbor_utils::SessionId;
use arbor_yang::SchemaStore;

use crate::confirmed::ConfirmedCommit;
use crate::error::Error;
use crate::plugin::PluginBus;

/// Immutable option snapshot taken at startup. Everything the old-style
/// global handle used to answer lives either here or in one of the
/// explicit [`Context`] members.
#[derive(Clone, Debug)]
pub struct Options {
    pub datastore_dir: PathBuf,
    pub record_modstate: bool,
    pub changelog_file: Option<PathBuf>,
    // Free-form -o overrides.
    pub extra: BTreeMap<String, String>,
}

/// Active management sessions. Session ids are never reused within a
/// process lifetime.
#[derive(Debug, Default)]
pub struct SessionTable {
    next: u32,
    active: BTreeSet<SessionId>,
}

/// The explicit state threaded through every backend entry point: options
/// snapshot, schema registry, datastore manager, plugin bus, session
/// table, and the confirmed-commit machinery. There are no hidden
/// singletons behind it.
pub struct Context {
    pub options: Options,
    pub schema: SchemaStore,
    pub datastores: DatastoreManager,
    pub plugins: PluginBus,
    pub sessions: SessionTable,
    pub changelog: Option<Changelog>,
    pub confirmed: ConfirmedCommit,
    next_transaction_id: u64,
}

// ===== impl Options =====

impl Default for Options {
    fn default() -> Options {
        Options {
            datastore_dir: PathBuf::from("/var/lib/arbor"),
            record_modstate: true,
            changelog_file: None,
            extra: BTreeMap::new(),
        }
    }
}

// ===== impl SessionTable =====

impl SessionTable {
    /// Allocates a new session id.
    pub fn open(&mut self) -> SessionId {
        self.next += 1;
        let session = SessionId(self.next);
        self.active.insert(session);
        session
    }

    pub fn is_active(&self, session: SessionId) -> bool {
        self.active.contains(&session)
    }

    pub fn close(&mut self, session: SessionId) {
        self.active.remove(&session);
    }

    pub fn iter(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.active.iter().copied()
    }
}

// ===== impl Context =====

impl Context {
    pub fn new(options: Options, schema: SchemaStore) -> Result<Context, Error> {
        let datastores = DatastoreManager::new(
            options.datastore_dir.clone(),
            options.record_modstate,
        );
        let changelog = match &options.changelog_file {
            Some(path) => {
                Some(Changelog::load(&path.display().to_string())?)
            }
            None => None,
        };
        Ok(Context {
            options,
            schema,
            datastores,
            plugins: PluginBus::new(),
            sessions: SessionTable::default(),
            changelog,
            confirmed: ConfirmedCommit::new(),
            next_transaction_id: 0,
        })
    }

    /// Allocates a transaction id.
    pub(crate) fn next_transaction_id(&mut self) -> u64 {
        self.next_transaction_id += 1;
        self.next_transaction_id
    }

    /// Session teardown: drop its datastore locks and forget it. A pending
    /// confirmed commit with a persist token survives the originator.
    pub fn close_session(&mut self, session: SessionId) {
        self.datastores.unlock_session(session);
        self.sessions.close(session);
    }

    /// Ensures the base stores exist on disk.
    pub fn create_base_datastores(&mut self) -> Result<(), Error> {
        for db in [Db::Running, Db::Candidate] {
            self.datastores.create(db)?;
        }
        Ok(())
    }
}
