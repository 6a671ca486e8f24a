//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use arbor_data::bind::{BindMode, bind};
use arbor_data::defaults::{add_defaults, strip_defaults};
use arbor_data::netconf::Validity;
use arbor_data::validate::validate_list_keys_only;
use arbor_utils::SessionId;
use arbor_xml::xpath::{self, Context};
use arbor_xml::{Apply, NsCtx, XmlFlags, XmlTree};
use arbor_yang::SchemaStore;

use crate::edit::{EditOp, apply_edit};
use crate::error::Error;
use crate::modstate::{ModState, ModStateDiff};
use crate::text;

/// The named datastores of a deployment.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Db {
    Running,
    Candidate,
    Startup,
    Failsafe,
    Tmp,
    /// Confirmed-commit rollback snapshot.
    Rollback,
}

/// A populated tree handed out by [`DatastoreManager::get`], together with
/// the module-state comparison made while reading it. The tree is the
/// caller's to mutate (transactions mark diff flags on it); consistency
/// with the store is the cache's problem, not the caller's.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub tree: XmlTree,
    pub modstate: Option<ModStateDiff>,
}

#[derive(Debug, Default)]
struct StoreState {
    // Fully populated (bound, defaulted, sorted) content.
    cache: Option<Snapshot>,
    lock: Option<SessionId>,
    modified: bool,
}

/// Named persistent stores over one backing directory.
#[derive(Debug)]
pub struct DatastoreManager {
    dir: PathBuf,
    // Record {module, revision} tuples next to the data on write.
    record_modstate: bool,
    states: BTreeMap<Db, StoreState>,
}

// ===== impl Db =====

impl Db {
    pub const ALL: [Db; 6] = [
        Db::Running,
        Db::Candidate,
        Db::Startup,
        Db::Failsafe,
        Db::Tmp,
        Db::Rollback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Db::Running => "running",
            Db::Candidate => "candidate",
            Db::Startup => "startup",
            Db::Failsafe => "failsafe",
            Db::Tmp => "tmp",
            Db::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===== impl DatastoreManager =====

impl DatastoreManager {
    pub fn new(dir: impl Into<PathBuf>, record_modstate: bool) -> Self {
        DatastoreManager {
            dir: dir.into(),
            record_modstate,
            states: BTreeMap::new(),
        }
    }

    fn state(&mut self, db: Db) -> &mut StoreState {
        self.states.entry(db).or_default()
    }

    // ----- read side -----

    /// Returns a populated copy of a store: parsed, schema-bound, sorted,
    /// with defaults injected, plus the module-state diff observed while
    /// reading. Cached until the store is mutated.
    ///
    /// `BindMode::None` bypasses binding (and the cache): the raw parse
    /// used by the upgrade pipeline, whose content may predate the schema.
    /// An optional XPath keeps only matching subtrees in the returned copy.
    pub fn get(
        &mut self,
        db: Db,
        schema: &SchemaStore,
        mode: BindMode,
        xpath: Option<&str>,
    ) -> Result<Snapshot, Error> {
        let snapshot = match mode {
            BindMode::None => self.read_raw(db, schema)?,
            _ => {
                if self.state(db).cache.is_none() {
                    let populated = self.populate(db, schema, mode)?;
                    self.state(db).cache = Some(populated);
                }
                self.state(db).cache.as_ref().unwrap().clone()
            }
        };
        match xpath {
            None | Some("/") => Ok(snapshot),
            Some(xpath) => {
                let mut snapshot = snapshot;
                filter_by_xpath(&mut snapshot.tree, schema, xpath)?;
                Ok(snapshot)
            }
        }
    }

    fn read_raw(
        &mut self,
        db: Db,
        schema: &SchemaStore,
    ) -> Result<Snapshot, Error> {
        let mut tree = text::read_db(&self.dir, db)?
            .unwrap_or_else(|| XmlTree::new("config"));
        // Split off the module-state block.
        let stored_modstate = tree
            .find_child(tree.root(), None, "yang-library")
            .map(|yang_library| {
                let modstate = ModState::from_xml(&tree, yang_library);
                tree.purge(yang_library);
                modstate
            });
        let modstate = match stored_modstate {
            Some(stored) => Some(stored.diff(&ModState::from_schema(schema))),
            None => Some(ModStateDiff::default()),
        };
        Ok(Snapshot { tree, modstate })
    }

    fn populate(
        &mut self,
        db: Db,
        schema: &SchemaStore,
        mode: BindMode,
    ) -> Result<Snapshot, Error> {
        debug!(%db, "populating datastore cache");
        let mut snapshot = self.read_raw(db, schema)?;
        match bind(&mut snapshot.tree, schema, mode)? {
            Validity::Valid => (),
            Validity::Invalid(error) => return Err(Error::Invalid(error)),
        }
        snapshot.tree.sort_by_schema(schema);
        add_defaults(&mut snapshot.tree, schema);
        Ok(snapshot)
    }

    /// Drops the cached populated tree of a store.
    pub fn cache_clear(&mut self, db: Db) {
        self.state(db).cache = None;
    }

    /// Serializes the raw store content.
    pub fn dump(
        &mut self,
        db: Db,
        schema: &SchemaStore,
        writer: &mut dyn std::io::Write,
    ) -> Result<(), Error> {
        let snapshot = self.read_raw(db, schema)?;
        writer
            .write_all(
                arbor_xml::print::tree_to_string(&snapshot.tree, true)
                    .as_bytes(),
            )
            .map_err(|error| Error::Io(db.as_str().to_owned(), error))
    }

    // ----- write side -----

    /// Applies a NETCONF edit to a store. Atomic per call: on any rejection
    /// the store is untouched and the diagnostic is returned as `Invalid`.
    pub fn put(
        &mut self,
        db: Db,
        op: EditOp,
        edit: &XmlTree,
        schema: &SchemaStore,
    ) -> Result<Validity, Error> {
        let mut working = self.read_raw(db, schema)?.tree;
        // The base must be bound for key-wise list matching in the edit.
        match bind(&mut working, schema, BindMode::Module)? {
            Validity::Valid => (),
            invalid => return Ok(invalid),
        }
        match apply_edit(&mut working, edit, op, schema)? {
            Validity::Valid => (),
            invalid => return Ok(invalid),
        }
        // Re-bind from scratch: the edit attached raw nodes.
        match bind(&mut working, schema, BindMode::Module)? {
            Validity::Valid => (),
            invalid => return Ok(invalid),
        }
        match validate_list_keys_only(&working, schema)? {
            Validity::Valid => (),
            invalid => return Ok(invalid),
        }
        working.sort_by_schema(schema);
        self.write(db, &working, schema)?;
        self.state(db).modified = true;
        Ok(Validity::Valid)
    }

    fn write(
        &mut self,
        db: Db,
        tree: &XmlTree,
        schema: &SchemaStore,
    ) -> Result<(), Error> {
        let mut out = tree.clone();
        strip_defaults(&mut out);
        out.flag_reset_subtree(out.root(), XmlFlags::all());
        if self.record_modstate {
            let root = out.root();
            ModState::from_schema(schema).attach(&mut out, root);
        }
        text::write_db(&self.dir, db, &out)?;
        self.cache_clear(db);
        Ok(())
    }

    /// Replaces a store's content wholesale (no edit semantics). The
    /// startup and rollback paths use this.
    pub fn replace(
        &mut self,
        db: Db,
        tree: &XmlTree,
        schema: &SchemaStore,
    ) -> Result<(), Error> {
        self.write(db, tree, schema)
    }

    pub fn copy(&mut self, src: Db, dst: Db) -> Result<(), Error> {
        if !text::db_exists(&self.dir, src) {
            return Err(Error::NotFound(src));
        }
        text::copy_db(&self.dir, src, dst)?;
        self.cache_clear(dst);
        Ok(())
    }

    pub fn exists(&self, db: Db) -> bool {
        text::db_exists(&self.dir, db)
    }

    pub fn create(&mut self, db: Db) -> Result<(), Error> {
        if !text::db_exists(&self.dir, db) {
            text::write_db(&self.dir, db, &XmlTree::new("config"))?;
        }
        Ok(())
    }

    pub fn delete(&mut self, db: Db) -> Result<(), Error> {
        text::remove_db(&self.dir, db)?;
        self.states.remove(&db);
        Ok(())
    }

    /// Truncates a store to an empty `<config/>`.
    pub fn reset(&mut self, db: Db) -> Result<(), Error> {
        text::write_db(&self.dir, db, &XmlTree::new("config"))?;
        self.cache_clear(db);
        self.state(db).modified = false;
        Ok(())
    }

    // ----- locking -----

    /// Takes the single-writer lock of a store. Fails identifying the
    /// current holder.
    pub fn lock(&mut self, db: Db, session: SessionId) -> Result<(), Error> {
        match self.state(db).lock {
            Some(holder) if holder != session => {
                Err(Error::LockDenied(db, holder))
            }
            _ => {
                self.state(db).lock = Some(session);
                Ok(())
            }
        }
    }

    /// Releases a lock; only the holder may unlock.
    pub fn unlock(
        &mut self,
        db: Db,
        session: SessionId,
    ) -> Result<(), Error> {
        match self.state(db).lock {
            Some(holder) if holder == session => {
                self.state(db).lock = None;
                Ok(())
            }
            _ => Err(Error::NotLocked(db)),
        }
    }

    /// Drops every lock a session holds (session teardown).
    pub fn unlock_session(&mut self, session: SessionId) {
        for state in self.states.values_mut() {
            if state.lock == Some(session) {
                state.lock = None;
            }
        }
    }

    pub fn islocked(&self, db: Db) -> Option<SessionId> {
        self.states.get(&db).and_then(|state| state.lock)
    }

    // ----- dirty bit -----

    pub fn modified_set(&mut self, db: Db, modified: bool) {
        self.state(db).modified = modified;
    }

    pub fn modified_get(&mut self, db: Db) -> bool {
        self.state(db).modified
    }
}

// ===== global functions =====

/// Clears what [`DatastoreManager::get`] injected into a tree: transient
/// flags and default leaves. Run before a tree is compared against stored
/// content or written back.
pub fn snapshot_clear(tree: &mut XmlTree) {
    strip_defaults(tree);
    let root = tree.root();
    tree.flag_reset_subtree(root, XmlFlags::all());
}

// Keeps only the subtrees selected by `xpath`: matches, their ancestors
// and their descendants survive, everything else is purged.
fn filter_by_xpath(
    tree: &mut XmlTree,
    schema: &SchemaStore,
    xpath: &str,
) -> Result<(), Error> {
    let parsed = xpath::parse(xpath)?;
    let nsctx = NsCtx::new();
    let matches = {
        let ctx = Context::new(tree, Some(schema), &nsctx, tree.root());
        xpath::eval_nodeset(&parsed, &ctx, tree.root())?
    };
    if matches.is_empty() {
        warn!(%xpath, "xpath filter selected nothing");
    }
    for matched in matches {
        tree.flag_set_subtree(matched, XmlFlags::MARK);
        tree.apply_ancestors(matched, &mut |tree, ancestor| {
            tree.flag_set(ancestor, XmlFlags::MARK);
        });
    }
    let mut doomed = Vec::new();
    tree.apply(tree.root(), &mut |tree, node| {
        if tree.flag_test(node, XmlFlags::MARK) {
            Apply::Descend
        } else {
            doomed.push(node);
            Apply::Prune
        }
    });
    for node in doomed {
        tree.purge(node);
    }
    let root = tree.root();
    tree.flag_reset_subtree(root, XmlFlags::MARK);
    Ok(())
}
