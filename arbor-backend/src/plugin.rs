//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, error, warn};

use arbor_data::netconf::RpcError;
use arbor_datastore::Db;
use arbor_xml::XmlTree;

use crate::error::Error;
use crate::transaction::Transaction;

/// Transaction phases delivered to plugins.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Begin,
    Validate,
    Complete,
    Commit,
    CommitDone,
    End,
    Abort,
}

/// An application plugin. Every callback is optional; the defaults do
/// nothing. Phase callbacks receive the transaction read-only; the flags
/// on its trees are the change contract.
pub trait Plugin {
    fn name(&self) -> &str;

    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn start(&mut self) {}

    /// Seed extra content into a freshly reset datastore.
    fn reset(&mut self, _db: Db) -> Result<(), String> {
        Ok(())
    }

    /// Contribute operational state for a get request.
    fn statedata(&mut self, _xpath: &str) -> Option<XmlTree> {
        None
    }

    fn transaction_begin(&mut self, _tx: &Transaction) -> Result<(), String> {
        Ok(())
    }

    fn transaction_validate(
        &mut self,
        _tx: &Transaction,
    ) -> Result<(), String> {
        Ok(())
    }

    fn transaction_complete(
        &mut self,
        _tx: &Transaction,
    ) -> Result<(), String> {
        Ok(())
    }

    fn transaction_commit(&mut self, _tx: &Transaction) -> Result<(), String> {
        Ok(())
    }

    fn transaction_commit_done(
        &mut self,
        _tx: &Transaction,
    ) -> Result<(), String> {
        Ok(())
    }

    fn transaction_end(&mut self, _tx: &Transaction) -> Result<(), String> {
        Ok(())
    }

    /// Abort must not fail; its own problems are logged and swallowed.
    fn transaction_abort(&mut self, _tx: &Transaction) {}

    /// Handle a YANG rpc. `None` means "not mine".
    fn rpc_handler(
        &mut self,
        _name: &str,
        _input: &XmlTree,
    ) -> Option<Result<XmlTree, RpcError>> {
        None
    }

    /// Handle a YANG action. Same contract as rpc_handler.
    fn action_handler(
        &mut self,
        _name: &str,
        _input: &XmlTree,
    ) -> Option<Result<XmlTree, RpcError>> {
        None
    }
}

const PHASE_BITS: [(Phase, u8); 7] = [
    (Phase::Begin, 0x01),
    (Phase::Validate, 0x02),
    (Phase::Complete, 0x04),
    (Phase::Commit, 0x08),
    (Phase::CommitDone, 0x10),
    (Phase::End, 0x20),
    (Phase::Abort, 0x40),
];

fn phase_bit(phase: Phase) -> u8 {
    PHASE_BITS
        .iter()
        .find(|(candidate, _)| *candidate == phase)
        .map(|(_, bit)| *bit)
        .unwrap()
}

/// Registration-order dispatcher for plugin callbacks.
///
/// Guarantees: fan-out in registration order, at-most-once delivery per
/// phase per plugin per transaction, abort only to plugins that observed
/// `begin`, and a state fence around every callback.
#[derive(Default)]
pub struct PluginBus {
    plugins: Vec<Box<dyn Plugin + Send>>,
}

// ===== impl PluginBus =====

impl PluginBus {
    pub fn new() -> PluginBus {
        PluginBus::default()
    }

    /// Registers a plugin. The list is append-only after init.
    pub fn register(&mut self, plugin: Box<dyn Plugin + Send>) {
        debug!(plugin = %plugin.name(), "registered plugin");
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|plugin| plugin.name() == name)
    }

    pub fn init_all(&mut self) -> Result<(), Error> {
        for plugin in &mut self.plugins {
            plugin.init().map_err(|reason| {
                Error::Plugin(plugin.name().to_owned(), Phase::Begin, reason)
            })?;
        }
        Ok(())
    }

    pub fn start_all(&mut self) {
        for plugin in &mut self.plugins {
            plugin.start();
        }
    }

    pub fn reset_one(&mut self, idx: usize, db: Db) -> Result<(), Error> {
        let plugin = &mut self.plugins[idx];
        plugin.reset(db).map_err(|reason| {
            Error::Plugin(plugin.name().to_owned(), Phase::Begin, reason)
        })
    }

    /// Collects state data from every plugin for a get request.
    pub fn statedata_all(&mut self, xpath: &str) -> Vec<XmlTree> {
        self.plugins
            .iter_mut()
            .filter_map(|plugin| plugin.statedata(xpath))
            .collect()
    }

    /// Dispatches an rpc to the first plugin that claims it.
    pub fn rpc_dispatch(
        &mut self,
        name: &str,
        input: &XmlTree,
    ) -> Option<Result<XmlTree, RpcError>> {
        self.plugins
            .iter_mut()
            .find_map(|plugin| plugin.rpc_handler(name, input))
    }

    /// Delivers one phase to every plugin in registration order. The first
    /// failure stops the fan-out and is returned; the caller decides
    /// whether to abort or (for commit) continue best-effort.
    pub fn phase_all(
        &mut self,
        phase: Phase,
        tx: &mut Transaction,
    ) -> Result<(), Error> {
        for idx in 0..self.plugins.len() {
            self.phase_one(idx, phase, tx)?;
        }
        Ok(())
    }

    /// Delivers one phase to one plugin, with at-most-once and fence
    /// checks.
    pub fn phase_one(
        &mut self,
        idx: usize,
        phase: Phase,
        tx: &mut Transaction,
    ) -> Result<(), Error> {
        if tx.observed.len() < self.plugins.len() {
            tx.observed.resize(self.plugins.len(), 0);
        }
        let bit = phase_bit(phase);
        if tx.observed[idx] & bit != 0 {
            // At-most-once per phase per plugin per transaction.
            return Ok(());
        }
        tx.observed[idx] |= bit;

        let plugin = &mut self.plugins[idx];
        let name = plugin.name().to_owned();
        debug!(plugin = %name, ?phase, id = tx.id, "transaction callback");

        let before = tx.fingerprint();
        let result = match phase {
            Phase::Begin => plugin.transaction_begin(tx),
            Phase::Validate => plugin.transaction_validate(tx),
            Phase::Complete => plugin.transaction_complete(tx),
            Phase::Commit => plugin.transaction_commit(tx),
            Phase::CommitDone => plugin.transaction_commit_done(tx),
            Phase::End => plugin.transaction_end(tx),
            Phase::Abort => {
                plugin.transaction_abort(tx);
                Ok(())
            }
        };
        if tx.fingerprint() != before {
            error!(
                plugin = %name,
                ?phase,
                "plugin mutated transaction state outside the callback \
                 contract"
            );
            return Err(Error::Plugin(
                name,
                phase,
                "transaction state mutated".to_owned(),
            ));
        }

        result.map_err(|reason| {
            warn!(plugin = %name, ?phase, %reason, "plugin callback failed");
            Error::Plugin(name, phase, reason)
        })
    }

    /// Fans abort out to every plugin that observed `begin`. Abort
    /// callbacks cannot fail the transaction.
    pub fn abort_observers(&mut self, tx: &mut Transaction) {
        for idx in 0..self.plugins.len() {
            let began = tx
                .observed
                .get(idx)
                .map(|bits| bits & phase_bit(Phase::Begin) != 0)
                .unwrap_or(false);
            if !began {
                continue;
            }
            let _ = self.phase_one(idx, Phase::Abort, tx);
        }
    }
}
