//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::debug;

use arbor_data::diff;
use arbor_data::netconf::instance_path;
use arbor_xml::{NodeId, XmlFlags, XmlTree};
use arbor_yang::SchemaStore;

/// How a node was touched by a transaction, as seen by plugins.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Changed,
}

/// One configuration transition: the tree we are going from, the tree we
/// are going to, and the three aligned diff collections between them.
///
/// The transaction owns both trees for its whole life; the per-node
/// `ADD`/`DEL`/`CHANGE` flags it sets are the only contract between the
/// diff and the plugins, and die with it.
#[derive(Debug)]
pub struct Transaction {
    pub id: u64,
    // Source state, typically a copy of running. Empty at startup.
    pub src: XmlTree,
    // The wanted state.
    pub target: XmlTree,
    // Nodes only in src.
    pub deleted: Vec<NodeId>,
    // Nodes only in target.
    pub added: Vec<NodeId>,
    // Value changes, source and target endpoints index-aligned.
    pub changed_src: Vec<NodeId>,
    pub changed_target: Vec<NodeId>,
    // Per-plugin phase-delivery bookkeeping, managed by the bus.
    pub(crate) observed: Vec<u8>,
}

// ===== impl Transaction =====

impl Transaction {
    pub fn new(id: u64, src: XmlTree, target: XmlTree) -> Transaction {
        Transaction {
            id,
            src,
            target,
            deleted: Vec::new(),
            added: Vec::new(),
            changed_src: Vec::new(),
            changed_target: Vec::new(),
            observed: Vec::new(),
        }
    }

    /// Diffs src against target and marks the transient flags: `DEL` and
    /// `ADD` recursively over removed/added subtrees, `CHANGE` on changed
    /// endpoints, and `CHANGE` up every ancestor of every touched node.
    pub fn compute_diff(&mut self, store: &SchemaStore) {
        let result = diff::diff(&self.src, &self.target, store);
        self.deleted = result.deleted;
        self.added = result.added;
        self.changed_src = result.changed_src;
        self.changed_target = result.changed_target;
        self.mark_flags();
    }

    /// Handcrafts an all-additions transition (the startup path): every
    /// top-level element of the target is an added subtree.
    pub fn mark_all_added(&mut self) {
        self.added = self.target.child_elements(self.target.root()).collect();
        self.mark_flags();
    }

    fn mark_flags(&mut self) {
        for node in self.deleted.clone() {
            self.src.flag_set_subtree(node, XmlFlags::DEL);
            self.src.apply_ancestors(node, &mut |tree, ancestor| {
                tree.flag_set(ancestor, XmlFlags::CHANGE);
            });
        }
        for node in self.added.clone() {
            self.target.flag_set_subtree(node, XmlFlags::ADD);
            self.target.apply_ancestors(node, &mut |tree, ancestor| {
                tree.flag_set(ancestor, XmlFlags::CHANGE);
            });
        }
        for node in self.changed_src.clone() {
            self.src.flag_set(node, XmlFlags::CHANGE);
            self.src.apply_ancestors(node, &mut |tree, ancestor| {
                tree.flag_set(ancestor, XmlFlags::CHANGE);
            });
        }
        for node in self.changed_target.clone() {
            self.target.flag_set(node, XmlFlags::CHANGE);
            self.target.apply_ancestors(node, &mut |tree, ancestor| {
                tree.flag_set(ancestor, XmlFlags::CHANGE);
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.added.is_empty()
            && self.changed_src.is_empty()
    }

    /// The typed view over the flag bitset: how a target-tree node was
    /// touched, if at all.
    pub fn classify(&self, node: NodeId) -> Option<ChangeKind> {
        let flags = self.target.flags(node);
        if flags.contains(XmlFlags::ADD) {
            Some(ChangeKind::Added)
        } else if flags.contains(XmlFlags::CHANGE) {
            Some(ChangeKind::Changed)
        } else {
            None
        }
    }

    /// Same, for nodes of the source tree (deletions live there).
    pub fn classify_src(&self, node: NodeId) -> Option<ChangeKind> {
        let flags = self.src.flags(node);
        if flags.contains(XmlFlags::DEL) {
            Some(ChangeKind::Deleted)
        } else if flags.contains(XmlFlags::CHANGE) {
            Some(ChangeKind::Changed)
        } else {
            None
        }
    }

    /// Logs the transition at debug level, one line per touched node.
    pub fn debug_dump(&self, store: &SchemaStore) {
        for node in &self.deleted {
            debug!(
                id = self.id,
                path = %instance_path(&self.src, store, *node),
                "transaction delete"
            );
        }
        for node in &self.added {
            debug!(
                id = self.id,
                path = %instance_path(&self.target, store, *node),
                "transaction add"
            );
        }
        for (src, target) in self.changed_src.iter().zip(&self.changed_target)
        {
            debug!(
                id = self.id,
                path = %instance_path(&self.target, store, *target),
                from = %self.src.body(*src).unwrap_or(""),
                to = %self.target.body(*target).unwrap_or(""),
                "transaction change"
            );
        }
    }

    // A cheap fingerprint of the transaction-visible state, used by the
    // plugin bus to detect callbacks that mutate what they were shown.
    pub(crate) fn fingerprint(&self) -> u64 {
        let mut hash = 0xcbf2_9ce4_8422_2325u64;
        for len in [
            self.deleted.len(),
            self.added.len(),
            self.changed_src.len(),
            self.changed_target.len(),
            self.src.traverse(self.src.root()).len(),
            self.target.traverse(self.target.root()).len(),
        ] {
            hash ^= len as u64;
            hash = hash.wrapping_mul(0x100_0000_01b3);
        }
        hash
    }
}
