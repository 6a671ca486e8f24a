//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use arbor_xml::{NodeId, XmlTree};
use arbor_yang::{SchemaKeyword, SchemaStore};

/// The three index-aligned collections a transaction is built from.
///
/// `deleted` holds nodes present only in the source tree, `added` nodes
/// present only in the target tree, and `changed_src[i]`/`changed_target[i]`
/// are the two endpoints of the i-th value change. Node ids refer into
/// their respective trees.
#[derive(Debug, Default)]
pub struct Diff {
    pub deleted: Vec<NodeId>,
    pub added: Vec<NodeId>,
    pub changed_src: Vec<NodeId>,
    pub changed_target: Vec<NodeId>,
}

// ===== impl Diff =====

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.added.is_empty()
            && self.changed_src.is_empty()
    }

    pub fn touched(&self) -> usize {
        self.deleted.len() + self.added.len() + self.changed_src.len()
    }
}

/// Computes the diff between two bound trees sharing a schema.
///
/// List entries are matched by their full key tuple and leaf-lists by
/// value, so a re-keyed entry is a delete plus an add, never a change.
/// Wholly added or deleted subtrees are reported at their root only.
pub fn diff(src: &XmlTree, target: &XmlTree, store: &SchemaStore) -> Diff {
    let mut out = Diff::default();
    diff_children(src, src.root(), target, target.root(), store, &mut out);
    out
}

// ===== helper functions =====

// The identity of a node among its siblings: name, namespace, and the
// schema-directed tiebreak (key tuple or leaf-list value).
fn sibling_key(
    tree: &XmlTree,
    node: NodeId,
    store: &SchemaStore,
) -> Vec<String> {
    let mut key = vec![
        tree.name(node).to_owned(),
        tree.namespace(node).unwrap_or("").to_owned(),
    ];
    if let Some(schema) = tree.schema(node) {
        match store.node(schema).keyword() {
            SchemaKeyword::List => {
                key.extend(tree.list_key_tuple(node, store));
            }
            SchemaKeyword::LeafList => {
                key.push(tree.body(node).unwrap_or("").to_owned());
            }
            _ => (),
        }
    }
    key
}

fn diff_children(
    src: &XmlTree,
    src_node: NodeId,
    target: &XmlTree,
    target_node: NodeId,
    store: &SchemaStore,
    out: &mut Diff,
) {
    // Group both sibling lists by identity; duplicate identities (possible
    // only in invalid input) pair up in order.
    let mut src_index: BTreeMap<Vec<String>, Vec<NodeId>> = BTreeMap::new();
    for child in src.child_elements(src_node) {
        src_index
            .entry(sibling_key(src, child, store))
            .or_default()
            .push(child);
    }
    let mut target_index: BTreeMap<Vec<String>, Vec<NodeId>> =
        BTreeMap::new();
    for child in target.child_elements(target_node) {
        target_index
            .entry(sibling_key(target, child, store))
            .or_default()
            .push(child);
    }

    for (key, src_nodes) in &src_index {
        let empty = Vec::new();
        let target_nodes = target_index.get(key).unwrap_or(&empty);
        for (idx, src_child) in src_nodes.iter().enumerate() {
            match target_nodes.get(idx) {
                Some(target_child) => {
                    diff_matched(
                        src,
                        *src_child,
                        target,
                        *target_child,
                        store,
                        out,
                    );
                }
                None => out.deleted.push(*src_child),
            }
        }
        // Extra target nodes under the same identity are additions.
        for target_child in target_nodes.iter().skip(src_nodes.len()) {
            out.added.push(*target_child);
        }
    }
    for (key, target_nodes) in &target_index {
        if !src_index.contains_key(key) {
            out.added.extend(target_nodes.iter().copied());
        }
    }
}

fn diff_matched(
    src: &XmlTree,
    src_node: NodeId,
    target: &XmlTree,
    target_node: NodeId,
    store: &SchemaStore,
    out: &mut Diff,
) {
    let leafy = src
        .schema(src_node)
        .map(|schema| store.node(schema).is_leafy())
        .unwrap_or_else(|| src.child_elements(src_node).next().is_none());
    if leafy {
        if src.body(src_node) != target.body(target_node) {
            out.changed_src.push(src_node);
            out.changed_target.push(target_node);
        }
        return;
    }
    diff_children(src, src_node, target, target_node, store, out);
}
