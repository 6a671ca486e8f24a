//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_data::bind::bind_subtree;
use arbor_data::netconf::{RpcError, Validity};
use arbor_xml::{NodeId, XmlTree};
use arbor_yang::{SchemaKeyword, SchemaStore};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// NETCONF edit-config operations (RFC 6241 §7.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum EditOp {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
}

// ===== impl EditOp =====

impl EditOp {
    pub fn from_str(value: &str) -> Option<EditOp> {
        let op = match value {
            "merge" => EditOp::Merge,
            "replace" => EditOp::Replace,
            "create" => EditOp::Create,
            "delete" => EditOp::Delete,
            "remove" => EditOp::Remove,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EditOp::Merge => "merge",
            EditOp::Replace => "replace",
            EditOp::Create => "create",
            EditOp::Delete => "delete",
            EditOp::Remove => "remove",
        }
    }
}

/// Applies an edit tree to a base tree with the given default operation.
///
/// Per-node `operation` attributes override the inherited operation. The
/// base tree is modified in place; the caller provides a scratch copy and
/// discards it if the result is `Invalid`, which is what makes `put`
/// atomic per call.
pub fn apply_edit(
    base: &mut XmlTree,
    edit: &XmlTree,
    op: EditOp,
    store: &SchemaStore,
) -> Result<Validity, Error> {
    let base_root = base.root();
    let edit_root = edit.root();
    apply_children(base, base_root, edit, edit_root, op, store)
}

// ===== helper functions =====

fn apply_children(
    base: &mut XmlTree,
    base_parent: NodeId,
    edit: &XmlTree,
    edit_parent: NodeId,
    inherited: EditOp,
    store: &SchemaStore,
) -> Result<Validity, Error> {
    for edit_child in edit.child_elements(edit_parent).collect::<Vec<_>>() {
        let op = match edit.attr_value(edit_child, "operation") {
            Some(value) => EditOp::from_str(value).ok_or_else(|| {
                Error::Invalid(RpcError::invalid_value(format!(
                    "unknown operation \"{value}\""
                )))
            })?,
            None => inherited,
        };
        match apply_node(base, base_parent, edit, edit_child, op, store)? {
            Validity::Valid => (),
            invalid => return Ok(invalid),
        }
    }
    Ok(Validity::Valid)
}

fn apply_node(
    base: &mut XmlTree,
    base_parent: NodeId,
    edit: &XmlTree,
    edit_node: NodeId,
    op: EditOp,
    store: &SchemaStore,
) -> Result<Validity, Error> {
    let existing = find_match(base, base_parent, edit, edit_node, store);
    match op {
        EditOp::Merge => match existing {
            Some(base_node) => {
                if edit
                    .child_elements(edit_node)
                    .next()
                    .is_none()
                {
                    // Leaf (or empty node): merge replaces the value.
                    if let Some(body) = edit.body(edit_node) {
                        let body = body.to_owned();
                        base.set_body(base_node, &body);
                    }
                    Ok(Validity::Valid)
                } else {
                    apply_children(base, base_node, edit, edit_node, op, store)
                }
            }
            None => {
                copy_without_operation(base, base_parent, edit, edit_node, store)
            }
        },
        EditOp::Replace => {
            if let Some(base_node) = existing {
                base.purge(base_node);
            }
            copy_without_operation(base, base_parent, edit, edit_node, store)
        }
        EditOp::Create => match existing {
            Some(_) => Ok(Validity::Invalid(
                RpcError::data_exists(format!(
                    "/{}",
                    edit.name(edit_node)
                ))
                .with_message(format!(
                    "\"{}\" already exists",
                    edit.name(edit_node)
                )),
            )),
            None => {
                copy_without_operation(base, base_parent, edit, edit_node, store)
            }
        },
        EditOp::Delete => match existing {
            Some(base_node) => {
                base.purge(base_node);
                Ok(Validity::Valid)
            }
            None => Ok(Validity::Invalid(
                RpcError::data_missing(format!(
                    "/{}",
                    edit.name(edit_node)
                ))
                .with_message(format!(
                    "\"{}\" does not exist",
                    edit.name(edit_node)
                )),
            )),
        },
        EditOp::Remove => {
            if let Some(base_node) = existing {
                base.purge(base_node);
            }
            Ok(Validity::Valid)
        }
    }
}

// Matches an edit node against the base parent's children: same name and
// namespace, and for bound lists/leaf-lists the same key tuple or value.
fn find_match(
    base: &XmlTree,
    base_parent: NodeId,
    edit: &XmlTree,
    edit_node: NodeId,
    store: &SchemaStore,
) -> Option<NodeId> {
    let name = edit.name(edit_node);
    let namespace = edit.namespace(edit_node);
    base.child_elements(base_parent).find(|base_child| {
        if base.name(*base_child) != name
            || base.namespace(*base_child) != namespace
        {
            return false;
        }
        match base
            .schema(*base_child)
            .map(|schema| store.node(schema).keyword())
        {
            Some(SchemaKeyword::List) => {
                let schema = base.schema(*base_child).unwrap();
                let keys = store.node(schema).list_keys();
                keys.iter().all(|key| {
                    base.find_body(*base_child, key)
                        == edit.find_body(edit_node, key)
                })
            }
            Some(SchemaKeyword::LeafList) => {
                base.body(*base_child) == edit.body(edit_node)
            }
            _ => true,
        }
    })
}

// Deep copy that drops the edit-config operation attributes on the way
// and binds the new subtree, so later siblings of the same edit can match
// against it key-wise.
fn copy_without_operation(
    base: &mut XmlTree,
    base_parent: NodeId,
    edit: &XmlTree,
    edit_node: NodeId,
    store: &SchemaStore,
) -> Result<Validity, Error> {
    let copy = base.copy_from(base_parent, edit, edit_node);
    let mut stack = vec![copy];
    while let Some(node) = stack.pop() {
        base.remove_attr(node, "operation");
        let children = base.child_elements(node).collect::<Vec<_>>();
        stack.extend(children);
    }
    Ok(bind_subtree(base, store, copy)?)
}
