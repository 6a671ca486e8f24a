//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_xml::{NodeId, XmlTree};
use arbor_yang::{SchemaId, SchemaStore};

use crate::error::Error;
use crate::netconf::{RpcError, Validity, instance_path};

/// How a tree gets attached to the schema.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindMode {
    /// Raw parse, no schema attachment.
    None,
    /// Attach a subtree using its parent's existing schema link.
    Parent,
    /// Attach a whole tree by walking the module set from the top.
    Module,
    /// Attach the tree as the input of the rpc named by its root.
    Rpc,
}

/// Binds every element of `tree` to its schema node.
///
/// Returns `Invalid` (not an error) when an element has no schema
/// counterpart: unknown namespaces and unknown elements are client
/// mistakes, reported with the NETCONF tags of those names.
pub fn bind(
    tree: &mut XmlTree,
    store: &SchemaStore,
    mode: BindMode,
) -> Result<Validity, Error> {
    match mode {
        BindMode::None => Ok(Validity::Valid),
        BindMode::Module => {
            let root = tree.root();
            bind_children(tree, store, root, None)
        }
        BindMode::Parent => {
            // The root's own link plays the parent role; an unbound root
            // (the datastore `<config>` element) degrades to module walk.
            let root = tree.root();
            let parent_schema = tree.schema(root);
            bind_children(tree, store, root, parent_schema)
        }
        BindMode::Rpc => bind_rpc(tree, store),
    }
}

/// Binds the subtree rooted at `id`, whose parent is already bound (or is
/// the datastore root).
pub fn bind_subtree(
    tree: &mut XmlTree,
    store: &SchemaStore,
    id: NodeId,
) -> Result<Validity, Error> {
    let parent_schema =
        tree.parent(id).and_then(|parent| tree.schema(parent));
    let namespace = tree.namespace(id).map(str::to_owned);
    let Some(schema) = store.find_data_child(
        parent_schema,
        namespace.as_deref(),
        tree.name(id),
    ) else {
        return Ok(Validity::Invalid(unknown_node(tree, store, id)));
    };
    tree.set_schema(id, Some(schema));
    bind_children(tree, store, id, Some(schema))
}

// ===== helper functions =====

fn bind_children(
    tree: &mut XmlTree,
    store: &SchemaStore,
    parent: NodeId,
    parent_schema: Option<SchemaId>,
) -> Result<Validity, Error> {
    let children = tree.child_elements(parent).collect::<Vec<_>>();
    for child in children {
        let namespace = tree.namespace(child).map(str::to_owned);
        if namespace.is_none() && parent_schema.is_none() {
            return Ok(Validity::Invalid(
                RpcError::unknown_namespace("")
                    .with_message(format!(
                        "top-level element \"{}\" has no namespace",
                        tree.name(child)
                    )),
            ));
        }
        let Some(schema) = store.find_data_child(
            parent_schema,
            namespace.as_deref(),
            tree.name(child),
        ) else {
            return Ok(Validity::Invalid(unknown_node(tree, store, child)));
        };
        tree.set_schema(child, Some(schema));
        match bind_children(tree, store, child, Some(schema))? {
            Validity::Valid => (),
            invalid => return Ok(invalid),
        }
    }
    Ok(Validity::Valid)
}

fn bind_rpc(
    tree: &mut XmlTree,
    store: &SchemaStore,
) -> Result<Validity, Error> {
    let root = tree.root();
    let namespace = tree.namespace(root).map(str::to_owned);
    let Some(namespace) = namespace else {
        return Ok(Validity::Invalid(RpcError::unknown_namespace("")
            .with_message("rpc without a namespace".to_owned())));
    };
    let Some(rpc) = store.lookup_rpc(&namespace, tree.name(root)) else {
        return Ok(Validity::Invalid(
            RpcError::unknown_element(tree.name(root)).with_message(
                format!("unknown rpc \"{}\"", tree.name(root)),
            ),
        ));
    };
    tree.set_schema(root, Some(rpc));
    // Payload children bind under the rpc input block.
    let input = store
        .node(rpc)
        .children()
        .iter()
        .copied()
        .find(|child| {
            store.node(*child).keyword()
                == arbor_yang::SchemaKeyword::RpcInput
        });
    bind_children(tree, store, root, input.or(Some(rpc)))
}

fn unknown_node(
    tree: &XmlTree,
    store: &SchemaStore,
    id: NodeId,
) -> RpcError {
    let name = tree.name(id);
    match tree.namespace(id) {
        Some(namespace)
            if store.module_for_namespace(namespace).is_none() =>
        {
            RpcError::unknown_namespace(namespace).with_message(format!(
                "element \"{name}\" is in an unknown namespace"
            ))
        }
        _ => RpcError::unknown_element(name)
            .with_path(instance_path(tree, store, id))
            .with_message(format!("\"{name}\" has no schema counterpart")),
    }
}
