//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_xml::{Apply, NodeId, XmlFlags, XmlTree};
use arbor_yang::{SchemaId, SchemaKeyword, SchemaStore};

/// Injects schema defaults into a bound tree.
///
/// Leaves with a default and no instance are created with the `DEFAULT`
/// flag, globally for top-level leaves and recursively under every present
/// container and list entry. Non-presence containers on the way down to a
/// defaulted leaf are materialized too (and flagged), so validation sees
/// the effective configuration. [`strip_defaults`] removes everything this
/// added before a tree is stored.
pub fn add_defaults(tree: &mut XmlTree, store: &SchemaStore) {
    let root = tree.root();
    let top = store.top_nodes().to_vec();
    add_defaults_under(tree, store, root, &top);
}

/// Removes every node carrying the `DEFAULT` flag. This is the cache-clear
/// path: stored trees never contain injected defaults.
pub fn strip_defaults(tree: &mut XmlTree) {
    let root = tree.root();
    let mut defaulted = Vec::new();
    tree.apply(root, &mut |tree, node| {
        if tree.flag_test(node, XmlFlags::DEFAULT) {
            defaulted.push(node);
            Apply::Prune
        } else {
            Apply::Descend
        }
    });
    for node in defaulted {
        tree.purge(node);
    }
}

// ===== helper functions =====

fn add_defaults_under(
    tree: &mut XmlTree,
    store: &SchemaStore,
    parent: NodeId,
    schema_children: &[SchemaId],
) {
    for schema in schema_children {
        let snode = store.node(*schema);
        match snode.keyword() {
            SchemaKeyword::Choice | SchemaKeyword::Case => {
                // Transparent for default purposes only when a member is
                // already present; defaults never pick a case.
                continue;
            }
            SchemaKeyword::Leaf => {
                let Some(default) = snode.default_value() else {
                    continue;
                };
                if find_instance(tree, parent, *schema).is_none() {
                    let default = default.to_owned();
                    let element =
                        tree.new_element(parent, None, snode.name());
                    tree.add_ns_decl(element, None, snode.namespace());
                    tree.set_body(element, &default);
                    tree.flag_set(element, XmlFlags::DEFAULT);
                    tree.set_schema(element, Some(*schema));
                }
            }
            SchemaKeyword::Container if !snode.presence() => {
                let children = snode.children().to_vec();
                match find_instance(tree, parent, *schema) {
                    Some(instance) => {
                        add_defaults_under(tree, store, instance, &children);
                    }
                    None if subtree_has_defaults(store, *schema) => {
                        let element =
                            tree.new_element(parent, None, snode.name());
                        tree.add_ns_decl(element, None, snode.namespace());
                        tree.flag_set(element, XmlFlags::DEFAULT);
                        tree.set_schema(element, Some(*schema));
                        add_defaults_under(tree, store, element, &children);
                    }
                    None => (),
                }
            }
            SchemaKeyword::Container | SchemaKeyword::List => {
                // Presence containers and list entries receive defaults
                // only where an instance exists.
                let children = snode.children().to_vec();
                let instances = tree
                    .child_elements(parent)
                    .filter(|child| tree.schema(*child) == Some(*schema))
                    .collect::<Vec<_>>();
                for instance in instances {
                    add_defaults_under(tree, store, instance, &children);
                }
            }
            _ => (),
        }
    }
}

fn find_instance(
    tree: &XmlTree,
    parent: NodeId,
    schema: SchemaId,
) -> Option<NodeId> {
    tree.child_elements(parent)
        .find(|child| tree.schema(*child) == Some(schema))
}

fn subtree_has_defaults(store: &SchemaStore, schema: SchemaId) -> bool {
    let snode = store.node(schema);
    match snode.keyword() {
        SchemaKeyword::Leaf => snode.default_value().is_some(),
        SchemaKeyword::Container if !snode.presence() => snode
            .children()
            .iter()
            .any(|child| subtree_has_defaults(store, *child)),
        _ => false,
    }
}
