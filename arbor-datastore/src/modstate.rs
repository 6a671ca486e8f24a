//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_xml::{NodeId, XmlTree};
use arbor_yang::SchemaStore;

pub const YANG_LIBRARY_NS: &str =
    "urn:ietf:params:xml:ns:yang:ietf-yang-library";

/// The set of {module, revision} tuples in effect when a datastore was
/// last written. Serialized next to the content and compared against the
/// running schema on read.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModState {
    modules: Vec<(String, Option<String>)>,
}

/// What changed between a stored module-state and the current schema.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModChange {
    Unchanged(String),
    /// In the schema now, absent when the data was written.
    Added(String),
    /// Present when the data was written, gone from the schema.
    Removed(String),
    RevisionChanged {
        module: String,
        from: String,
        to: String,
    },
}

/// Per-module comparison result; `recorded` is false when the datastore
/// carried no module-state at all (bootstrap).
#[derive(Clone, Debug, Default)]
pub struct ModStateDiff {
    pub recorded: bool,
    pub changes: Vec<ModChange>,
}

// ===== impl ModState =====

impl ModState {
    /// Captures the module set of the running schema.
    pub fn from_schema(store: &SchemaStore) -> ModState {
        ModState {
            modules: store
                .modules()
                .map(|module| (module.name.clone(), module.revision.clone()))
                .collect(),
        }
    }

    /// Parses a `<yang-library>` block.
    pub fn from_xml(tree: &XmlTree, yang_library: NodeId) -> ModState {
        let mut modules = Vec::new();
        let module_set = tree
            .find_child(yang_library, None, "module-set")
            .unwrap_or(yang_library);
        for module in tree.child_elements(module_set) {
            if tree.name(module) != "module" {
                continue;
            }
            let Some(name) = tree.find_body(module, "name") else {
                continue;
            };
            let revision = tree
                .find_body(module, "revision")
                .filter(|revision| !revision.is_empty())
                .map(str::to_owned);
            modules.push((name.to_owned(), revision));
        }
        ModState { modules }
    }

    /// Appends this module-state as the `<yang-library>` first child of
    /// `parent`.
    pub fn attach(&self, tree: &mut XmlTree, parent: NodeId) {
        let yang_library = tree.new_element(parent, None, "yang-library");
        tree.add_ns_decl(yang_library, None, YANG_LIBRARY_NS);
        let module_set = tree.new_element(yang_library, None, "module-set");
        for (name, revision) in &self.modules {
            let module = tree.new_element(module_set, None, "module");
            let name_node = tree.new_element(module, None, "name");
            tree.set_body(name_node, name);
            if let Some(revision) = revision {
                let revision_node = tree.new_element(module, None, "revision");
                tree.set_body(revision_node, revision);
            }
        }
        // Keep the block in front of the configuration content.
        tree.adopt_at(parent, yang_library, 0);
    }

    /// Compares a stored module-state against the current schema.
    pub fn diff(&self, current: &ModState) -> ModStateDiff {
        let mut changes = Vec::new();
        for (name, stored_revision) in &self.modules {
            match current
                .modules
                .iter()
                .find(|(current_name, _)| current_name == name)
            {
                None => changes.push(ModChange::Removed(name.clone())),
                Some((_, current_revision))
                    if current_revision == stored_revision =>
                {
                    changes.push(ModChange::Unchanged(name.clone()));
                }
                Some((_, current_revision)) => {
                    changes.push(ModChange::RevisionChanged {
                        module: name.clone(),
                        from: stored_revision.clone().unwrap_or_default(),
                        to: current_revision.clone().unwrap_or_default(),
                    });
                }
            }
        }
        for (name, _) in &current.modules {
            if !self.modules.iter().any(|(stored, _)| stored == name) {
                changes.push(ModChange::Added(name.clone()));
            }
        }
        ModStateDiff {
            recorded: true,
            changes,
        }
    }
}

// ===== impl ModStateDiff =====

impl ModStateDiff {
    /// True when nothing needs upgrading.
    pub fn is_clean(&self) -> bool {
        self.changes.iter().all(|change| {
            matches!(change, ModChange::Unchanged(_) | ModChange::Added(_))
        })
    }

    pub fn revision_changes(
        &self,
    ) -> impl Iterator<Item = (&str, &str, &str)> + '_ {
        self.changes.iter().filter_map(|change| match change {
            ModChange::RevisionChanged { module, from, to } => {
                Some((module.as_str(), from.as_str(), to.as_str()))
            }
            _ => None,
        })
    }
}
