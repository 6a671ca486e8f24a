//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use crate::tree::{NodeId, XmlTree};

/// A namespace context: the set of prefix-to-URI bindings in scope at some
/// point, detached from any tree. `None` keys the default namespace.
///
/// XPath expressions are always evaluated under an explicit context taken
/// from their defining statement (a YANG `when`/`must`/`path`, or a changelog
/// step), never from the evaluation point.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NsCtx(BTreeMap<Option<String>, String>);

// ===== impl NsCtx =====

impl NsCtx {
    pub fn new() -> NsCtx {
        NsCtx::default()
    }

    /// Collects every namespace binding in scope at `id`, nearest declaration
    /// winning.
    pub fn from_node(tree: &XmlTree, id: NodeId) -> NsCtx {
        let mut nsctx = NsCtx::new();
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            for (prefix, uri) in tree.ns_decls(node) {
                nsctx
                    .0
                    .entry(prefix.clone())
                    .or_insert_with(|| uri.clone());
            }
            cursor = tree.parent(node);
        }
        nsctx
    }

    pub fn insert(&mut self, prefix: Option<&str>, uri: &str) {
        self.0.insert(prefix.map(str::to_owned), uri.to_owned());
    }

    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.0
            .iter()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (Option<&str>, &str)> + '_ {
        self.0
            .iter()
            .map(|(prefix, uri)| (prefix.as_deref(), uri.as_str()))
    }
}
