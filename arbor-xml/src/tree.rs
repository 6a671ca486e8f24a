//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_yang::{SchemaId, SchemaKeyword, SchemaStore};
use bitflags::bitflags;
use generational_arena::{Arena, Index};

/// Handle to a node inside an [`XmlTree`] arena.
pub type NodeId = Index;

bitflags! {
    /// Transient per-node flags.
    ///
    /// `ADD`/`DEL`/`CHANGE`/`MARK` are owned by the enclosing transaction and
    /// must be cleared before the tree is stored or handed back to a cache.
    /// `DEFAULT` marks leaves that were injected from schema defaults and are
    /// stripped before a tree is written to disk.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct XmlFlags: u16 {
        const ADD = 0x01;
        const DEL = 0x02;
        const CHANGE = 0x04;
        const MARK = 0x08;
        const DEFAULT = 0x10;
    }
}

/// Node variants of the object model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    Element,
    Body,
    Comment,
    Pi,
}

/// A plain (non-namespace-declaration) attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attr {
    pub prefix: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug)]
pub struct XmlNode {
    kind: NodeKind,
    // Local name (elements and PIs; empty for bodies and comments).
    name: String,
    prefix: Option<String>,
    // Body text, comment text or PI content.
    value: Option<String>,
    attrs: Vec<Attr>,
    // Namespace declarations on this element: prefix (None = default) -> URI.
    ns_decls: Vec<(Option<String>, String)>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    schema: Option<SchemaId>,
    flags: XmlFlags,
}

/// An XML tree with exclusive parent-to-child ownership.
///
/// Nodes live in an arena and are addressed by [`NodeId`]; the ids of a tree
/// remain valid across [`Clone`], which is how datastore snapshots are taken.
#[derive(Clone, Debug)]
pub struct XmlTree {
    arena: Arena<XmlNode>,
    root: NodeId,
}

/// Continuation decision for [`XmlTree::apply`] walks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Apply {
    Descend,
    Prune,
}

// ===== impl XmlNode =====

impl XmlNode {
    fn new(kind: NodeKind, name: &str) -> XmlNode {
        XmlNode {
            kind,
            name: name.to_owned(),
            prefix: None,
            value: None,
            attrs: Vec::new(),
            ns_decls: Vec::new(),
            children: Vec::new(),
            parent: None,
            schema: None,
            flags: XmlFlags::empty(),
        }
    }
}

// ===== impl XmlTree =====

impl XmlTree {
    /// Creates a tree consisting of a single root element.
    pub fn new(root_name: &str) -> XmlTree {
        let mut arena = Arena::new();
        let root = arena.insert(XmlNode::new(NodeKind::Element, root_name));
        XmlTree { arena, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// True while `id` is alive in this tree. Ids go stale when their
    /// subtree is purged; the arena's generation counter keeps a stale id
    /// from aliasing a newer node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains(id)
    }

    // ----- node accessors -----

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.arena[id].kind
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.arena[id].name
    }

    pub fn set_name(&mut self, id: NodeId, name: &str) {
        self.arena[id].name = name.to_owned();
    }

    pub fn prefix(&self, id: NodeId) -> Option<&str> {
        self.arena[id].prefix.as_deref()
    }

    pub fn set_prefix(&mut self, id: NodeId, prefix: Option<&str>) {
        self.arena[id].prefix = prefix.map(str::to_owned);
    }

    pub fn value(&self, id: NodeId) -> Option<&str> {
        self.arena[id].value.as_deref()
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) {
        self.arena[id].value = Some(value.to_owned());
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.arena[id].children
    }

    /// Element children, skipping bodies, comments and PIs.
    pub fn child_elements(
        &self,
        id: NodeId,
    ) -> impl Iterator<Item = NodeId> + '_ {
        self.arena[id]
            .children
            .iter()
            .copied()
            .filter(|child| self.arena[*child].kind == NodeKind::Element)
    }

    pub fn schema(&self, id: NodeId) -> Option<SchemaId> {
        self.arena[id].schema
    }

    pub fn set_schema(&mut self, id: NodeId, schema: Option<SchemaId>) {
        self.arena[id].schema = schema;
    }

    pub fn attrs(&self, id: NodeId) -> &[Attr] {
        &self.arena[id].attrs
    }

    pub fn ns_decls(&self, id: NodeId) -> &[(Option<String>, String)] {
        &self.arena[id].ns_decls
    }

    // ----- flags -----

    pub fn flags(&self, id: NodeId) -> XmlFlags {
        self.arena[id].flags
    }

    pub fn flag_set(&mut self, id: NodeId, flags: XmlFlags) {
        self.arena[id].flags.insert(flags);
    }

    pub fn flag_reset(&mut self, id: NodeId, flags: XmlFlags) {
        self.arena[id].flags.remove(flags);
    }

    pub fn flag_test(&self, id: NodeId, flags: XmlFlags) -> bool {
        self.arena[id].flags.intersects(flags)
    }

    /// Sets flags on a node and every element below it.
    pub fn flag_set_subtree(&mut self, id: NodeId, flags: XmlFlags) {
        self.apply_with_self(id, &mut |tree, node| {
            tree.flag_set(node, flags);
            Apply::Descend
        });
    }

    /// Clears flags on a node and every element below it.
    pub fn flag_reset_subtree(&mut self, id: NodeId, flags: XmlFlags) {
        self.apply_with_self(id, &mut |tree, node| {
            tree.flag_reset(node, flags);
            Apply::Descend
        });
    }

    /// True if any node in the tree carries one of the given flags.
    pub fn any_flag(&self, flags: XmlFlags) -> bool {
        self.arena.iter().any(|(_, node)| node.flags.intersects(flags))
    }

    // ----- structural edit -----

    /// Creates a new element under `parent`, appended after its siblings.
    pub fn new_element(
        &mut self,
        parent: NodeId,
        prefix: Option<&str>,
        name: &str,
    ) -> NodeId {
        let mut node = XmlNode::new(NodeKind::Element, name);
        node.prefix = prefix.map(str::to_owned);
        node.parent = Some(parent);
        let id = self.arena.insert(node);
        self.arena[parent].children.push(id);
        id
    }

    pub(crate) fn new_node(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        name: &str,
    ) -> NodeId {
        let mut node = XmlNode::new(kind, name);
        node.parent = Some(parent);
        let id = self.arena.insert(node);
        self.arena[parent].children.push(id);
        id
    }

    /// Replaces the body text of an element.
    pub fn set_body(&mut self, id: NodeId, text: &str) {
        let bodies = self.arena[id]
            .children
            .iter()
            .copied()
            .filter(|child| self.arena[*child].kind == NodeKind::Body)
            .collect::<Vec<_>>();
        for body in bodies {
            self.purge(body);
        }
        let body = self.new_node(id, NodeKind::Body, "");
        self.arena[body].value = Some(text.to_owned());
    }

    /// The body text of an element, if it has one.
    pub fn body(&self, id: NodeId) -> Option<&str> {
        self.arena[id]
            .children
            .iter()
            .find(|child| self.arena[**child].kind == NodeKind::Body)
            .and_then(|child| self.arena[*child].value.as_deref())
    }

    pub fn add_attr(
        &mut self,
        id: NodeId,
        prefix: Option<&str>,
        name: &str,
        value: &str,
    ) {
        self.arena[id].attrs.push(Attr {
            prefix: prefix.map(str::to_owned),
            name: name.to_owned(),
            value: value.to_owned(),
        });
    }

    /// Value of the first attribute with the given local name.
    pub fn attr_value(&self, id: NodeId, name: &str) -> Option<&str> {
        self.arena[id]
            .attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        self.arena[id].attrs.retain(|attr| attr.name != name);
    }

    pub fn add_ns_decl(
        &mut self,
        id: NodeId,
        prefix: Option<&str>,
        uri: &str,
    ) {
        let prefix = prefix.map(str::to_owned);
        let decls = &mut self.arena[id].ns_decls;
        if let Some(decl) = decls.iter_mut().find(|(p, _)| *p == prefix) {
            decl.1 = uri.to_owned();
        } else {
            decls.push((prefix, uri.to_owned()));
        }
    }

    /// Detaches a node from its parent. The node stays alive in the arena and
    /// can be re-attached with [`XmlTree::adopt`]. A stale id is a no-op.
    pub fn detach(&mut self, id: NodeId) {
        if !self.arena.contains(id) {
            return;
        }
        if let Some(parent) = self.arena[id].parent.take() {
            self.arena[parent].children.retain(|child| *child != id);
        }
    }

    /// Detaches `child` from wherever it sits and appends it under `parent`.
    pub fn adopt(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.arena[child].parent = Some(parent);
        self.arena[parent].children.push(child);
    }

    /// Inserts `child` under `parent` at the given sibling position.
    pub fn adopt_at(&mut self, parent: NodeId, child: NodeId, pos: usize) {
        self.detach(child);
        self.arena[child].parent = Some(parent);
        let pos = pos.min(self.arena[parent].children.len());
        self.arena[parent].children.insert(pos, child);
    }

    /// Makes `new_root` the root of the tree, dropping the old root and
    /// everything else outside the new root's subtree.
    pub(crate) fn reroot(&mut self, new_root: NodeId) {
        self.detach(new_root);
        let old_root = self.root;
        self.root = new_root;
        self.purge(old_root);
    }

    /// Removes a node and its whole subtree from the tree.
    pub fn purge(&mut self, id: NodeId) {
        self.detach(id);
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(node) = self.arena.remove(node) {
                stack.extend(node.children);
            }
        }
    }

    /// Removes all children of a node, keeping the node itself.
    pub fn purge_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.arena[id].children);
        for child in children {
            self.arena[child].parent = None;
            let mut stack = vec![child];
            while let Some(node) = stack.pop() {
                if let Some(node) = self.arena.remove(node) {
                    stack.extend(node.children);
                }
            }
        }
    }

    /// Deep-copies a subtree of `src` (which may be this tree or another one)
    /// and appends the copy under `parent`. Transient flags are not copied.
    pub fn copy_from(
        &mut self,
        parent: NodeId,
        src: &XmlTree,
        src_id: NodeId,
    ) -> NodeId {
        let src_node = &src.arena[src_id];
        let mut node = src_node.clone();
        node.children = Vec::new();
        node.parent = Some(parent);
        node.flags = XmlFlags::empty();
        let id = self.arena.insert(node);
        self.arena[parent].children.push(id);
        for child in &src.arena[src_id].children {
            self.copy_from(id, src, *child);
        }
        id
    }

    // ----- namespaces -----

    /// Resolves a prefix in the scope of `id` by walking toward the root.
    /// `None` resolves the default namespace.
    pub fn resolve_prefix(
        &self,
        id: NodeId,
        prefix: Option<&str>,
    ) -> Option<&str> {
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            for (decl_prefix, uri) in &self.arena[node].ns_decls {
                if decl_prefix.as_deref() == prefix {
                    return Some(uri);
                }
            }
            cursor = self.arena[node].parent;
        }
        None
    }

    /// The effective namespace of an element: its prefix (or the default
    /// namespace) resolved in its own scope.
    pub fn namespace(&self, id: NodeId) -> Option<&str> {
        self.resolve_prefix(id, self.arena[id].prefix.as_deref())
    }

    // ----- lookup -----

    /// First child element with the given local name, and namespace if one is
    /// requested.
    pub fn find_child(
        &self,
        id: NodeId,
        ns: Option<&str>,
        name: &str,
    ) -> Option<NodeId> {
        self.child_elements(id).find(|child| {
            self.arena[*child].name == name
                && (ns.is_none() || self.namespace(*child) == ns)
        })
    }

    /// Body text of the first child element with the given local name.
    pub fn find_body(&self, id: NodeId, name: &str) -> Option<&str> {
        self.find_child(id, None, name).and_then(|child| self.body(child))
    }

    // ----- traversal -----

    /// Applies `f` to every element strictly below `top`, pre-order. The
    /// callback may mutate the tree; it sees each node before its children
    /// and can prune descent.
    pub fn apply<F>(&mut self, top: NodeId, f: &mut F)
    where
        F: FnMut(&mut XmlTree, NodeId) -> Apply,
    {
        let children = self
            .child_elements(top)
            .collect::<Vec<_>>();
        for child in children {
            if !self.arena.contains(child) {
                continue;
            }
            if f(self, child) == Apply::Descend {
                self.apply(child, f);
            }
        }
    }

    /// Like [`XmlTree::apply`], but visits `top` itself first.
    pub fn apply_with_self<F>(&mut self, top: NodeId, f: &mut F)
    where
        F: FnMut(&mut XmlTree, NodeId) -> Apply,
    {
        if f(self, top) == Apply::Descend {
            self.apply(top, f);
        }
    }

    /// Applies `f` to every ancestor of `id`, from its parent toward the
    /// root.
    pub fn apply_ancestors<F>(&mut self, id: NodeId, f: &mut F)
    where
        F: FnMut(&mut XmlTree, NodeId),
    {
        let mut cursor = self.arena[id].parent;
        while let Some(node) = cursor {
            f(self, node);
            cursor = self.arena[node].parent;
        }
    }

    /// Read-only pre-order traversal of the elements below `top`, inclusive.
    pub fn traverse(&self, top: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![top];
        while let Some(node) = stack.pop() {
            out.push(node);
            let children = self.child_elements(node).collect::<Vec<_>>();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    // ----- schema-directed operations -----

    /// The key tuple of a bound list entry, in schema key order. Missing key
    /// leaves yield empty strings so callers can still report the violation.
    pub fn list_key_tuple(
        &self,
        id: NodeId,
        store: &SchemaStore,
    ) -> Vec<String> {
        let Some(schema) = self.arena[id].schema else {
            return Vec::new();
        };
        store
            .node(schema)
            .list_keys()
            .iter()
            .map(|key| {
                self.find_body(id, key).unwrap_or_default().to_owned()
            })
            .collect()
    }

    /// Sorts list and leaf-list siblings into schema order, recursively.
    ///
    /// System-ordered entries sort by key tuple (lists) or body value
    /// (leaf-lists); user-ordered entries and unbound nodes keep insertion
    /// order. The sort is stable, so interleaved unrelated siblings are
    /// grouped by their schema position without reordering among themselves.
    pub fn sort_by_schema(&mut self, store: &SchemaStore) {
        self.sort_by_schema_at(self.root, store);
    }

    fn sort_by_schema_at(&mut self, id: NodeId, store: &SchemaStore) {
        let mut children = std::mem::take(&mut self.arena[id].children);
        children.sort_by_cached_key(|child| self.sibling_sort_key(*child, store));
        self.arena[id].children = children;

        let children = self.child_elements(id).collect::<Vec<_>>();
        for child in children {
            self.sort_by_schema_at(child, store);
        }
    }

    fn sibling_sort_key(
        &self,
        id: NodeId,
        store: &SchemaStore,
    ) -> (usize, Vec<String>) {
        let node = &self.arena[id];
        if node.kind != NodeKind::Element {
            // Bodies stay in front of any element siblings.
            return (0, Vec::new());
        }
        let Some(schema) = node.schema else {
            return (usize::MAX, Vec::new());
        };
        let rank = store.sibling_rank(schema);
        let snode = store.node(schema);
        if snode.ordered_by_user() {
            return (rank, Vec::new());
        }
        let key = match snode.keyword() {
            SchemaKeyword::List => self.list_key_tuple(id, store),
            SchemaKeyword::LeafList => {
                vec![self.body(id).unwrap_or_default().to_owned()]
            }
            _ => Vec::new(),
        };
        (rank, key)
    }

    // ----- comparison -----

    /// Structural equality of two subtrees: names, namespaces, attributes and
    /// body text, ignoring transient flags, comments and PIs.
    pub fn subtree_eq(
        &self,
        a: NodeId,
        other: &XmlTree,
        b: NodeId,
    ) -> bool {
        let na = &self.arena[a];
        let nb = &other.arena[b];
        if na.name != nb.name
            || self.namespace(a) != other.namespace(b)
            || self.body(a) != other.body(b)
            || na.attrs != nb.attrs
        {
            return false;
        }
        let ca = self.child_elements(a).collect::<Vec<_>>();
        let cb = other.child_elements(b).collect::<Vec<_>>();
        ca.len() == cb.len()
            && ca
                .iter()
                .zip(cb.iter())
                .all(|(a, b)| self.subtree_eq(*a, other, *b))
    }
}

impl PartialEq for XmlTree {
    fn eq(&self, other: &XmlTree) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }
}
