//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt::Write;

use crate::tree::{NodeId, NodeKind, XmlTree};

/// Serializes a subtree to a string. `pretty` adds two-space indentation and
/// newlines; the compact form is byte-stable and used for datastore files.
pub fn to_string(tree: &XmlTree, id: NodeId, pretty: bool) -> String {
    let mut out = String::new();
    write_node(&mut out, tree, id, pretty, 0);
    out
}

/// Serializes a whole tree from its root.
pub fn tree_to_string(tree: &XmlTree, pretty: bool) -> String {
    to_string(tree, tree.root(), pretty)
}

/// Encodes the five XML special characters. Applied to bodies and attribute
/// values on output; everything else is written verbatim.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn write_node(
    out: &mut String,
    tree: &XmlTree,
    id: NodeId,
    pretty: bool,
    level: usize,
) {
    match tree.kind(id) {
        NodeKind::Element => write_element(out, tree, id, pretty, level),
        NodeKind::Body => {
            let _ = write!(out, "{}", escape(tree.value(id).unwrap_or("")));
        }
        NodeKind::Comment => {
            indent(out, pretty, level);
            let _ = write!(out, "<!--{}-->", tree.value(id).unwrap_or(""));
            newline(out, pretty);
        }
        NodeKind::Pi => {
            indent(out, pretty, level);
            let _ = write!(
                out,
                "<?{} {}?>",
                tree.name(id),
                tree.value(id).unwrap_or("")
            );
            newline(out, pretty);
        }
    }
}

fn write_element(
    out: &mut String,
    tree: &XmlTree,
    id: NodeId,
    pretty: bool,
    level: usize,
) {
    let qname = match tree.prefix(id) {
        Some(prefix) => format!("{}:{}", prefix, tree.name(id)),
        None => tree.name(id).to_owned(),
    };

    indent(out, pretty, level);
    let _ = write!(out, "<{qname}");
    for (prefix, uri) in tree.ns_decls(id) {
        match prefix {
            Some(prefix) => {
                let _ = write!(out, " xmlns:{}=\"{}\"", prefix, escape(uri));
            }
            None => {
                let _ = write!(out, " xmlns=\"{}\"", escape(uri));
            }
        }
    }
    for attr in tree.attrs(id) {
        match &attr.prefix {
            Some(prefix) => {
                let _ = write!(
                    out,
                    " {}:{}=\"{}\"",
                    prefix,
                    attr.name,
                    escape(&attr.value)
                );
            }
            None => {
                let _ =
                    write!(out, " {}=\"{}\"", attr.name, escape(&attr.value));
            }
        }
    }

    let children = tree.children(id);
    if children.is_empty() {
        let _ = write!(out, "/>");
        newline(out, pretty);
        return;
    }
    let _ = write!(out, ">");

    let has_element_children =
        children.iter().any(|child| tree.kind(*child) == NodeKind::Element);
    if has_element_children {
        newline(out, pretty);
    }
    for child in children {
        write_node(out, tree, *child, pretty, level + 1);
    }
    if has_element_children {
        indent(out, pretty, level);
    }
    let _ = write!(out, "</{qname}>");
    newline(out, pretty);
}

fn indent(out: &mut String, pretty: bool, level: usize) {
    if pretty {
        for _ in 0..level {
            out.push_str("  ");
        }
    }
}

fn newline(out: &mut String, pretty: bool) {
    if pretty {
        out.push('\n');
    }
}
