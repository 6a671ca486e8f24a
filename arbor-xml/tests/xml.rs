//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_xml::parse::{parse_document, parse_fragment};
use arbor_xml::print::{to_string, tree_to_string};
use arbor_xml::{Error, NodeKind, XmlFlags, XmlTree};

#[test]
fn parse_simple_document() {
    let tree = parse_document(
        "<config xmlns=\"urn:test\"><a><b>hello</b></a></config>",
    )
    .unwrap();
    let root = tree.root();
    assert_eq!(tree.name(root), "config");
    assert_eq!(tree.namespace(root), Some("urn:test"));
    let a = tree.find_child(root, None, "a").unwrap();
    assert_eq!(tree.find_body(a, "b"), Some("hello"));
}

#[test]
fn parse_prefixed_namespaces() {
    let tree = parse_document(
        "<c:config xmlns:c=\"urn:c\"><c:leaf>1</c:leaf></c:config>",
    )
    .unwrap();
    let root = tree.root();
    assert_eq!(tree.prefix(root), Some("c"));
    assert_eq!(tree.namespace(root), Some("urn:c"));
    let leaf = tree.find_child(root, Some("urn:c"), "leaf").unwrap();
    assert_eq!(tree.body(leaf), Some("1"));
}

#[test]
fn default_namespace_applies_until_overridden() {
    let tree = parse_document(
        "<a xmlns=\"urn:outer\"><b><c xmlns=\"urn:inner\"><d/></c></b></a>",
    )
    .unwrap();
    let root = tree.root();
    let b = tree.find_child(root, None, "b").unwrap();
    assert_eq!(tree.namespace(b), Some("urn:outer"));
    let c = tree.find_child(b, None, "c").unwrap();
    assert_eq!(tree.namespace(c), Some("urn:inner"));
    let d = tree.find_child(c, None, "d").unwrap();
    assert_eq!(tree.namespace(d), Some("urn:inner"));
}

#[test]
fn entities_decode_and_encode() {
    let tree =
        parse_document("<x><y>a &lt;&amp;&gt; b &quot;q&quot;</y></x>")
            .unwrap();
    let root = tree.root();
    assert_eq!(tree.find_body(root, "y"), Some("a <&> b \"q\""));
    let printed = tree_to_string(&tree, false);
    assert!(printed.contains("&lt;&amp;&gt;"));
    assert!(printed.contains("&quot;q&quot;"));
}

#[test]
fn dtd_is_rejected() {
    let result = parse_document(
        "<!DOCTYPE config [<!ENTITY x \"y\">]><config/>",
    );
    assert!(matches!(result, Err(Error::DtdForbidden(_))));
}

#[test]
fn mismatched_tags_are_rejected() {
    assert!(matches!(
        parse_document("<a><b></a></b>"),
        Err(Error::Malformed(..))
    ));
}

#[test]
fn comments_and_pis_survive() {
    let tree =
        parse_document("<a><!-- note --><?keep data?><b/></a>").unwrap();
    let root = tree.root();
    let kinds = tree
        .children(root)
        .iter()
        .map(|child| tree.kind(*child))
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        [NodeKind::Comment, NodeKind::Pi, NodeKind::Element]
    );
}

#[test]
fn fragment_parse_attaches_siblings() {
    let mut tree = XmlTree::new("config");
    let root = tree.root();
    parse_fragment(&mut tree, root, "<a>1</a><b>2</b>").unwrap();
    assert_eq!(tree.find_body(root, "a"), Some("1"));
    assert_eq!(tree.find_body(root, "b"), Some("2"));
}

#[test]
fn adopt_moves_subtrees() {
    let mut tree = XmlTree::new("config");
    let root = tree.root();
    parse_fragment(&mut tree, root, "<src><x>1</x></src><dst/>").unwrap();
    let src = tree.find_child(root, None, "src").unwrap();
    let dst = tree.find_child(root, None, "dst").unwrap();
    let x = tree.find_child(src, None, "x").unwrap();
    tree.adopt(dst, x);
    assert!(tree.find_child(src, None, "x").is_none());
    assert_eq!(tree.find_body(dst, "x"), Some("1"));
    assert_eq!(tree.parent(x), Some(dst));
}

#[test]
fn purge_drops_subtree() {
    let mut tree = XmlTree::new("config");
    let root = tree.root();
    parse_fragment(&mut tree, root, "<a><b><c/></b></a>").unwrap();
    let a = tree.find_child(root, None, "a").unwrap();
    tree.purge(a);
    assert!(tree.find_child(root, None, "a").is_none());
    assert!(tree.children(root).is_empty());
}

#[test]
fn flags_propagate_and_clear() {
    let mut tree = XmlTree::new("config");
    let root = tree.root();
    parse_fragment(&mut tree, root, "<a><b><c/></b></a>").unwrap();
    let a = tree.find_child(root, None, "a").unwrap();
    tree.flag_set_subtree(a, XmlFlags::ADD);
    let b = tree.find_child(a, None, "b").unwrap();
    let c = tree.find_child(b, None, "c").unwrap();
    assert!(tree.flag_test(c, XmlFlags::ADD));
    assert!(tree.any_flag(XmlFlags::ADD));

    tree.flag_reset_subtree(root, XmlFlags::ADD);
    assert!(!tree.any_flag(XmlFlags::ADD));
}

#[test]
fn ancestor_walk_marks_parents() {
    let mut tree = XmlTree::new("config");
    let root = tree.root();
    parse_fragment(&mut tree, root, "<a><b><c/></b></a>").unwrap();
    let a = tree.find_child(root, None, "a").unwrap();
    let b = tree.find_child(a, None, "b").unwrap();
    let c = tree.find_child(b, None, "c").unwrap();
    tree.apply_ancestors(c, &mut |tree, node| {
        tree.flag_set(node, XmlFlags::CHANGE);
    });
    assert!(tree.flag_test(b, XmlFlags::CHANGE));
    assert!(tree.flag_test(a, XmlFlags::CHANGE));
    assert!(tree.flag_test(root, XmlFlags::CHANGE));
    assert!(!tree.flag_test(c, XmlFlags::CHANGE));
}

#[test]
fn copy_from_is_deep_and_flagless() {
    let mut src = XmlTree::new("config");
    let src_root = src.root();
    parse_fragment(&mut src, src_root, "<a><b>v</b></a>").unwrap();
    let a = src.find_child(src_root, None, "a").unwrap();
    src.flag_set_subtree(a, XmlFlags::DEL);

    let mut dst = XmlTree::new("config");
    let dst_root = dst.root();
    let copy = dst.copy_from(dst_root, &src, a);
    assert_eq!(dst.find_body(copy, "b"), Some("v"));
    assert!(!dst.any_flag(XmlFlags::DEL));
    assert!(src.subtree_eq(a, &dst, copy));
}

#[test]
fn pretty_print_indents() {
    let tree = parse_document("<a><b>1</b></a>").unwrap();
    let printed = tree_to_string(&tree, true);
    assert_eq!(printed, "<a>\n  <b>1</b>\n</a>\n");
}

#[test]
fn compact_print_roundtrips() {
    let text = "<config xmlns=\"urn:t\"><a p=\"1\"><b>x</b></a><c/></config>";
    let tree = parse_document(text).unwrap();
    let printed = tree_to_string(&tree, false);
    let reparsed = parse_document(&printed).unwrap();
    assert_eq!(tree, reparsed);
    let a = tree.find_child(tree.root(), None, "a").unwrap();
    assert_eq!(to_string(&tree, a, false), "<a p=\"1\"><b>x</b></a>");
}
