//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_xml::parse::parse_document;
use arbor_xml::xpath::{self, Context};
use arbor_xml::NsCtx;

fn fixture() -> arbor_xml::XmlTree {
    parse_document(
        "<config xmlns=\"urn:test\">\
           <interfaces>\
             <interface><name>eth0</name><mtu>1500</mtu></interface>\
             <interface><name>eth1</name><mtu>9000</mtu></interface>\
           </interfaces>\
           <default-interface>eth1</default-interface>\
         </config>",
    )
    .unwrap()
}

fn eval_nodes(tree: &arbor_xml::XmlTree, expr: &str) -> Vec<String> {
    let nsctx = NsCtx::new();
    let ctx = Context::new(tree, None, &nsctx, tree.root());
    let parsed = xpath::parse(expr).unwrap();
    xpath::eval_nodeset(&parsed, &ctx, tree.root())
        .unwrap()
        .into_iter()
        .map(|node| {
            tree.body(node)
                .map(str::to_owned)
                .unwrap_or_else(|| tree.name(node).to_owned())
        })
        .collect()
}

fn eval_bool(tree: &arbor_xml::XmlTree, expr: &str) -> bool {
    let nsctx = NsCtx::new();
    let ctx = Context::new(tree, None, &nsctx, tree.root());
    let parsed = xpath::parse(expr).unwrap();
    xpath::eval_boolean(&parsed, &ctx, tree.root()).unwrap()
}

#[test]
fn absolute_path_selects_from_root() {
    let tree = fixture();
    let names = eval_nodes(&tree, "/interfaces/interface/name");
    assert_eq!(names, ["eth0", "eth1"]);
}

#[test]
fn predicate_on_key() {
    let tree = fixture();
    let mtus =
        eval_nodes(&tree, "/interfaces/interface[name='eth1']/mtu");
    assert_eq!(mtus, ["9000"]);
}

#[test]
fn positional_predicate() {
    let tree = fixture();
    let names = eval_nodes(&tree, "/interfaces/interface[2]/name");
    assert_eq!(names, ["eth1"]);
    let names = eval_nodes(&tree, "/interfaces/interface[last()]/name");
    assert_eq!(names, ["eth1"]);
}

#[test]
fn descendant_axis() {
    let tree = fixture();
    let names = eval_nodes(&tree, "//name");
    assert_eq!(names, ["eth0", "eth1"]);
}

#[test]
fn wildcard_and_union() {
    let tree = fixture();
    let all = eval_nodes(&tree, "/interfaces/interface[1]/*");
    assert_eq!(all, ["eth0", "1500"]);
    let both = eval_nodes(
        &tree,
        "/default-interface | /interfaces/interface[1]/name",
    );
    assert_eq!(both, ["eth1", "eth0"]);
}

#[test]
fn boolean_and_comparison_semantics() {
    let tree = fixture();
    assert!(eval_bool(&tree, "/interfaces/interface[name='eth0']"));
    assert!(!eval_bool(&tree, "/interfaces/interface[name='eth7']"));
    assert!(eval_bool(&tree, "count(/interfaces/interface) = 2"));
    assert!(eval_bool(&tree, "/interfaces/interface/mtu > 8000"));
    assert!(eval_bool(&tree, "not(/nonexistent)"));
    assert!(eval_bool(
        &tree,
        "/default-interface = /interfaces/interface/name"
    ));
}

#[test]
fn arithmetic() {
    let tree = fixture();
    assert!(eval_bool(&tree, "1 + 2 * 3 = 7"));
    assert!(eval_bool(&tree, "10 mod 3 = 1"));
    assert!(eval_bool(&tree, "8 div 2 = 4"));
    assert!(eval_bool(&tree, "-1 < 0"));
}

#[test]
fn string_functions() {
    let tree = fixture();
    assert!(eval_bool(&tree, "contains(/default-interface, 'th1')"));
    assert!(eval_bool(&tree, "starts-with(/default-interface, 'eth')"));
}

#[test]
fn current_function() {
    let tree = fixture();
    let nsctx = NsCtx::new();
    let iface = {
        let interfaces =
            tree.find_child(tree.root(), None, "interfaces").unwrap();
        tree.child_elements(interfaces).next().unwrap()
    };
    let ctx = Context::new(&tree, None, &nsctx, iface);
    let parsed = xpath::parse("current()/name").unwrap();
    let nodes = xpath::eval_nodeset(&parsed, &ctx, tree.root()).unwrap();
    assert_eq!(tree.body(nodes[0]), Some("eth0"));
}

#[test]
fn prefixed_tests_require_namespace_match() {
    let tree = fixture();
    let mut nsctx = NsCtx::new();
    nsctx.insert(Some("t"), "urn:test");
    let ctx = Context::new(&tree, None, &nsctx, tree.root());
    let parsed = xpath::parse("/t:interfaces/t:interface").unwrap();
    assert_eq!(
        xpath::eval_nodeset(&parsed, &ctx, tree.root()).unwrap().len(),
        2
    );

    let mut wrong = NsCtx::new();
    wrong.insert(Some("t"), "urn:other");
    let ctx = Context::new(&tree, None, &wrong, tree.root());
    assert!(
        xpath::eval_nodeset(&parsed, &ctx, tree.root()).unwrap().is_empty()
    );
}

#[test]
fn relative_paths_and_parent_axis() {
    let tree = fixture();
    let nsctx = NsCtx::new();
    let interfaces = tree.find_child(tree.root(), None, "interfaces").unwrap();
    let ctx = Context::new(&tree, None, &nsctx, interfaces);
    let parsed = xpath::parse("interface[1]/../interface[2]/name").unwrap();
    let nodes = xpath::eval_nodeset(&parsed, &ctx, interfaces).unwrap();
    assert_eq!(tree.body(nodes[0]), Some("eth1"));
}

#[test]
fn syntax_errors_are_reported() {
    assert!(xpath::parse("/a[").is_err());
    assert!(xpath::parse("").is_err());
    assert!(xpath::parse("f(").is_err());
}
