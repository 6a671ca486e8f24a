//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_data::bind::{BindMode, bind};
use arbor_data::diff::diff;
use arbor_data::Validity;
use arbor_xml::parse::parse_document;
use arbor_xml::XmlTree;
use arbor_yang::SchemaStore;

const MODULE: &str = r#"
module difftest {
  namespace "urn:test:difftest";
  prefix dt;

  revision 2023-01-01;

  container interfaces {
    list interface {
      key "name";
      leaf name {
        type string;
      }
      leaf mtu {
        type uint16;
      }
      leaf-list dns {
        type string;
      }
    }
  }

  leaf hostname {
    type string;
  }
}
"#;

fn store() -> SchemaStore {
    let mut store = SchemaStore::new();
    store.add_embedded_module("difftest", Some("2023-01-01"), MODULE);
    store.load_module("difftest", None).unwrap();
    store
}

fn load(store: &SchemaStore, body: &str) -> XmlTree {
    let mut tree = parse_document(&format!(
        "<config xmlns=\"urn:test:difftest\">{body}</config>"
    ))
    .unwrap();
    assert_eq!(
        bind(&mut tree, store, BindMode::Module).unwrap(),
        Validity::Valid
    );
    tree
}

#[test]
fn equal_trees_have_empty_diff() {
    let store = store();
    let body = "<interfaces><interface><name>eth0</name><mtu>1500</mtu>\
                </interface></interfaces>";
    let src = load(&store, body);
    let target = load(&store, body);
    assert!(diff(&src, &target, &store).is_empty());
}

#[test]
fn added_subtree_reported_at_its_root() {
    let store = store();
    let src = load(&store, "");
    let target = load(
        &store,
        "<interfaces><interface><name>eth0</name><mtu>1500</mtu>\
         </interface></interfaces>",
    );
    let result = diff(&src, &target, &store);
    // Only the <interfaces> root of the new subtree is reported.
    assert_eq!(result.added.len(), 1);
    assert_eq!(target.name(result.added[0]), "interfaces");
    assert!(result.deleted.is_empty());
    assert!(result.changed_src.is_empty());
}

#[test]
fn list_entries_match_by_key() {
    let store = store();
    let src = load(
        &store,
        "<interfaces>\
           <interface><name>eth0</name><mtu>1500</mtu></interface>\
           <interface><name>eth1</name><mtu>1500</mtu></interface>\
         </interfaces>",
    );
    let target = load(
        &store,
        "<interfaces>\
           <interface><name>eth1</name><mtu>9000</mtu></interface>\
           <interface><name>eth2</name><mtu>1500</mtu></interface>\
         </interfaces>",
    );
    let result = diff(&src, &target, &store);

    // eth0 disappeared, eth2 appeared, eth1's mtu changed.
    assert_eq!(result.deleted.len(), 1);
    assert_eq!(src.find_body(result.deleted[0], "name"), Some("eth0"));
    assert_eq!(result.added.len(), 1);
    assert_eq!(target.find_body(result.added[0], "name"), Some("eth2"));
    assert_eq!(result.changed_src.len(), 1);
    assert_eq!(src.body(result.changed_src[0]), Some("1500"));
    assert_eq!(target.body(result.changed_target[0]), Some("9000"));
}

#[test]
fn leaf_change_is_a_pair() {
    let store = store();
    let src = load(&store, "<hostname>alpha</hostname>");
    let target = load(&store, "<hostname>beta</hostname>");
    let result = diff(&src, &target, &store);
    assert_eq!(result.changed_src.len(), 1);
    assert_eq!(result.changed_target.len(), 1);
    assert_eq!(src.name(result.changed_src[0]), "hostname");
    assert!(result.added.is_empty() && result.deleted.is_empty());
}

#[test]
fn leaf_list_entries_match_by_value() {
    let store = store();
    let src = load(
        &store,
        "<interfaces><interface><name>eth0</name>\
           <dns>1.1.1.1</dns><dns>8.8.8.8</dns>\
         </interface></interfaces>",
    );
    let target = load(
        &store,
        "<interfaces><interface><name>eth0</name>\
           <dns>1.1.1.1</dns><dns>9.9.9.9</dns>\
         </interface></interfaces>",
    );
    let result = diff(&src, &target, &store);
    // A re-valued leaf-list entry is a delete plus an add, never a change.
    assert!(result.changed_src.is_empty());
    assert_eq!(result.deleted.len(), 1);
    assert_eq!(src.body(result.deleted[0]), Some("8.8.8.8"));
    assert_eq!(result.added.len(), 1);
    assert_eq!(target.body(result.added[0]), Some("9.9.9.9"));
}

// Diff soundness: applying delete/add/replace to the source yields the
// target, modulo ordering.
#[test]
fn diff_applies_back_to_target() {
    let store = store();
    let src = load(
        &store,
        "<hostname>alpha</hostname>\
         <interfaces>\
           <interface><name>eth0</name><mtu>1500</mtu></interface>\
           <interface><name>eth1</name><mtu>1500</mtu></interface>\
         </interfaces>",
    );
    let target = load(
        &store,
        "<hostname>beta</hostname>\
         <interfaces>\
           <interface><name>eth1</name><mtu>9000</mtu></interface>\
           <interface><name>eth2</name></interface>\
         </interfaces>",
    );
    let result = diff(&src, &target, &store);

    let mut patched = src.clone();
    for deleted in &result.deleted {
        patched.purge(*deleted);
    }
    for (changed_src, changed_target) in
        result.changed_src.iter().zip(&result.changed_target)
    {
        let body = target.body(*changed_target).unwrap_or("").to_owned();
        patched.set_body(*changed_src, &body);
    }
    for added in &result.added {
        let parent = target.parent(*added).unwrap();
        // Locate the corresponding parent in the patched tree by name
        // (sufficient for this fixture's one level of nesting).
        let patched_parent = if target.parent(parent).is_none() {
            patched.root()
        } else {
            patched
                .find_child(patched.root(), None, target.name(parent))
                .unwrap()
        };
        patched.copy_from(patched_parent, &target, *added);
    }
    patched.sort_by_schema(&store);
    let mut normalized_target = target.clone();
    normalized_target.sort_by_schema(&store);
    assert_eq!(patched, normalized_target);
}
