//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_data::bind::{BindMode, bind};
use arbor_data::defaults::{add_defaults, strip_defaults};
use arbor_data::validate::{
    validate_add, validate_all, validate_list_keys_only,
};
use arbor_data::{ErrorTag, Validity};
use arbor_xml::parse::parse_document;
use arbor_xml::{XmlFlags, XmlTree};
use arbor_yang::SchemaStore;

const NETSYS_MODULE: &str = r#"
module netsys {
  namespace "urn:test:netsys";
  prefix net;

  revision 2023-01-01;

  identity iface-type;

  identity ethernet {
    base iface-type;
  }

  container interfaces {
    list interface {
      key "name";
      unique "address";
      leaf name {
        type string {
          pattern "[a-z][a-z0-9]*";
          length "1..15";
        }
      }
      leaf mtu {
        type uint16 {
          range "68..9216";
        }
        default "1500";
      }
      leaf address {
        type string;
      }
      leaf type {
        type identityref {
          base iface-type;
        }
      }
      leaf enabled {
        type boolean;
        default "true";
      }
      container ip {
        presence "ip layer configured";
        leaf gateway {
          type string;
          mandatory true;
        }
        leaf metric {
          type uint8;
          must ". <= 64" {
            error-message "metric too large";
          }
        }
      }
    }
  }

  leaf default-interface {
    type leafref {
      path "/net:interfaces/net:interface/net:name";
    }
  }

  container logging {
    leaf level {
      type enumeration {
        enum debug;
        enum info;
        enum warn;
      }
      default "info";
    }
    leaf remote {
      type string;
      when "../net:level = 'debug'";
    }
  }

  list dns-server {
    key "address";
    max-elements 3;
    ordered-by user;
    leaf address {
      type string;
    }
  }

  container state {
    config false;
    leaf uptime {
      type uint32;
    }
  }

  rpc restart-service {
    input {
      leaf service {
        type string;
        mandatory true;
      }
      leaf delay {
        type uint8;
      }
    }
    output {
      leaf pid {
        type uint32;
      }
    }
  }
}
"#;

fn store() -> SchemaStore {
    let mut store = SchemaStore::new();
    store.add_embedded_module("netsys", Some("2023-01-01"), NETSYS_MODULE);
    store.load_module("netsys", None).unwrap();
    store
}

fn load(store: &SchemaStore, body: &str) -> XmlTree {
    let mut tree = parse_document(&format!(
        "<config xmlns=\"urn:test:netsys\">{body}</config>"
    ))
    .unwrap();
    match bind(&mut tree, store, BindMode::Module).unwrap() {
        Validity::Valid => tree,
        Validity::Invalid(error) => panic!("bind failed: {error}"),
    }
}

fn expect_invalid(
    result: arbor_data::Validity,
    tag: ErrorTag,
) -> arbor_data::RpcError {
    match result {
        Validity::Invalid(error) => {
            assert_eq!(error.tag, tag, "unexpected tag: {error}");
            error
        }
        Validity::Valid => panic!("expected {tag:?}, got valid"),
    }
}

#[test]
fn valid_configuration_passes() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces>\
           <interface><name>eth0</name><mtu>1500</mtu></interface>\
           <interface><name>eth1</name></interface>\
         </interfaces>\
         <default-interface>eth1</default-interface>",
    );
    assert_eq!(validate_all(&tree, &store).unwrap(), Validity::Valid);
}

#[test]
fn bind_rejects_unknown_element() {
    let store = store();
    let mut tree = parse_document(
        "<config xmlns=\"urn:test:netsys\"><no-such-node/></config>",
    )
    .unwrap();
    let result = bind(&mut tree, &store, BindMode::Module).unwrap();
    expect_invalid(result, ErrorTag::UnknownElement);
}

#[test]
fn bind_rejects_unknown_namespace() {
    let store = store();
    let mut tree = parse_document(
        "<config><thing xmlns=\"urn:test:elsewhere\"/></config>",
    )
    .unwrap();
    let result = bind(&mut tree, &store, BindMode::Module).unwrap();
    expect_invalid(result, ErrorTag::UnknownNamespace);
}

#[test]
fn duplicate_list_keys_are_invalid() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces>\
           <interface><name>eth0</name></interface>\
           <interface><name>eth0</name></interface>\
         </interfaces>",
    );
    let error = expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::InvalidValue,
    );
    // The diagnostic points at the second entry.
    assert_eq!(
        error.path.as_deref(),
        Some("/interfaces/interface[name='eth0']")
    );
}

#[test]
fn missing_list_key_is_reported() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces><interface><mtu>1500</mtu></interface></interfaces>",
    );
    expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::MissingElement,
    );
    expect_invalid(
        validate_list_keys_only(&tree, &store).unwrap(),
        ErrorTag::MissingElement,
    );
}

#[test]
fn dangling_leafref_is_invalid() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces><interface><name>eth0</name></interface></interfaces>\
         <default-interface>eth9</default-interface>",
    );
    let error = expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::InvalidValue,
    );
    assert!(error.message.as_deref().unwrap().contains("leafref"));
}

#[test]
fn range_and_pattern_violations() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces><interface><name>eth0</name><mtu>42</mtu></interface></interfaces>",
    );
    expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::InvalidValue,
    );

    let tree = load(
        &store,
        "<interfaces><interface><name>0bad</name></interface></interfaces>",
    );
    expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::InvalidValue,
    );
}

#[test]
fn enumeration_choice_checked() {
    let store = store();
    let tree = load(&store, "<logging><level>chatty</level></logging>");
    expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::InvalidValue,
    );
}

#[test]
fn mandatory_inside_presence_container() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces><interface><name>eth0</name><ip/></interface></interfaces>",
    );
    let error = expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::MissingElement,
    );
    assert!(error.message.as_deref().unwrap().contains("gateway"));
}

#[test]
fn must_failure_uses_error_message() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces><interface><name>eth0</name>\
           <ip><gateway>g</gateway><metric>65</metric></ip>\
         </interface></interfaces>",
    );
    let error = expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::OperationFailed,
    );
    assert_eq!(error.message.as_deref(), Some("metric too large"));
}

#[test]
fn false_when_rejects_present_node() {
    let store = store();
    let tree = load(
        &store,
        "<logging><level>info</level><remote>host</remote></logging>",
    );
    expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::InvalidValue,
    );

    let tree = load(
        &store,
        "<logging><level>debug</level><remote>host</remote></logging>",
    );
    assert_eq!(validate_all(&tree, &store).unwrap(), Validity::Valid);
}

#[test]
fn unique_constraint() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces>\
           <interface><name>eth0</name><address>10.0.0.1</address></interface>\
           <interface><name>eth1</name><address>10.0.0.1</address></interface>\
         </interfaces>",
    );
    let error = expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::OperationFailed,
    );
    assert!(error.info.as_deref().unwrap().contains("non-unique"));
}

#[test]
fn max_elements_enforced() {
    let store = store();
    let tree = load(
        &store,
        "<dns-server><address>a</address></dns-server>\
         <dns-server><address>b</address></dns-server>\
         <dns-server><address>c</address></dns-server>\
         <dns-server><address>d</address></dns-server>",
    );
    expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::OperationFailed,
    );
}

#[test]
fn identityref_base_checked() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces><interface><name>eth0</name>\
           <type>ethernet</type>\
         </interface></interfaces>",
    );
    assert_eq!(validate_all(&tree, &store).unwrap(), Validity::Valid);

    let tree = load(
        &store,
        "<interfaces><interface><name>eth0</name>\
           <type>iface-type</type>\
         </interface></interfaces>",
    );
    expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::InvalidValue,
    );
}

#[test]
fn state_data_rejected_in_configuration() {
    let store = store();
    let tree = load(&store, "<state><uptime>1</uptime></state>");
    expect_invalid(
        validate_all(&tree, &store).unwrap(),
        ErrorTag::InvalidValue,
    );
}

#[test]
fn validate_add_checks_sibling_uniqueness() {
    let store = store();
    let tree = load(
        &store,
        "<interfaces>\
           <interface><name>eth0</name></interface>\
           <interface><name>eth0</name></interface>\
         </interfaces>",
    );
    let interfaces =
        tree.find_child(tree.root(), None, "interfaces").unwrap();
    let second = tree.child_elements(interfaces).nth(1).unwrap();
    expect_invalid(
        validate_add(&tree, &store, second).unwrap(),
        ErrorTag::InvalidValue,
    );
}

#[test]
fn rpc_input_binds_and_validates() {
    use arbor_data::validate::validate_rpc;

    let store = store();
    let mut tree = parse_document(
        "<restart-service xmlns=\"urn:test:netsys\">\
           <service>ntp</service><delay>5</delay>\
         </restart-service>",
    )
    .unwrap();
    assert_eq!(
        bind(&mut tree, &store, BindMode::Rpc).unwrap(),
        Validity::Valid
    );
    assert_eq!(validate_rpc(&tree, &store).unwrap(), Validity::Valid);

    // A missing mandatory input leaf is rejected.
    let mut tree = parse_document(
        "<restart-service xmlns=\"urn:test:netsys\"><delay>5</delay>\
         </restart-service>",
    )
    .unwrap();
    assert_eq!(
        bind(&mut tree, &store, BindMode::Rpc).unwrap(),
        Validity::Valid
    );
    expect_invalid(
        validate_rpc(&tree, &store).unwrap(),
        ErrorTag::MissingElement,
    );

    // An unknown rpc never binds.
    let mut tree = parse_document(
        "<no-such-rpc xmlns=\"urn:test:netsys\"/>",
    )
    .unwrap();
    expect_invalid(
        bind(&mut tree, &store, BindMode::Rpc).unwrap(),
        ErrorTag::UnknownElement,
    );
}

#[test]
fn defaults_injected_and_stripped() {
    let store = store();
    let mut tree = load(
        &store,
        "<interfaces><interface><name>eth0</name></interface></interfaces>",
    );
    add_defaults(&mut tree, &store);

    let interfaces =
        tree.find_child(tree.root(), None, "interfaces").unwrap();
    let interface = tree.child_elements(interfaces).next().unwrap();
    assert_eq!(tree.find_body(interface, "mtu"), Some("1500"));
    assert_eq!(tree.find_body(interface, "enabled"), Some("true"));
    // Top-level NP container materialized for its defaulted leaf.
    let logging = tree.find_child(tree.root(), None, "logging").unwrap();
    assert_eq!(tree.find_body(logging, "level"), Some("info"));
    assert!(tree.any_flag(XmlFlags::DEFAULT));

    strip_defaults(&mut tree);
    assert!(!tree.any_flag(XmlFlags::DEFAULT));
    assert_eq!(tree.find_body(interface, "mtu"), None);
    assert!(tree.find_child(tree.root(), None, "logging").is_none());
}
