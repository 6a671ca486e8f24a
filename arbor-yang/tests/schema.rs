//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_yang::{BaseType, SchemaKeyword, SchemaStore};

const IFACE_MODULE: &str = r#"
module iface {
  namespace "urn:test:iface";
  prefix if;

  revision 2023-01-01;
  revision 2020-01-01;

  feature sdn;

  identity interface-type;

  identity ethernet {
    base interface-type;
  }

  identity fast-ethernet {
    base ethernet;
  }

  typedef mtu-type {
    type uint16 {
      range "68..9216";
    }
    default "1500";
  }

  grouping endpoint {
    leaf address {
      type string;
    }
    leaf port {
      type uint16;
    }
  }

  container interfaces {
    list interface {
      key "name";
      unique "address";
      leaf name {
        type string {
          length "1..32";
          pattern "[a-z][a-z0-9]*";
        }
      }
      leaf address {
        type string;
      }
      leaf mtu {
        type mtu-type;
      }
      leaf type {
        type identityref {
          base interface-type;
        }
      }
      leaf enabled {
        type boolean;
        default "true";
      }
      leaf controller {
        if-feature sdn;
        type string;
      }
    }
  }

  leaf default-interface {
    type leafref {
      path "/if:interfaces/if:interface/if:name";
    }
  }

  rpc ping {
    input {
      leaf destination {
        type string;
        mandatory true;
      }
    }
    output {
      leaf rtt {
        type uint32;
      }
    }
  }
}
"#;

const EXT_MODULE: &str = r#"
module iface-ext {
  namespace "urn:test:iface-ext";
  prefix ife;

  import iface {
    prefix if;
  }

  revision 2023-06-01;

  augment "/if:interfaces/if:interface" {
    leaf description {
      type string {
        length "0..64";
      }
    }
  }

  container peers {
    list peer {
      key "address";
      uses if:endpoint;
    }
  }
}
"#;

fn store() -> SchemaStore {
    let mut store = SchemaStore::new();
    store.add_embedded_module("iface", Some("2023-01-01"), IFACE_MODULE);
    store.add_embedded_module("iface-ext", Some("2023-06-01"), EXT_MODULE);
    store.load_module("iface", None).unwrap();
    store
}

#[test]
fn module_header() {
    let store = store();
    let module = store.module_by_name("iface").unwrap();
    assert_eq!(module.namespace, "urn:test:iface");
    assert_eq!(module.prefix, "if");
    assert_eq!(module.revision.as_deref(), Some("2023-01-01"));
}

#[test]
fn lookup_and_keys() {
    let store = store();
    let list = store.lookup("urn:test:iface", "interfaces/interface").unwrap();
    let node = store.node(list);
    assert_eq!(node.keyword(), SchemaKeyword::List);
    assert_eq!(node.list_keys(), ["name"]);
    assert_eq!(node.unique_groups(), [vec!["address".to_owned()]]);
}

#[test]
fn typedef_chain_resolves_with_default() {
    let store = store();
    let mtu = store
        .lookup("urn:test:iface", "interfaces/interface/mtu")
        .unwrap();
    let node = store.node(mtu);
    let spec = node.type_spec().unwrap();
    assert_eq!(spec.base, Some(BaseType::Uint16));
    assert_eq!(spec.ranges, [(68, 9216)]);
    // The default travels from the typedef to the leaf.
    assert_eq!(node.default_value(), Some("1500"));
    assert!(spec.check_scalar("1500").is_ok());
    assert!(spec.check_scalar("42").is_err());
    assert!(spec.check_scalar("not-a-number").is_err());
}

#[test]
fn string_facets() {
    let store = store();
    let name = store
        .lookup("urn:test:iface", "interfaces/interface/name")
        .unwrap();
    let spec = store.node(name).type_spec().unwrap();
    assert!(spec.check_scalar("eth0").is_ok());
    assert!(spec.check_scalar("0eth").is_err());
    assert!(spec.check_scalar("").is_err());
}

#[test]
fn leafref_keeps_path() {
    let store = store();
    let leaf = store.lookup("urn:test:iface", "default-interface").unwrap();
    let spec = store.node(leaf).type_spec().unwrap();
    assert_eq!(spec.base, Some(BaseType::Leafref));
    assert_eq!(
        spec.leafref_path.as_deref(),
        Some("/if:interfaces/if:interface/if:name")
    );
}

#[test]
fn identity_derivation() {
    let store = store();
    let derived = store.iter_identities("urn:test:iface", "interface-type");
    assert!(derived.contains(&"if:ethernet".to_owned()));
    assert!(derived.contains(&"if:fast-ethernet".to_owned()));
    assert!(store.identity_is_derived(
        Some("urn:test:iface"),
        "interface-type",
        Some("urn:test:iface"),
        "fast-ethernet",
        false,
    ));
    assert!(!store.identity_is_derived(
        Some("urn:test:iface"),
        "ethernet",
        Some("urn:test:iface"),
        "interface-type",
        false,
    ));
}

#[test]
fn feature_gating_prunes_nodes() {
    let store = store();
    assert!(
        store
            .lookup("urn:test:iface", "interfaces/interface/controller")
            .is_none()
    );

    let mut store = SchemaStore::new();
    store.add_embedded_module("iface", Some("2023-01-01"), IFACE_MODULE);
    store.enable_feature("iface", "sdn");
    store.load_module("iface", None).unwrap();
    assert!(
        store
            .lookup("urn:test:iface", "interfaces/interface/controller")
            .is_some()
    );
}

#[test]
fn augment_and_cross_module_uses() {
    let mut store = SchemaStore::new();
    store.add_embedded_module("iface", Some("2023-01-01"), IFACE_MODULE);
    store.add_embedded_module("iface-ext", Some("2023-06-01"), EXT_MODULE);
    store.load_module("iface-ext", None).unwrap();

    // Augmented leaf lands under the target with the augmenting namespace.
    let description = store
        .find_data_child(
            store.lookup("urn:test:iface", "interfaces/interface"),
            Some("urn:test:iface-ext"),
            "description",
        )
        .unwrap();
    assert_eq!(store.node(description).namespace(), "urn:test:iface-ext");

    // uses if:endpoint expands the imported grouping.
    let port = store
        .lookup("urn:test:iface-ext", "peers/peer/port")
        .unwrap();
    assert_eq!(
        store.node(port).type_spec().unwrap().base,
        Some(BaseType::Uint16)
    );
}

#[test]
fn rpc_lookup() {
    let store = store();
    let rpc = store.lookup_rpc("urn:test:iface", "ping").unwrap();
    let node = store.node(rpc);
    assert_eq!(node.keyword(), SchemaKeyword::Rpc);
    let input = node
        .children()
        .iter()
        .find(|id| store.node(**id).keyword() == SchemaKeyword::RpcInput);
    assert!(input.is_some());
}

#[test]
fn missing_module_is_an_error() {
    let mut store = SchemaStore::new();
    assert!(store.load_module("no-such-module", None).is_err());
}

#[test]
fn malformed_module_is_an_error() {
    let mut store = SchemaStore::new();
    store.add_embedded_module("broken", None, "module broken {");
    assert!(store.load_module("broken", None).is_err());
}
