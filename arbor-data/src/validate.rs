//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use arbor_xml::xpath::{self, Context};
use arbor_xml::{NodeId, NsCtx, XmlTree};
use arbor_yang::{
    BaseType, Constraint, SchemaId, SchemaKeyword, SchemaNode, SchemaStore,
};

use crate::error::Error;
use crate::netconf::{RpcError, Validity, instance_path};

// Internal short-circuit: a user-visible diagnostic or an internal error.
enum Failure {
    Invalid(RpcError),
    Error(Error),
}

impl From<RpcError> for Failure {
    fn from(error: RpcError) -> Failure {
        Failure::Invalid(error)
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Failure {
        Failure::Error(error)
    }
}

impl From<arbor_xml::Error> for Failure {
    fn from(error: arbor_xml::Error) -> Failure {
        Failure::Error(Error::Xml(error))
    }
}

fn finish(result: Result<(), Failure>) -> Result<Validity, Error> {
    match result {
        Ok(()) => Ok(Validity::Valid),
        Err(Failure::Invalid(error)) => Ok(Validity::Invalid(error)),
        Err(Failure::Error(error)) => Err(error),
    }
}

/// Runs every constraint on every node of a bound configuration tree.
pub fn validate_all(
    tree: &XmlTree,
    store: &SchemaStore,
) -> Result<Validity, Error> {
    let root = tree.root();
    finish(validate_subtree(tree, store, root, &Checks::all()))
}

/// Runs the constraints that affect added data only, over one subtree. The
/// subtree's siblings participate in uniqueness checks, nothing else
/// outside it is visited.
pub fn validate_add(
    tree: &XmlTree,
    store: &SchemaStore,
    subtree: NodeId,
) -> Result<Validity, Error> {
    let checks = Checks::all();
    let result = (|| -> Result<(), Failure> {
        if let Some(parent) = tree.parent(subtree) {
            sibling_checks(tree, store, parent, &checks)?;
        }
        node_checks(tree, store, subtree, &checks)?;
        validate_subtree(tree, store, subtree, &checks)
    })();
    finish(result)
}

/// Restricts validation to list-key presence and uniqueness; the fast-path
/// preflight run before an edit is accepted into a datastore.
pub fn validate_list_keys_only(
    tree: &XmlTree,
    store: &SchemaStore,
) -> Result<Validity, Error> {
    let root = tree.root();
    finish(validate_subtree(tree, store, root, &Checks::keys_only()))
}

/// Validates the input payload of a bound rpc invocation: types and
/// mandatory input leaves.
pub fn validate_rpc(
    tree: &XmlTree,
    store: &SchemaStore,
) -> Result<Validity, Error> {
    let root = tree.root();
    let checks = Checks {
        state_data: false,
        ..Checks::all()
    };
    finish(validate_subtree(tree, store, root, &checks))
}

// Which constraint families a walk enforces.
struct Checks {
    keys: bool,
    types: bool,
    mandatory: bool,
    when_must: bool,
    leafref: bool,
    unique: bool,
    cardinality: bool,
    state_data: bool,
}

impl Checks {
    fn all() -> Checks {
        Checks {
            keys: true,
            types: true,
            mandatory: true,
            when_must: true,
            leafref: true,
            unique: true,
            cardinality: true,
            state_data: true,
        }
    }

    fn keys_only() -> Checks {
        Checks {
            keys: true,
            types: false,
            mandatory: false,
            when_must: false,
            leafref: false,
            unique: false,
            cardinality: false,
            state_data: false,
        }
    }
}

// ===== helper functions =====

fn validate_subtree(
    tree: &XmlTree,
    store: &SchemaStore,
    top: NodeId,
    checks: &Checks,
) -> Result<(), Failure> {
    sibling_checks(tree, store, top, checks)?;
    for child in tree.child_elements(top).collect::<Vec<_>>() {
        node_checks(tree, store, child, checks)?;
        validate_subtree(tree, store, child, checks)?;
    }
    Ok(())
}

// Checks applying to one node in isolation.
fn node_checks(
    tree: &XmlTree,
    store: &SchemaStore,
    node: NodeId,
    checks: &Checks,
) -> Result<(), Failure> {
    let Some(schema) = tree.schema(node) else {
        // Binding rejects unknown elements; an unbound node here means the
        // caller skipped binding, which keys-only preflights may do.
        return Ok(());
    };
    let snode = store.node(schema);

    if checks.state_data && !snode.config() {
        return Err(RpcError::invalid_value(format!(
            "state data node \"{}\" in configuration",
            snode.name()
        ))
        .with_path(instance_path(tree, store, node))
        .into());
    }

    if checks.when_must {
        if let Some(when) = snode.when()
            && !eval_constraint(tree, store, node, when)?
        {
            return Err(RpcError::invalid_value(format!(
                "node \"{}\" exists but its when condition \"{}\" is false",
                snode.name(),
                when.expr
            ))
            .with_path(instance_path(tree, store, node))
            .into());
        }
        for must in snode.musts() {
            if !eval_constraint(tree, store, node, must)? {
                let message = must.error_message.clone().unwrap_or_else(|| {
                    format!("must condition \"{}\" is false", must.expr)
                });
                return Err(RpcError::operation_failed(message)
                    .with_path(instance_path(tree, store, node))
                    .into());
            }
        }
    }

    if checks.types && snode.is_leafy() {
        let value = tree.body(node).unwrap_or("");
        if let Some(spec) = snode.type_spec() {
            if let Err(reason) = spec.check_scalar(value) {
                return Err(RpcError::invalid_value(reason)
                    .with_path(instance_path(tree, store, node))
                    .into());
            }
            if checks.leafref {
                if spec.base == Some(BaseType::Leafref) {
                    leafref_check(tree, store, node, snode, spec_path(spec)?)?;
                }
                if let Some((base_ns, base_name)) = &spec.identity_base {
                    identityref_check(
                        tree, store, node, base_ns, base_name,
                    )?;
                }
            }
        }
    }

    if checks.keys
        && snode.keyword() == SchemaKeyword::List
        && let Some(key) = snode
            .list_keys()
            .iter()
            .find(|key| tree.find_body(node, key).is_none())
    {
        return Err(RpcError::missing_element(key)
            .with_path(instance_path(tree, store, node))
            .with_message(format!(
                "list \"{}\" entry without its \"{}\" key",
                snode.name(),
                key
            ))
            .into());
    }

    Ok(())
}

// Checks spanning the children of one parent: key uniqueness, unique
// groups, cardinality bounds, and mandatory members of the root level.
fn sibling_checks(
    tree: &XmlTree,
    store: &SchemaStore,
    parent: NodeId,
    checks: &Checks,
) -> Result<(), Failure> {
    if checks.keys {
        key_uniqueness_check(tree, store, parent)?;
    }
    if !checks.unique && !checks.cardinality && !checks.mandatory {
        return Ok(());
    }

    let schema_children: Vec<SchemaId> = match tree.schema(parent) {
        // An rpc's input block is transparent in the payload; its children
        // are the root-level members of the invocation.
        Some(schema) if store.node(schema).keyword() == SchemaKeyword::Rpc => {
            store
                .node(schema)
                .children()
                .iter()
                .copied()
                .find(|child| {
                    store.node(*child).keyword() == SchemaKeyword::RpcInput
                })
                .map(|input| store.node(input).children().to_vec())
                .unwrap_or_default()
        }
        Some(schema) => store.node(schema).children().to_vec(),
        None if tree.parent(parent).is_none() => store.top_nodes().to_vec(),
        None => return Ok(()),
    };

    for schema in schema_children {
        let snode = store.node(schema);
        let instances = tree
            .child_elements(parent)
            .filter(|child| tree.schema(*child) == Some(schema))
            .collect::<Vec<_>>();

        if checks.mandatory {
            // In configuration the mandatory rule binds config nodes only;
            // rpc input payloads (config false throughout) enforce it too.
            let require_config = checks.state_data;
            mandatory_member_check(
                tree,
                store,
                parent,
                schema,
                &instances,
                require_config,
            )?;
        }

        if checks.cardinality
            && matches!(
                snode.keyword(),
                SchemaKeyword::List | SchemaKeyword::LeafList
            )
        {
            let count = instances.len() as u64;
            if let Some(min) = snode.min_elements()
                && count < min
            {
                return Err(RpcError::operation_failed(format!(
                    "\"{}\" needs at least {} entries, has {}",
                    snode.name(),
                    min,
                    count
                ))
                .with_path(instance_path(tree, store, parent))
                .into());
            }
            if let Some(max) = snode.max_elements()
                && count > max
            {
                return Err(RpcError::operation_failed(format!(
                    "\"{}\" allows at most {} entries, has {}",
                    snode.name(),
                    max,
                    count
                ))
                .with_path(instance_path(tree, store, parent))
                .into());
            }
        }

        if checks.unique && snode.keyword() == SchemaKeyword::List {
            for group in snode.unique_groups() {
                unique_group_check(tree, store, snode, &instances, group)?;
            }
        }
    }
    Ok(())
}

fn key_uniqueness_check(
    tree: &XmlTree,
    store: &SchemaStore,
    parent: NodeId,
) -> Result<(), Failure> {
    let mut seen: BTreeMap<(SchemaId, Vec<String>), NodeId> = BTreeMap::new();
    for child in tree.child_elements(parent) {
        let Some(schema) = tree.schema(child) else {
            continue;
        };
        if store.node(schema).keyword() != SchemaKeyword::List {
            continue;
        }
        let key = tree.list_key_tuple(child, store);
        if seen.insert((schema, key.clone()), child).is_some() {
            return Err(RpcError::invalid_value(format!(
                "duplicate \"{}\" entry with key [{}]",
                tree.name(child),
                key.join(" ")
            ))
            .with_path(instance_path(tree, store, child))
            .into());
        }
    }
    Ok(())
}

fn unique_group_check(
    tree: &XmlTree,
    store: &SchemaStore,
    snode: &SchemaNode,
    instances: &[NodeId],
    group: &[String],
) -> Result<(), Failure> {
    let mut seen: BTreeMap<Vec<String>, NodeId> = BTreeMap::new();
    for instance in instances {
        // Entries missing any tag leaf do not participate.
        let tuple = group
            .iter()
            .map(|leaf| tree.find_body(*instance, leaf))
            .collect::<Option<Vec<_>>>();
        let Some(tuple) = tuple else {
            continue;
        };
        let tuple = tuple.into_iter().map(str::to_owned).collect::<Vec<_>>();
        if seen.insert(tuple.clone(), *instance).is_some() {
            return Err(RpcError::operation_failed(format!(
                "\"{}\" unique constraint [{}] violated",
                snode.name(),
                group.join(" ")
            ))
            .with_path(instance_path(tree, store, *instance))
            .with_info(format!(
                "<non-unique>{}</non-unique>",
                tuple.join(" ")
            ))
            .into());
        }
    }
    Ok(())
}

// Enforces one mandatory schema member under a present parent. Members
// guarded by a when statement are exempt; their condition cannot be
// evaluated without an instance.
fn mandatory_member_check(
    tree: &XmlTree,
    store: &SchemaStore,
    parent: NodeId,
    schema: SchemaId,
    instances: &[NodeId],
    require_config: bool,
) -> Result<(), Failure> {
    let snode = store.node(schema);
    if (require_config && !snode.config())
        || snode.when().is_some()
        || !snode.mandatory()
    {
        return Ok(());
    }
    match snode.keyword() {
        SchemaKeyword::Leaf | SchemaKeyword::AnyXml => {
            if instances.is_empty() {
                return Err(RpcError::missing_element(snode.name())
                    .with_path(instance_path(tree, store, parent))
                    .with_message(format!(
                        "mandatory \"{}\" is missing",
                        snode.name()
                    ))
                    .into());
            }
        }
        SchemaKeyword::Choice => {
            let any_case = case_members(store, schema)
                .into_iter()
                .any(|member| has_instance(tree, parent, member));
            if !any_case {
                return Err(RpcError::missing_element(snode.name())
                    .with_path(instance_path(tree, store, parent))
                    .with_message(format!(
                        "no case of mandatory choice \"{}\" is present",
                        snode.name()
                    ))
                    .into());
            }
        }
        _ => (),
    }
    Ok(())
}

fn has_instance(
    tree: &XmlTree,
    parent: NodeId,
    schema: SchemaId,
) -> bool {
    tree.child_elements(parent)
        .any(|child| tree.schema(child) == Some(schema))
}

// The concrete data-node schemas reachable through a choice.
fn case_members(store: &SchemaStore, choice: SchemaId) -> Vec<SchemaId> {
    let mut out = Vec::new();
    for child in store.node(choice).children() {
        match store.node(*child).keyword() {
            SchemaKeyword::Case | SchemaKeyword::Choice => {
                out.extend(case_members(store, *child));
            }
            _ => out.push(*child),
        }
    }
    out
}

fn eval_constraint(
    tree: &XmlTree,
    store: &SchemaStore,
    node: NodeId,
    constraint: &Constraint,
) -> Result<bool, Failure> {
    let nsctx = module_nsctx(store, constraint.module);
    let parsed = xpath::parse(&constraint.expr)?;
    let ctx = Context::new(tree, Some(store), &nsctx, node);
    Ok(xpath::eval_boolean(&parsed, &ctx, node)?)
}

fn leafref_check(
    tree: &XmlTree,
    store: &SchemaStore,
    node: NodeId,
    snode: &SchemaNode,
    path: &str,
) -> Result<(), Failure> {
    let value = tree.body(node).unwrap_or("");
    let nsctx = module_nsctx(store, snode.module());
    let parsed = xpath::parse(path)?;
    let ctx = Context::new(tree, Some(store), &nsctx, node);
    let targets = xpath::eval_nodeset(&parsed, &ctx, node)?;
    if targets
        .iter()
        .any(|target| tree.body(*target).unwrap_or("") == value)
    {
        return Ok(());
    }
    Err(RpcError::invalid_value(format!(
        "leafref \"{path}\" has no existing target with value \"{value}\""
    ))
    .with_path(instance_path(tree, store, node))
    .into())
}

fn identityref_check(
    tree: &XmlTree,
    store: &SchemaStore,
    node: NodeId,
    base_ns: &str,
    base_name: &str,
) -> Result<(), Failure> {
    let value = tree.body(node).unwrap_or("");
    let (prefix, name) = match value.split_once(':') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, value),
    };
    let value_ns = match prefix {
        Some(prefix) => tree
            .resolve_prefix(node, Some(prefix))
            .or_else(|| store.prefix_namespace(prefix)),
        None => tree.namespace(node),
    };
    if store.identity_is_derived(
        Some(base_ns),
        base_name,
        value_ns,
        name,
        false,
    ) {
        return Ok(());
    }
    Err(RpcError::invalid_value(format!(
        "\"{value}\" is not derived from base identity \"{base_name}\""
    ))
    .with_path(instance_path(tree, store, node))
    .into())
}

fn module_nsctx(store: &SchemaStore, module: usize) -> NsCtx {
    let mut nsctx = NsCtx::new();
    for (prefix, namespace) in store.module_nsctx(module) {
        nsctx.insert(prefix.as_deref(), &namespace);
    }
    nsctx
}

fn spec_path(spec: &arbor_yang::TypeSpec) -> Result<&str, Failure> {
    spec.leafref_path.as_deref().ok_or_else(|| {
        Failure::Error(Error::Internal(
            "leafref type without a path".to_owned(),
        ))
    })
}
