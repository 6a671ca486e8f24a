//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_yang::SchemaStore;
use enum_as_inner::EnumAsInner;

use crate::error::Error;
use crate::nsctx::NsCtx;
use crate::tree::{NodeId, NodeKind, XmlTree};
use crate::xpath::{ArithOp, Axis, CmpOp, Expr, NodeTest, Path, Step};

/// An XPath value.
#[derive(Clone, Debug, EnumAsInner)]
pub enum Value {
    Nodes(Vec<NodeId>),
    Boolean(bool),
    Number(f64),
    String(String),
}

/// Everything an expression is evaluated against. `initial` is the node the
/// evaluation started from (the `current()` function); the namespace context
/// comes from the defining statement.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub tree: &'a XmlTree,
    pub store: Option<&'a SchemaStore>,
    pub nsctx: &'a NsCtx,
    pub initial: NodeId,
    // Predicate position bookkeeping, 1-based.
    position: usize,
    size: usize,
}

// ===== impl Context =====

impl<'a> Context<'a> {
    pub fn new(
        tree: &'a XmlTree,
        store: Option<&'a SchemaStore>,
        nsctx: &'a NsCtx,
        initial: NodeId,
    ) -> Context<'a> {
        Context {
            tree,
            store,
            nsctx,
            initial,
            position: 1,
            size: 1,
        }
    }

    fn at(&self, position: usize, size: usize) -> Context<'a> {
        Context {
            position,
            size,
            ..*self
        }
    }
}

// ===== impl Value =====

impl Value {
    pub fn boolean(self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Boolean(value) => value,
            Value::Number(value) => value != 0.0 && !value.is_nan(),
            Value::String(value) => !value.is_empty(),
        }
    }

    pub fn string(self, tree: &XmlTree) -> String {
        match self {
            Value::Nodes(nodes) => nodes
                .first()
                .map(|node| string_value(tree, *node))
                .unwrap_or_default(),
            Value::Boolean(value) => value.to_string(),
            Value::Number(value) => format_number(value),
            Value::String(value) => value,
        }
    }

    pub fn number(self, tree: &XmlTree) -> f64 {
        match self {
            Value::Nodes(_) => {
                let string = self.string(tree);
                string.trim().parse().unwrap_or(f64::NAN)
            }
            Value::Boolean(value) => {
                if value {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(value) => value,
            Value::String(value) => value.trim().parse().unwrap_or(f64::NAN),
        }
    }
}

/// The string-value of a node: the concatenation of all body text in
/// document order.
pub fn string_value(tree: &XmlTree, node: NodeId) -> String {
    let mut out = String::new();
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        match tree.kind(node) {
            NodeKind::Body => out.push_str(tree.value(node).unwrap_or("")),
            NodeKind::Element => {
                let children = tree.children(node);
                stack.extend(children.iter().rev());
            }
            _ => (),
        }
    }
    out
}

// ===== global functions =====

/// Evaluates an expression with `node` as the context node.
pub fn eval(
    expr: &Expr,
    ctx: &Context<'_>,
    node: NodeId,
) -> Result<Value, Error> {
    match expr {
        Expr::Or(left, right) => {
            let value = eval_boolean(left, ctx, node)?
                || eval_boolean(right, ctx, node)?;
            Ok(Value::Boolean(value))
        }
        Expr::And(left, right) => {
            let value = eval_boolean(left, ctx, node)?
                && eval_boolean(right, ctx, node)?;
            Ok(Value::Boolean(value))
        }
        Expr::Compare(op, left, right) => {
            let left = eval(left, ctx, node)?;
            let right = eval(right, ctx, node)?;
            Ok(Value::Boolean(compare(*op, left, right, ctx.tree)))
        }
        Expr::Arith(op, left, right) => {
            let left = eval(left, ctx, node)?.number(ctx.tree);
            let right = eval(right, ctx, node)?.number(ctx.tree);
            let value = match op {
                ArithOp::Add => left + right,
                ArithOp::Sub => left - right,
                ArithOp::Mul => left * right,
                ArithOp::Div => left / right,
                ArithOp::Mod => left % right,
            };
            Ok(Value::Number(value))
        }
        Expr::Neg(operand) => {
            let value = eval(operand, ctx, node)?.number(ctx.tree);
            Ok(Value::Number(-value))
        }
        Expr::Union(left, right) => {
            let mut nodes = eval_nodes(left, ctx, node)?;
            for candidate in eval_nodes(right, ctx, node)? {
                if !nodes.contains(&candidate) {
                    nodes.push(candidate);
                }
            }
            Ok(Value::Nodes(nodes))
        }
        Expr::Path(path) => Ok(Value::Nodes(eval_path(path, ctx, node)?)),
        Expr::Literal(value) => Ok(Value::String(value.clone())),
        Expr::Number(value) => Ok(Value::Number(*value)),
        Expr::Call(name, args) => eval_call(name, args, ctx, node),
    }
}

/// Evaluates an expression and coerces to boolean.
pub fn eval_boolean(
    expr: &Expr,
    ctx: &Context<'_>,
    node: NodeId,
) -> Result<bool, Error> {
    Ok(eval(expr, ctx, node)?.boolean())
}

/// Evaluates an expression and coerces to string.
pub fn eval_string(
    expr: &Expr,
    ctx: &Context<'_>,
    node: NodeId,
) -> Result<String, Error> {
    Ok(eval(expr, ctx, node)?.string(ctx.tree))
}

/// Evaluates an expression that must yield a node-set.
pub fn eval_nodeset(
    expr: &Expr,
    ctx: &Context<'_>,
    node: NodeId,
) -> Result<Vec<NodeId>, Error> {
    eval_nodes(expr, ctx, node)
}

// ===== helper functions =====

fn eval_nodes(
    expr: &Expr,
    ctx: &Context<'_>,
    node: NodeId,
) -> Result<Vec<NodeId>, Error> {
    eval(expr, ctx, node)?.into_nodes().map_err(|_| {
        Error::XpathEval("expression does not yield a node-set".to_owned())
    })
}

fn eval_path(
    path: &Path,
    ctx: &Context<'_>,
    node: NodeId,
) -> Result<Vec<NodeId>, Error> {
    let mut nodes = if path.absolute {
        vec![ctx.tree.root()]
    } else {
        vec![node]
    };
    for step in &path.steps {
        nodes = eval_step(step, ctx, &nodes)?;
    }
    Ok(nodes)
}

fn eval_step(
    step: &Step,
    ctx: &Context<'_>,
    input: &[NodeId],
) -> Result<Vec<NodeId>, Error> {
    let mut output = Vec::new();
    for node in input {
        match step.axis {
            Axis::Child => {
                for child in ctx.tree.child_elements(*node) {
                    if test_matches(&step.test, ctx, child) {
                        push_unique(&mut output, child);
                    }
                }
            }
            Axis::DescendantOrSelf => {
                for descendant in ctx.tree.traverse(*node) {
                    push_unique(&mut output, descendant);
                }
            }
            Axis::Current => push_unique(&mut output, *node),
            Axis::Parent => {
                if let Some(parent) = ctx.tree.parent(*node) {
                    push_unique(&mut output, parent);
                }
            }
        }
    }
    for pred in &step.preds {
        let size = output.len();
        let mut filtered = Vec::new();
        for (idx, node) in output.iter().enumerate() {
            let pred_ctx = ctx.at(idx + 1, size);
            let keep = match eval(pred, &pred_ctx, *node)? {
                Value::Number(wanted) => (idx + 1) as f64 == wanted,
                value => value.boolean(),
            };
            if keep {
                filtered.push(*node);
            }
        }
        output = filtered;
    }
    Ok(output)
}

fn test_matches(test: &NodeTest, ctx: &Context<'_>, node: NodeId) -> bool {
    match test {
        NodeTest::AnyNode => true,
        NodeTest::Wildcard(prefix) => {
            namespace_matches(prefix.as_deref(), ctx, node)
        }
        NodeTest::Name(prefix, name) => {
            ctx.tree.name(node) == name
                && namespace_matches(prefix.as_deref(), ctx, node)
        }
    }
}

// An unprefixed test matches the context default namespace if the defining
// statement declared one, otherwise any namespace. A prefixed test requires
// an exact namespace match.
fn namespace_matches(
    prefix: Option<&str>,
    ctx: &Context<'_>,
    node: NodeId,
) -> bool {
    match ctx.nsctx.resolve(prefix) {
        Some(uri) => ctx.tree.namespace(node) == Some(uri),
        None if prefix.is_some() => false,
        None => true,
    }
}

fn push_unique(nodes: &mut Vec<NodeId>, node: NodeId) {
    if !nodes.contains(&node) {
        nodes.push(node);
    }
}

// Node-set comparisons are existential: some node (or some pair of nodes)
// must satisfy the relation.
fn compare(op: CmpOp, left: Value, right: Value, tree: &XmlTree) -> bool {
    match (&left, &right) {
        (Value::Nodes(left), Value::Nodes(right)) => {
            left.iter().any(|l| {
                let l = Value::String(string_value(tree, *l));
                right.iter().any(|r| {
                    let r = Value::String(string_value(tree, *r));
                    compare_scalar(op, l.clone(), r, tree)
                })
            })
        }
        (Value::Nodes(nodes), _) => nodes.iter().any(|node| {
            let value = Value::String(string_value(tree, *node));
            compare_scalar(op, value, right.clone(), tree)
        }),
        (_, Value::Nodes(nodes)) => nodes.iter().any(|node| {
            let value = Value::String(string_value(tree, *node));
            compare_scalar(op, left.clone(), value, tree)
        }),
        _ => compare_scalar(op, left, right, tree),
    }
}

fn compare_scalar(
    op: CmpOp,
    left: Value,
    right: Value,
    tree: &XmlTree,
) -> bool {
    match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = match (&left, &right) {
                (Value::Boolean(_), _) | (_, Value::Boolean(_)) => {
                    left.boolean() == right.boolean()
                }
                (Value::Number(_), _) | (_, Value::Number(_)) => {
                    left.number(tree) == right.number(tree)
                }
                _ => left.string(tree) == right.string(tree),
            };
            (op == CmpOp::Eq) == equal
        }
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let left = left.number(tree);
            let right = right.number(tree);
            match op {
                CmpOp::Lt => left < right,
                CmpOp::Le => left <= right,
                CmpOp::Gt => left > right,
                CmpOp::Ge => left >= right,
                _ => unreachable!(),
            }
        }
    }
}

fn eval_call(
    name: &str,
    args: &[Expr],
    ctx: &Context<'_>,
    node: NodeId,
) -> Result<Value, Error> {
    match (name, args.len()) {
        ("current", 0) => Ok(Value::Nodes(vec![ctx.initial])),
        ("true", 0) => Ok(Value::Boolean(true)),
        ("false", 0) => Ok(Value::Boolean(false)),
        ("not", 1) => {
            Ok(Value::Boolean(!eval_boolean(&args[0], ctx, node)?))
        }
        ("count", 1) => {
            let nodes = eval_nodes(&args[0], ctx, node)?;
            Ok(Value::Number(nodes.len() as f64))
        }
        ("name", 0) => Ok(Value::String(ctx.tree.name(node).to_owned())),
        ("string", 0) => Ok(Value::String(string_value(ctx.tree, node))),
        ("string", 1) => {
            Ok(Value::String(eval_string(&args[0], ctx, node)?))
        }
        ("boolean", 1) => {
            Ok(Value::Boolean(eval_boolean(&args[0], ctx, node)?))
        }
        ("number", 1) => {
            let value = eval(&args[0], ctx, node)?.number(ctx.tree);
            Ok(Value::Number(value))
        }
        ("position", 0) => Ok(Value::Number(ctx.position as f64)),
        ("last", 0) => Ok(Value::Number(ctx.size as f64)),
        ("contains", 2) => {
            let haystack = eval_string(&args[0], ctx, node)?;
            let needle = eval_string(&args[1], ctx, node)?;
            Ok(Value::Boolean(haystack.contains(&needle)))
        }
        ("starts-with", 2) => {
            let haystack = eval_string(&args[0], ctx, node)?;
            let needle = eval_string(&args[1], ctx, node)?;
            Ok(Value::Boolean(haystack.starts_with(&needle)))
        }
        ("derived-from", 2) => eval_derived_from(args, ctx, node, false),
        ("derived-from-or-self", 2) => {
            eval_derived_from(args, ctx, node, true)
        }
        _ => Err(Error::XpathEval(format!(
            "unknown function {name}() with {} argument(s)",
            args.len()
        ))),
    }
}

// Identityref derivation check against the schema store. The base argument
// is resolved in the expression's namespace context, each node's value in
// its document context.
fn eval_derived_from(
    args: &[Expr],
    ctx: &Context<'_>,
    node: NodeId,
    or_self: bool,
) -> Result<Value, Error> {
    let Some(store) = ctx.store else {
        return Err(Error::XpathEval(
            "derived-from() requires a schema store".to_owned(),
        ));
    };
    let base = eval_string(&args[1], ctx, node)?;
    let (base_prefix, base_name) = split_qname(&base);
    let base_ns = base_prefix
        .and_then(|prefix| {
            ctx.nsctx
                .resolve(Some(prefix))
                .or_else(|| store.prefix_namespace(prefix))
        })
        .map(str::to_owned);
    let nodes = eval_nodes(&args[0], ctx, node)?;
    let result = nodes.iter().any(|candidate| {
        let value = string_value(ctx.tree, *candidate);
        let (value_prefix, value_name) = split_qname(&value);
        // The value's prefix resolves in its own document scope, falling
        // back to module prefixes for values written without declarations.
        let value_ns = value_prefix
            .and_then(|prefix| {
                ctx.tree
                    .resolve_prefix(*candidate, Some(prefix))
                    .or_else(|| store.prefix_namespace(prefix))
            })
            .or_else(|| ctx.tree.namespace(*candidate))
            .map(str::to_owned);
        store.identity_is_derived(
            base_ns.as_deref(),
            base_name,
            value_ns.as_deref(),
            value_name,
            or_self,
        )
    });
    Ok(Value::Boolean(result))
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, qname),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
