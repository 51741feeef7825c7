use crate::dom::{Document, NodeId, NodeKind};
use crate::error::XPathError;
use crate::xpath::functions::call;
use crate::xpath::parser::{ArithOp, Axis, CompareOp, Expr, NodeTest, Path, PathStart};
use crate::xpath::{Context, Value, string_to_number};

pub(crate) fn evaluate(expr: &Expr, ctx: &Context<'_>) -> Result<Value, XPathError> {
    match expr {
        Expr::Or(left, right) => Ok(Value::Boolean(
            evaluate(left, ctx)?.to_boolean() || evaluate(right, ctx)?.to_boolean(),
        )),
        Expr::And(left, right) => Ok(Value::Boolean(
            evaluate(left, ctx)?.to_boolean() && evaluate(right, ctx)?.to_boolean(),
        )),
        Expr::Compare(op, left, right) => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            Ok(Value::Boolean(compare(*op, &left, &right, ctx.doc)))
        }
        Expr::Arithmetic(op, left, right) => {
            let left = evaluate(left, ctx)?.to_number(ctx.doc);
            let right = evaluate(right, ctx)?.to_number(ctx.doc);
            let result = match op {
                ArithOp::Add => left + right,
                ArithOp::Sub => left - right,
                ArithOp::Mul => left * right,
                ArithOp::Div => left / right,
                ArithOp::Mod => left % right,
            };
            Ok(Value::Number(result))
        }
        Expr::Negate(operand) => Ok(Value::Number(-evaluate(operand, ctx)?.to_number(ctx.doc))),
        Expr::Union(left, right) => {
            let mut nodes = evaluate(left, ctx)?.into_nodes()?;
            nodes.extend(evaluate(right, ctx)?.into_nodes()?);
            nodes.sort_unstable();
            nodes.dedup();
            Ok(Value::Nodes(nodes))
        }
        Expr::Literal(text) => Ok(Value::String(text.clone())),
        Expr::Number(number) => Ok(Value::Number(*number)),
        Expr::Variable(name) => {
            ctx.variables
                .get(name)
                .ok_or_else(|| XPathError::UnboundVariable { name: name.clone() })
        }
        Expr::Function(function, args) => call(*function, args, ctx),
        Expr::Path(path) => evaluate_path(path, ctx),
    }
}

fn evaluate_path(path: &Path, ctx: &Context<'_>) -> Result<Value, XPathError> {
    let mut nodes = match &path.start {
        PathStart::Root => vec![ctx.doc.root()],
        PathStart::Context => vec![ctx.node],
        PathStart::Filter {
            primary,
            predicates,
        } => {
            let value = evaluate(primary, ctx)?;
            if predicates.is_empty() && path.steps.is_empty() {
                return Ok(value);
            }
            let nodes = value.into_nodes()?;
            apply_predicates(nodes, predicates, ctx)?
        }
    };

    for step in &path.steps {
        let mut next = Vec::new();
        for node in &nodes {
            let candidates: Vec<NodeId> = axis_nodes(ctx.doc, *node, step.axis)
                .into_iter()
                .filter(|candidate| matches_test(ctx.doc, *candidate, step.axis, &step.test))
                .collect();
            next.extend(apply_predicates(candidates, &step.predicates, ctx)?);
        }
        next.sort_unstable();
        next.dedup();
        nodes = next;
    }
    Ok(Value::Nodes(nodes))
}

/// Filters `nodes` (given in proximity order) through each predicate in turn.
fn apply_predicates(
    mut nodes: Vec<NodeId>,
    predicates: &[Expr],
    ctx: &Context<'_>,
) -> Result<Vec<NodeId>, XPathError> {
    for predicate in predicates {
        let size = nodes.len();
        let mut kept = Vec::with_capacity(size);
        for (index, node) in nodes.into_iter().enumerate() {
            let inner = ctx.at(node, index + 1, size);
            let keep = match evaluate(predicate, &inner)? {
                Value::Number(number) => number == (index + 1) as f64,
                other => other.to_boolean(),
            };
            if keep {
                kept.push(node);
            }
        }
        nodes = kept;
    }
    Ok(nodes)
}

/// Nodes on `axis` from `node`, in proximity order.
fn axis_nodes(doc: &Document, node: NodeId, axis: Axis) -> Vec<NodeId> {
    match axis {
        Axis::Child => doc.children(node).to_vec(),
        Axis::Attribute => doc.attributes(node).to_vec(),
        Axis::SelfAxis => vec![node],
        Axis::Parent => doc.parent(node).into_iter().collect(),
        Axis::Ancestor => ancestors(doc, node),
        Axis::AncestorOrSelf => {
            let mut out = vec![node];
            out.extend(ancestors(doc, node));
            out
        }
        Axis::Descendant => {
            let mut out = Vec::new();
            descendants(doc, node, &mut out);
            out
        }
        Axis::DescendantOrSelf => {
            let mut out = vec![node];
            descendants(doc, node, &mut out);
            out
        }
        Axis::FollowingSibling => siblings(doc, node)
            .map(|(siblings, index)| siblings[index + 1..].to_vec())
            .unwrap_or_default(),
        Axis::PrecedingSibling => siblings(doc, node)
            .map(|(siblings, index)| siblings[..index].iter().rev().copied().collect())
            .unwrap_or_default(),
        Axis::Following => following(doc, node),
        Axis::Preceding => preceding(doc, node),
    }
}

fn ancestors(doc: &Document, node: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut current = doc.parent(node);
    while let Some(parent) = current {
        out.push(parent);
        current = doc.parent(parent);
    }
    out
}

fn descendants(doc: &Document, node: NodeId, out: &mut Vec<NodeId>) {
    for child in doc.children(node) {
        out.push(*child);
        descendants(doc, *child, out);
    }
}

/// Sibling list of a non-attribute node and its index in it.
fn siblings(doc: &Document, node: NodeId) -> Option<(&[NodeId], usize)> {
    if doc.is_attribute(node) {
        return None;
    }
    let parent = doc.parent(node)?;
    let siblings = doc.children(parent);
    let index = siblings.iter().position(|sibling| *sibling == node)?;
    Some((siblings, index))
}

fn following(doc: &Document, node: NodeId) -> Vec<NodeId> {
    let start = if doc.is_attribute(node) {
        match doc.parent(node) {
            Some(parent) => parent,
            None => return Vec::new(),
        }
    } else {
        node
    };
    let mut out = Vec::new();
    let mut current = Some(start);
    while let Some(anchor) = current {
        if let Some((siblings, index)) = siblings(doc, anchor) {
            for sibling in &siblings[index + 1..] {
                out.push(*sibling);
                descendants(doc, *sibling, &mut out);
            }
        }
        current = doc.parent(anchor);
    }
    out.sort_unstable();
    out
}

fn preceding(doc: &Document, node: NodeId) -> Vec<NodeId> {
    let start = if doc.is_attribute(node) {
        match doc.parent(node) {
            Some(parent) => parent,
            None => return Vec::new(),
        }
    } else {
        node
    };
    let mut out = Vec::new();
    let mut current = Some(start);
    while let Some(anchor) = current {
        if let Some((siblings, index)) = siblings(doc, anchor) {
            for sibling in &siblings[..index] {
                out.push(*sibling);
                descendants(doc, *sibling, &mut out);
            }
        }
        current = doc.parent(anchor);
    }
    out.sort_unstable_by(|a, b| b.cmp(a));
    out
}

/// Whether `node` passes `test` when reached along `axis`.
pub(crate) fn matches_test(doc: &Document, node: NodeId, axis: Axis, test: &NodeTest) -> bool {
    let principal_attribute = axis == Axis::Attribute;
    match test {
        NodeTest::Node => true,
        NodeTest::Text => matches!(doc.kind(node), NodeKind::Text(_)),
        NodeTest::Comment => matches!(doc.kind(node), NodeKind::Comment(_)),
        NodeTest::ProcessingInstruction(target) => match doc.kind(node) {
            NodeKind::ProcessingInstruction { target: actual, .. } => {
                target.as_ref().is_none_or(|target| target == actual)
            }
            _ => false,
        },
        NodeTest::Any => is_principal(doc, node, principal_attribute),
        NodeTest::NamespaceAny(uri) => {
            is_principal(doc, node, principal_attribute)
                && doc
                    .name(node)
                    .is_some_and(|name| name.namespace.as_deref() == Some(uri.as_str()))
        }
        NodeTest::Name { namespace, local } => {
            is_principal(doc, node, principal_attribute)
                && doc
                    .name(node)
                    .is_some_and(|name| name.is(namespace.as_deref(), local))
        }
    }
}

fn is_principal(doc: &Document, node: NodeId, attribute_axis: bool) -> bool {
    if attribute_axis {
        doc.is_attribute(node)
    } else {
        doc.is_element(node)
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value, doc: &Document) -> bool {
    match (left, right) {
        (Value::Nodes(left), Value::Nodes(right)) => {
            let right: Vec<String> = right.iter().map(|node| doc.string_value(*node)).collect();
            left.iter().any(|node| {
                let left = doc.string_value(*node);
                right
                    .iter()
                    .any(|right| compare_atoms(op, &Atom::String(&left), &Atom::String(right)))
            })
        }
        (Value::Nodes(nodes), other) => compare_node_set(op, nodes, other, doc),
        (other, Value::Nodes(nodes)) => compare_node_set(op.flip(), nodes, other, doc),
        (left, right) => compare_values(op, left, right, doc),
    }
}

fn compare_node_set(op: CompareOp, nodes: &[NodeId], other: &Value, doc: &Document) -> bool {
    match other {
        Value::Boolean(value) => {
            compare_atoms(op, &Atom::Boolean(!nodes.is_empty()), &Atom::Boolean(*value))
        }
        Value::Number(number) => nodes.iter().any(|node| {
            let value = string_to_number(&doc.string_value(*node));
            compare_atoms(op, &Atom::Number(value), &Atom::Number(*number))
        }),
        other => {
            let text = other.to_string_value(doc);
            nodes.iter().any(|node| {
                compare_atoms(
                    op,
                    &Atom::String(&doc.string_value(*node)),
                    &Atom::String(&text),
                )
            })
        }
    }
}

fn compare_values(op: CompareOp, left: &Value, right: &Value, doc: &Document) -> bool {
    let is_equality = matches!(op, CompareOp::Eq | CompareOp::Ne);
    if !is_equality {
        return compare_atoms(
            op,
            &Atom::Number(left.to_number(doc)),
            &Atom::Number(right.to_number(doc)),
        );
    }
    if matches!(left, Value::Boolean(_)) || matches!(right, Value::Boolean(_)) {
        compare_atoms(
            op,
            &Atom::Boolean(left.to_boolean()),
            &Atom::Boolean(right.to_boolean()),
        )
    } else if matches!(left, Value::Number(_)) || matches!(right, Value::Number(_)) {
        compare_atoms(
            op,
            &Atom::Number(left.to_number(doc)),
            &Atom::Number(right.to_number(doc)),
        )
    } else {
        let left = left.to_string_value(doc);
        let right = right.to_string_value(doc);
        compare_atoms(op, &Atom::String(&left), &Atom::String(&right))
    }
}

enum Atom<'a> {
    String(&'a str),
    Number(f64),
    Boolean(bool),
}

impl Atom<'_> {
    fn number(&self) -> f64 {
        match self {
            Self::String(text) => string_to_number(text),
            Self::Number(number) => *number,
            Self::Boolean(value) => f64::from(u8::from(*value)),
        }
    }
}

fn compare_atoms(op: CompareOp, left: &Atom<'_>, right: &Atom<'_>) -> bool {
    match op {
        CompareOp::Eq | CompareOp::Ne => {
            let equal = match (left, right) {
                (Atom::String(left), Atom::String(right)) => left == right,
                (Atom::Boolean(left), Atom::Boolean(right)) => left == right,
                _ => left.number() == right.number(),
            };
            equal == (op == CompareOp::Eq)
        }
        CompareOp::Lt => left.number() < right.number(),
        CompareOp::Le => left.number() <= right.number(),
        CompareOp::Gt => left.number() > right.number(),
        CompareOp::Ge => left.number() >= right.number(),
    }
}
