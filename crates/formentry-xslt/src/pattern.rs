//! Template match patterns.
//!
//! A pattern is a restricted location path. A node matches when some
//! ancestor-or-self of it, used as the context, selects the node.

use std::collections::BTreeMap;

use crate::dom::{Document, NodeId};
use crate::error::XsltError;
use crate::xpath::parser::{Axis, Expr, NodeTest, Path, PathStart, Step};
use crate::xpath::{Context, Variables, evaluate, matches_test};

/// One alternative of a `|`-separated pattern.
#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    source: String,
    expr: Expr,
    last_step: Option<(Axis, NodeTest)>,
    absolute: bool,
    default_priority: f64,
}

impl Pattern {
    /// Compiles `source` into its union alternatives.
    pub(crate) fn compile(
        source: &str,
        namespaces: &BTreeMap<String, String>,
    ) -> Result<Vec<Self>, XsltError> {
        let expr = crate::xpath::parser::parse(source, namespaces).map_err(|error| {
            XsltError::XPath {
                context: format!("pattern {source:?}"),
                source: error,
            }
        })?;
        let mut alternatives = Vec::new();
        flatten_union(expr, &mut alternatives);
        alternatives
            .into_iter()
            .map(|expr| Self::alternative(source, expr))
            .collect()
    }

    fn alternative(source: &str, expr: Expr) -> Result<Self, XsltError> {
        let invalid = |reason: &str| XsltError::compile(format!("invalid pattern {source:?}: {reason}"));
        let Expr::Path(path) = &expr else {
            return Err(invalid("patterns must be location paths"));
        };
        let absolute = match path.start {
            PathStart::Root => true,
            PathStart::Context => false,
            PathStart::Filter { .. } => return Err(invalid("id() and key() patterns are not supported")),
        };
        for step in &path.steps {
            let allowed = match step.axis {
                Axis::Child | Axis::Attribute => true,
                Axis::DescendantOrSelf => step.test == NodeTest::Node && step.predicates.is_empty(),
                _ => false,
            };
            if !allowed {
                return Err(invalid("only child and attribute steps are allowed"));
            }
        }
        let last_step = path
            .steps
            .last()
            .map(|step| (step.axis, step.test.clone()));
        let default_priority = default_priority(path);
        Ok(Self {
            source: source.to_string(),
            expr,
            last_step,
            absolute,
            default_priority,
        })
    }

    pub(crate) fn default_priority(&self) -> f64 {
        self.default_priority
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn matches(
        &self,
        doc: &Document,
        node: NodeId,
        variables: &dyn Variables,
    ) -> Result<bool, XsltError> {
        match &self.last_step {
            None => return Ok(node == doc.root()),
            Some((axis, test)) => {
                if !matches_test(doc, node, *axis, test) {
                    return Ok(false);
                }
                if *axis == Axis::Attribute && !doc.is_attribute(node) {
                    return Ok(false);
                }
            }
        }

        let selects = |context: NodeId| -> Result<bool, XsltError> {
            let ctx = Context::new(doc, context, variables);
            let selected = evaluate(&self.expr, &ctx)?.into_nodes()?;
            Ok(selected.binary_search(&node).is_ok())
        };

        if self.absolute {
            return selects(doc.root());
        }
        let mut candidate = doc.parent(node);
        while let Some(context) = candidate {
            if selects(context)? {
                return Ok(true);
            }
            candidate = doc.parent(context);
        }
        Ok(false)
    }
}

fn flatten_union(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Union(left, right) => {
            flatten_union(*left, out);
            flatten_union(*right, out);
        }
        other => out.push(other),
    }
}

fn default_priority(path: &Path) -> f64 {
    let single: Option<&Step> = match (&path.start, path.steps.as_slice()) {
        (PathStart::Context, [step]) if step.predicates.is_empty() => Some(step),
        _ => None,
    };
    match single.map(|step| &step.test) {
        Some(NodeTest::Name { .. } | NodeTest::ProcessingInstruction(Some(_))) => 0.0,
        Some(NodeTest::NamespaceAny(_)) => -0.25,
        Some(_) => -0.5,
        None => 0.5,
    }
}
