//! XPath 1.0 expressions over a [`Document`].
//!
//! Expressions are compiled once against a set of prefix bindings and can
//! then be evaluated any number of times. The namespace axis is not
//! supported; everything else in the XPath 1.0 core library is.

mod eval;
mod functions;
mod lexer;
pub(crate) mod parser;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::dom::{Document, NodeId};
use crate::error::XPathError;
use crate::output::OutNode;

pub(crate) use eval::{evaluate, matches_test};
use parser::Expr;

/// Result of evaluating an expression.
#[derive(Debug, Clone)]
pub enum Value {
    /// Node-set in document order.
    Nodes(Vec<NodeId>),
    String(String),
    Number(f64),
    Boolean(bool),
    /// Result tree fragment built by a variable body.
    Fragment(Rc<[OutNode]>),
}

impl Value {
    pub fn to_string_value(&self, doc: &Document) -> String {
        match self {
            Self::Nodes(nodes) => nodes
                .first()
                .map(|node| doc.string_value(*node))
                .unwrap_or_default(),
            Self::String(text) => text.clone(),
            Self::Number(number) => number_to_string(*number),
            Self::Boolean(value) => value.to_string(),
            Self::Fragment(nodes) => {
                let mut out = String::new();
                for node in nodes.iter() {
                    node.collect_text(&mut out);
                }
                out
            }
        }
    }

    pub fn to_number(&self, doc: &Document) -> f64 {
        match self {
            Self::Number(number) => *number,
            Self::Boolean(value) => f64::from(u8::from(*value)),
            other => string_to_number(&other.to_string_value(doc)),
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Nodes(nodes) => !nodes.is_empty(),
            Self::String(text) => !text.is_empty(),
            Self::Number(number) => *number != 0.0 && !number.is_nan(),
            Self::Boolean(value) => *value,
            Self::Fragment(_) => true,
        }
    }

    /// The node-set, or a type error for any other kind of value.
    pub fn into_nodes(self) -> Result<Vec<NodeId>, XPathError> {
        match self {
            Self::Nodes(nodes) => Ok(nodes),
            other => Err(XPathError::Type {
                message: format!("expected a node-set, got {}", other.type_name()),
            }),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Nodes(_) => "node-set",
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::Fragment(_) => "result tree fragment",
        }
    }
}

/// Variable lookup used while evaluating an expression.
pub trait Variables {
    fn get(&self, name: &str) -> Option<Value>;
}

/// Scope with no variables bound.
pub struct NoVariables;

impl Variables for NoVariables {
    fn get(&self, _name: &str) -> Option<Value> {
        None
    }
}

impl Variables for BTreeMap<String, Value> {
    fn get(&self, name: &str) -> Option<Value> {
        BTreeMap::get(self, name).cloned()
    }
}

/// Evaluation context: the context node with its position and size, plus the
/// XSLT current node.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub doc: &'a Document,
    pub node: NodeId,
    pub position: usize,
    pub size: usize,
    pub current: NodeId,
    pub variables: &'a dyn Variables,
}

impl<'a> Context<'a> {
    pub fn new(doc: &'a Document, node: NodeId, variables: &'a dyn Variables) -> Self {
        Self {
            doc,
            node,
            position: 1,
            size: 1,
            current: node,
            variables,
        }
    }

    pub(crate) fn at(&self, node: NodeId, position: usize, size: usize) -> Self {
        Self {
            node,
            position,
            size,
            ..*self
        }
    }
}

/// A compiled XPath expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    /// Compiles an expression that uses no namespace prefixes.
    pub fn compile(source: &str) -> Result<Self, XPathError> {
        Self::compile_with(source, &BTreeMap::new())
    }

    /// Compiles an expression, resolving prefixes through `namespaces`.
    pub fn compile_with(
        source: &str,
        namespaces: &BTreeMap<String, String>,
    ) -> Result<Self, XPathError> {
        let expr = parser::parse(source, namespaces)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates with `node` as the context node and no variables.
    pub fn evaluate(&self, doc: &Document, node: NodeId) -> Result<Value, XPathError> {
        self.evaluate_in(&Context::new(doc, node, &NoVariables))
    }

    pub fn evaluate_string(&self, doc: &Document, node: NodeId) -> Result<String, XPathError> {
        Ok(self.evaluate(doc, node)?.to_string_value(doc))
    }

    pub fn evaluate_in(&self, ctx: &Context<'_>) -> Result<Value, XPathError> {
        evaluate(&self.expr, ctx)
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// XPath `number()` conversion of a string.
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim_matches(|ch| matches!(ch, ' ' | '\t' | '\n' | '\r'));
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let well_formed = !unsigned.is_empty()
        && unsigned != "."
        && unsigned.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
        && unsigned.matches('.').count() <= 1;
    if !well_formed {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// XPath `string()` conversion of a number.
pub fn number_to_string(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_string()
    } else if number.is_infinite() {
        if number > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if number == 0.0 {
        "0".to_string()
    } else if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{number:.0}")
    } else {
        format!("{number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::parse(
            r#"<form id="12"><obs code="a">1</obs><obs code="b">2.5</obs><obs code="c">x</obs></form>"#,
        )
        .unwrap()
    }

    fn eval_string(expr: &str) -> String {
        let doc = doc();
        XPath::compile(expr)
            .unwrap()
            .evaluate_string(&doc, doc.root())
            .unwrap()
    }

    #[test]
    fn converts_strings_to_numbers() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number("-.5"), -0.5);
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("").is_nan());
        assert!(string_to_number("+1").is_nan());
    }

    #[test]
    fn formats_numbers() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.25), "0.25");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn evaluates_paths_and_predicates() {
        assert_eq!(eval_string("/form/@id"), "12");
        assert_eq!(eval_string("/form/obs[2]/@code"), "b");
        assert_eq!(eval_string("/form/obs[last()]"), "x");
        assert_eq!(eval_string("/form/obs[. = 2.5]/@code"), "b");
        assert_eq!(eval_string("count(//obs)"), "3");
        assert_eq!(eval_string("name(/form/obs[1]/following-sibling::*[1])"), "obs");
        assert_eq!(eval_string("/form/obs[3]/preceding-sibling::obs[1]/@code"), "b");
    }

    #[test]
    fn evaluates_functions() {
        assert_eq!(eval_string("concat('MSH', '|', /form/@id)"), "MSH|12");
        assert_eq!(eval_string("substring('12345', 1.5, 2.6)"), "234");
        assert_eq!(eval_string("translate('bar', 'abc', 'ABC')"), "BAr");
        assert_eq!(eval_string("normalize-space('  a   b ')"), "a b");
        assert_eq!(eval_string("substring-after('2024-01-02', '-')"), "01-02");
        assert_eq!(eval_string("sum(/form/obs[position() < 3])"), "3.5");
        assert_eq!(eval_string("string(number('abc'))"), "NaN");
    }

    #[test]
    fn compares_node_sets_existentially() {
        assert_eq!(eval_string("/form/obs = 'x'"), "true");
        assert_eq!(eval_string("/form/obs != 'x'"), "true");
        assert_eq!(eval_string("/form/obs > 2"), "true");
        assert_eq!(eval_string("2 < /form/obs"), "true");
        assert_eq!(eval_string("/form/missing = ''"), "false");
    }

    #[test]
    fn arithmetic_and_union() {
        assert_eq!(eval_string("7 mod 3 + 10 div 4"), "3.5");
        assert_eq!(eval_string("-(2 * 3)"), "-6");
        assert_eq!(eval_string("count(/form/obs[1] | /form/obs | /form)"), "4");
    }

    #[test]
    fn reports_unbound_variables() {
        let doc = doc();
        let error = XPath::compile("$missing")
            .unwrap()
            .evaluate(&doc, doc.root())
            .unwrap_err();
        assert_eq!(
            error,
            XPathError::UnboundVariable {
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn reads_variables_from_scope() {
        let doc = doc();
        let mut scope = BTreeMap::new();
        scope.insert("n".to_string(), Value::Number(2.0));
        let ctx = Context::new(&doc, doc.root(), &scope);
        let value = XPath::compile("/form/obs[$n]/@code")
            .unwrap()
            .evaluate_in(&ctx)
            .unwrap();
        assert_eq!(value.to_string_value(&doc), "b");
    }
}
