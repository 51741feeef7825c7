//! Stylesheet execution.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{info, trace};

use crate::dom::{Document, NodeId, NodeKind};
use crate::error::XsltError;
use crate::output::{OutNode, serialize};
use crate::stylesheet::{
    Avt, AvtPart, Binding, BindingValue, Instruction, Sort, SortType, Stylesheet,
};
use crate::xpath::{Context, Value, Variables, XPath, string_to_number};

/// Nesting limit for template invocations.
const MAX_DEPTH: usize = 128;

/// Context node together with its position in the current node list.
#[derive(Debug, Clone, Copy)]
struct Focus {
    node: NodeId,
    position: usize,
    size: usize,
}

impl Focus {
    fn single(node: NodeId) -> Self {
        Self {
            node,
            position: 1,
            size: 1,
        }
    }
}

struct Scope<'a> {
    locals: &'a [(String, Value)],
    globals: &'a HashMap<String, Value>,
}

impl Variables for Scope<'_> {
    fn get(&self, name: &str) -> Option<Value> {
        self.locals
            .iter()
            .rev()
            .find(|(local, _)| local == name)
            .map(|(_, value)| value.clone())
            .or_else(|| self.globals.get(name).cloned())
    }
}

/// Result-tree frame under construction.
struct Frame {
    element: Option<OpenElement>,
    children: Vec<OutNode>,
}

struct OpenElement {
    name: String,
    namespaces: Vec<(Option<String>, String)>,
    attributes: Vec<(String, String)>,
}

pub(crate) struct Executor<'s, 'd> {
    sheet: &'s Stylesheet,
    doc: &'d Document,
    globals: HashMap<String, Value>,
    locals: Vec<(String, Value)>,
    frames: Vec<Frame>,
    depth: usize,
}

impl<'s, 'd> Executor<'s, 'd> {
    pub(crate) fn new(sheet: &'s Stylesheet, doc: &'d Document) -> Self {
        Self {
            sheet,
            doc,
            globals: HashMap::new(),
            locals: Vec::new(),
            frames: vec![Frame {
                element: None,
                children: Vec::new(),
            }],
            depth: 0,
        }
    }

    pub(crate) fn run(mut self) -> Result<String, XsltError> {
        let sheet = self.sheet;
        let root = self.doc.root();
        for global in &sheet.globals {
            let value = self.binding_value(&global.value, Focus::single(root))?;
            self.globals.insert(global.name.clone(), value);
        }
        self.apply_templates(vec![root], None, &[])?;
        let result = self
            .frames
            .pop()
            .map(|frame| frame.children)
            .unwrap_or_default();
        serialize(&result, &self.sheet.output)
    }

    fn eval(&self, xpath: &XPath, focus: Focus) -> Result<Value, XsltError> {
        let scope = Scope {
            locals: &self.locals,
            globals: &self.globals,
        };
        let ctx = Context {
            doc: self.doc,
            node: focus.node,
            position: focus.position,
            size: focus.size,
            current: focus.node,
            variables: &scope,
        };
        Ok(xpath.evaluate_in(&ctx)?)
    }

    fn eval_string(&self, xpath: &XPath, focus: Focus) -> Result<String, XsltError> {
        Ok(self.eval(xpath, focus)?.to_string_value(self.doc))
    }

    fn eval_nodes(&self, xpath: &XPath, focus: Focus) -> Result<Vec<NodeId>, XsltError> {
        self.eval(xpath, focus)?
            .into_nodes()
            .map_err(|error| XsltError::runtime(format!("select=\"{xpath}\": {error}")))
    }

    fn eval_avt(&self, avt: &Avt, focus: Focus) -> Result<String, XsltError> {
        let mut out = String::new();
        for part in &avt.parts {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(xpath) => out.push_str(&self.eval_string(xpath, focus)?),
            }
        }
        Ok(out)
    }

    fn binding_value(&mut self, value: &BindingValue, focus: Focus) -> Result<Value, XsltError> {
        match value {
            BindingValue::Select(xpath) => self.eval(xpath, focus),
            BindingValue::Empty => Ok(Value::String(String::new())),
            BindingValue::Body(body) => {
                let nodes = self.capture(body, focus)?;
                Ok(Value::Fragment(Rc::from(nodes)))
            }
        }
    }

    /// Runs `body` into a detached frame and returns what it produced.
    fn capture(&mut self, body: &[Instruction], focus: Focus) -> Result<Vec<OutNode>, XsltError> {
        self.frames.push(Frame {
            element: None,
            children: Vec::new(),
        });
        let outcome = self.run_body(body, focus);
        let frame = self.frames.pop();
        outcome?;
        Ok(frame.map(|frame| frame.children).unwrap_or_default())
    }

    fn capture_text(&mut self, body: &[Instruction], focus: Focus) -> Result<String, XsltError> {
        let mut text = String::new();
        for node in self.capture(body, focus)? {
            node.collect_text(&mut text);
        }
        Ok(text)
    }

    fn top(&mut self) -> Result<&mut Frame, XsltError> {
        self.frames
            .last_mut()
            .ok_or_else(|| XsltError::runtime("result tree has no open frame"))
    }

    fn push_node(&mut self, node: OutNode) -> Result<(), XsltError> {
        let frame = self.top()?;
        if let (OutNode::Text { text, escape }, Some(OutNode::Text { text: last, escape: last_escape })) =
            (&node, frame.children.last_mut())
        {
            if *escape == *last_escape {
                last.push_str(text);
                return Ok(());
            }
        }
        frame.children.push(node);
        Ok(())
    }

    fn push_text(&mut self, text: String, escape: bool) -> Result<(), XsltError> {
        if text.is_empty() {
            return Ok(());
        }
        self.push_node(OutNode::Text { text, escape })
    }

    fn push_attribute(&mut self, name: String, value: String) -> Result<(), XsltError> {
        let frame = self.top()?;
        let Some(element) = frame.element.as_mut() else {
            return Err(XsltError::runtime(format!(
                "attribute {name} can only be added to an element"
            )));
        };
        if !frame.children.is_empty() {
            return Err(XsltError::runtime(format!(
                "attribute {name} added after element content"
            )));
        }
        match element.attributes.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = value,
            None => element.attributes.push((name, value)),
        }
        Ok(())
    }

    fn declare(&mut self, prefix: Option<String>, uri: String) -> Result<(), XsltError> {
        if let Some(element) = self.top()?.element.as_mut() {
            if !element.namespaces.iter().any(|(existing, _)| *existing == prefix) {
                element.namespaces.push((prefix, uri));
            }
        }
        Ok(())
    }

    fn open_element(&mut self, name: String, namespaces: Vec<(Option<String>, String)>) {
        self.frames.push(Frame {
            element: Some(OpenElement {
                name,
                namespaces,
                attributes: Vec::new(),
            }),
            children: Vec::new(),
        });
    }

    fn close_element(&mut self) -> Result<(), XsltError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| XsltError::runtime("no element is open"))?;
        let Some(element) = frame.element else {
            return Err(XsltError::runtime("closed a fragment frame as an element"));
        };
        self.push_node(OutNode::Element {
            name: element.name,
            namespaces: element.namespaces,
            attributes: element.attributes,
            children: frame.children,
        })
    }

    fn run_body(&mut self, body: &[Instruction], focus: Focus) -> Result<(), XsltError> {
        let mark = self.locals.len();
        let outcome = body
            .iter()
            .try_for_each(|instruction| self.execute(instruction, focus));
        self.locals.truncate(mark);
        outcome
    }

    fn execute(&mut self, instruction: &Instruction, focus: Focus) -> Result<(), XsltError> {
        match instruction {
            Instruction::Text { text, escape } => self.push_text(text.clone(), *escape),
            Instruction::ValueOf { select, escape } => {
                let text = self.eval_string(select, focus)?;
                self.push_text(text, *escape)
            }
            Instruction::LiteralElement {
                name,
                namespaces,
                attributes,
                body,
            } => {
                let mut values = Vec::with_capacity(attributes.len());
                for (name, avt) in attributes {
                    values.push((name.clone(), self.eval_avt(avt, focus)?));
                }
                self.open_element(name.clone(), namespaces.clone());
                for (name, value) in values {
                    self.push_attribute(name, value)?;
                }
                self.run_body(body, focus)?;
                self.close_element()
            }
            Instruction::CopyOf { select } => match self.eval(select, focus)? {
                Value::Nodes(nodes) => nodes
                    .into_iter()
                    .try_for_each(|node| self.copy_deep(node)),
                Value::Fragment(nodes) => nodes
                    .iter()
                    .try_for_each(|node| self.push_node(node.clone())),
                other => {
                    let text = other.to_string_value(self.doc);
                    self.push_text(text, true)
                }
            },
            Instruction::Copy { body } => self.copy_shallow(body, focus),
            Instruction::ApplyTemplates {
                select,
                mode,
                sorts,
                params,
            } => {
                let nodes = match select {
                    Some(select) => self.eval_nodes(select, focus)?,
                    None => self.doc.children(focus.node).to_vec(),
                };
                let nodes = self.sort(nodes, sorts)?;
                let params = self.with_params(params, focus)?;
                self.apply_templates(nodes, mode.as_deref(), &params)
            }
            Instruction::CallTemplate { name, params } => {
                let index = *self.sheet.named.get(name).ok_or_else(|| {
                    XsltError::runtime(format!("no template named {name:?}"))
                })?;
                let params = self.with_params(params, focus)?;
                self.invoke(index, &params, focus)
            }
            Instruction::ForEach {
                select,
                sorts,
                body,
            } => {
                let nodes = self.eval_nodes(select, focus)?;
                let nodes = self.sort(nodes, sorts)?;
                let size = nodes.len();
                for (index, node) in nodes.into_iter().enumerate() {
                    self.run_body(
                        body,
                        Focus {
                            node,
                            position: index + 1,
                            size,
                        },
                    )?;
                }
                Ok(())
            }
            Instruction::If { test, body } => {
                if self.eval(test, focus)?.to_boolean() {
                    self.run_body(body, focus)?;
                }
                Ok(())
            }
            Instruction::Choose {
                branches,
                otherwise,
            } => {
                for (test, body) in branches {
                    if self.eval(test, focus)?.to_boolean() {
                        return self.run_body(body, focus);
                    }
                }
                self.run_body(otherwise, focus)
            }
            Instruction::Variable(binding) => {
                let value = self.binding_value(&binding.value, focus)?;
                self.locals.push((binding.name.clone(), value));
                Ok(())
            }
            Instruction::Element {
                name,
                namespace,
                scope,
                default_namespace,
                body,
            } => {
                let qualified = self.eval_avt(name, focus)?;
                let (prefix, _) = split_qname(&qualified);
                let uri = match namespace {
                    Some(namespace) => self.eval_avt(namespace, focus)?,
                    None => match prefix {
                        Some(prefix) => scope.get(prefix).cloned().ok_or_else(|| {
                            XsltError::runtime(format!(
                                "element name {qualified:?} uses an undeclared prefix"
                            ))
                        })?,
                        None => default_namespace.clone().unwrap_or_default(),
                    },
                };
                let declaration = (prefix.map(str::to_string), uri);
                self.open_element(qualified.clone(), vec![declaration]);
                self.run_body(body, focus)?;
                self.close_element()
            }
            Instruction::Attribute {
                name,
                namespace,
                scope,
                body,
            } => {
                let qualified = self.eval_avt(name, focus)?;
                let (prefix, _) = split_qname(&qualified);
                let uri = match namespace {
                    Some(namespace) => Some(self.eval_avt(namespace, focus)?),
                    None => match prefix {
                        Some(prefix) => Some(scope.get(prefix).cloned().ok_or_else(|| {
                            XsltError::runtime(format!(
                                "attribute name {qualified:?} uses an undeclared prefix"
                            ))
                        })?),
                        None => None,
                    },
                };
                let value = self.capture_text(body, focus)?;
                if let (Some(prefix), Some(uri)) = (prefix, uri) {
                    self.declare(Some(prefix.to_string()), uri)?;
                }
                self.push_attribute(qualified, value)
            }
            Instruction::Comment { body } => {
                let text = self.capture_text(body, focus)?;
                self.push_node(OutNode::Comment(text))
            }
            Instruction::Message { body, terminate } => {
                let message = self.capture_text(body, focus)?;
                if *terminate {
                    return Err(XsltError::Terminated { message });
                }
                info!(target: "formentry_xslt::message", "{message}");
                Ok(())
            }
            Instruction::Fallback { name, body } => match body {
                Some(body) => self.run_body(body, focus),
                None => Err(XsltError::runtime(format!(
                    "instruction xsl:{name} is not supported and has no xsl:fallback"
                ))),
            },
        }
    }

    fn with_params(
        &mut self,
        params: &[Binding],
        focus: Focus,
    ) -> Result<Vec<(String, Value)>, XsltError> {
        let mut values = Vec::with_capacity(params.len());
        for param in params {
            values.push((param.name.clone(), self.binding_value(&param.value, focus)?));
        }
        Ok(values)
    }

    fn sort(&self, nodes: Vec<NodeId>, sorts: &[Sort]) -> Result<Vec<NodeId>, XsltError> {
        if sorts.is_empty() {
            return Ok(nodes);
        }
        let size = nodes.len();
        let mut keys = Vec::with_capacity(size);
        for (index, node) in nodes.iter().enumerate() {
            let focus = Focus {
                node: *node,
                position: index + 1,
                size,
            };
            let mut row = Vec::with_capacity(sorts.len());
            for sort in sorts {
                row.push(self.eval_string(&sort.select, focus)?);
            }
            keys.push(row);
        }
        let mut order: Vec<usize> = (0..size).collect();
        order.sort_by(|left, right| {
            for (column, sort) in sorts.iter().enumerate() {
                let a = &keys[*left][column];
                let b = &keys[*right][column];
                let ordering = match sort.data_type {
                    SortType::Text => a.cmp(b),
                    SortType::Number => compare_numbers(string_to_number(a), string_to_number(b)),
                };
                let ordering = if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(order.into_iter().map(|index| nodes[index]).collect())
    }

    fn apply_templates(
        &mut self,
        nodes: Vec<NodeId>,
        mode: Option<&str>,
        params: &[(String, Value)],
    ) -> Result<(), XsltError> {
        let size = nodes.len();
        for (index, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                position: index + 1,
                size,
            };
            match self.find_rule(node, mode)? {
                Some(template) => self.invoke(template, params, focus)?,
                None => self.builtin(node, mode)?,
            }
        }
        Ok(())
    }

    /// Highest-priority rule matching `node` in `mode`; the last one wins ties.
    fn find_rule(&self, node: NodeId, mode: Option<&str>) -> Result<Option<usize>, XsltError> {
        let scope = Scope {
            locals: &[],
            globals: &self.globals,
        };
        let mut best: Option<(f64, usize)> = None;
        for rule in &self.sheet.rules {
            if rule.mode.as_deref() != mode {
                continue;
            }
            if best.is_some_and(|(priority, _)| rule.priority < priority) {
                continue;
            }
            if rule.pattern.matches(self.doc, node, &scope)? {
                best = Some((rule.priority, rule.template));
            }
        }
        Ok(best.map(|(_, template)| template))
    }

    fn builtin(&mut self, node: NodeId, mode: Option<&str>) -> Result<(), XsltError> {
        let doc = self.doc;
        match doc.kind(node) {
            NodeKind::Root | NodeKind::Element { .. } => {
                self.apply_templates(doc.children(node).to_vec(), mode, &[])
            }
            NodeKind::Text(text) => self.push_text(text.clone(), true),
            NodeKind::Attribute { value, .. } => self.push_text(value.clone(), true),
            NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } => Ok(()),
        }
    }

    fn invoke(
        &mut self,
        template: usize,
        params: &[(String, Value)],
        focus: Focus,
    ) -> Result<(), XsltError> {
        let sheet = self.sheet;
        let template = sheet
            .templates
            .get(template)
            .ok_or_else(|| XsltError::runtime("template index out of range"))?;
        if self.depth >= MAX_DEPTH {
            return Err(XsltError::runtime(format!(
                "template recursion exceeded {MAX_DEPTH} levels"
            )));
        }
        trace!(node = focus.node.index(), depth = self.depth, "invoking template");

        self.depth += 1;
        let saved = std::mem::take(&mut self.locals);
        let outcome = self.bind_and_run(&template.params, &template.body, params, focus);
        self.locals = saved;
        self.depth -= 1;
        outcome
    }

    fn bind_and_run(
        &mut self,
        declared: &[Binding],
        body: &[Instruction],
        passed: &[(String, Value)],
        focus: Focus,
    ) -> Result<(), XsltError> {
        for param in declared {
            let value = match passed.iter().find(|(name, _)| *name == param.name) {
                Some((_, value)) => value.clone(),
                None => self.binding_value(&param.value, focus)?,
            };
            self.locals.push((param.name.clone(), value));
        }
        self.run_body(body, focus)
    }

    fn copy_shallow(&mut self, body: &[Instruction], focus: Focus) -> Result<(), XsltError> {
        let doc = self.doc;
        match doc.kind(focus.node) {
            NodeKind::Root => self.run_body(body, focus),
            NodeKind::Element { name, .. } => {
                let namespaces = element_namespaces(doc, focus.node);
                self.open_element(name.qualified(), namespaces);
                self.run_body(body, focus)?;
                self.close_element()
            }
            NodeKind::Attribute { name, value } => {
                if let (Some(prefix), Some(uri)) = (&name.prefix, &name.namespace) {
                    self.declare(Some(prefix.clone()), uri.clone())?;
                }
                self.push_attribute(name.qualified(), value.clone())
            }
            NodeKind::Text(text) => self.push_text(text.clone(), true),
            NodeKind::Comment(text) => self.push_node(OutNode::Comment(text.clone())),
            NodeKind::ProcessingInstruction { .. } => Ok(()),
        }
    }

    fn copy_deep(&mut self, node: NodeId) -> Result<(), XsltError> {
        let doc = self.doc;
        match doc.kind(node) {
            NodeKind::Root => doc
                .children(node)
                .iter()
                .try_for_each(|child| self.copy_deep(*child)),
            NodeKind::Attribute { name, value } => {
                if let (Some(prefix), Some(uri)) = (&name.prefix, &name.namespace) {
                    self.declare(Some(prefix.clone()), uri.clone())?;
                }
                self.push_attribute(name.qualified(), value.clone())
            }
            NodeKind::Element { .. } => {
                let tree = deep_element(doc, node);
                self.push_node(tree)
            }
            NodeKind::Text(text) => self.push_text(text.clone(), true),
            NodeKind::Comment(text) => self.push_node(OutNode::Comment(text.clone())),
            NodeKind::ProcessingInstruction { .. } => Ok(()),
        }
    }
}

/// Declarations an element copied from the input needs: its own plus those its name and attributes use.
fn element_namespaces(doc: &Document, element: NodeId) -> Vec<(Option<String>, String)> {
    let mut out: Vec<(Option<String>, String)> = Vec::new();
    let mut add = |prefix: Option<String>, uri: String| {
        if !out.iter().any(|(existing, _)| *existing == prefix) {
            out.push((prefix, uri));
        }
    };
    if let Some(name) = doc.name(element) {
        add(name.prefix.clone(), name.namespace.clone().unwrap_or_default());
    }
    for attribute in doc.attributes(element) {
        if let Some(name) = doc.name(*attribute) {
            if let (Some(prefix), Some(uri)) = (&name.prefix, &name.namespace) {
                add(Some(prefix.clone()), uri.clone());
            }
        }
    }
    if let NodeKind::Element { namespaces, .. } = doc.kind(element) {
        for (prefix, uri) in namespaces {
            add(prefix.clone(), uri.clone());
        }
    }
    out
}

fn deep_element(doc: &Document, element: NodeId) -> OutNode {
    let name = doc
        .name(element)
        .map(|name| name.qualified())
        .unwrap_or_default();
    let attributes = doc
        .attributes(element)
        .iter()
        .filter_map(|attribute| match doc.kind(*attribute) {
            NodeKind::Attribute { name, value } => Some((name.qualified(), value.clone())),
            _ => None,
        })
        .collect();
    let children = doc
        .children(element)
        .iter()
        .filter_map(|child| match doc.kind(*child) {
            NodeKind::Element { .. } => Some(deep_element(doc, *child)),
            NodeKind::Text(text) => Some(OutNode::Text {
                text: text.clone(),
                escape: true,
            }),
            NodeKind::Comment(text) => Some(OutNode::Comment(text.clone())),
            _ => None,
        })
        .collect();
    OutNode::Element {
        name,
        namespaces: element_namespaces(doc, element),
        attributes,
        children,
    }
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Numeric sort order with NaN first.
fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}
