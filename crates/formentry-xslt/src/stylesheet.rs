//! Stylesheet compilation.
//!
//! The stylesheet document is parsed once into templates, match rules and
//! an instruction tree. Unsupported XSLT features are rejected here, except
//! in forwards-compatible mode (a `version` other than `1.0`): unknown
//! top-level elements are then ignored and unknown instructions only fail
//! when they run without an `xsl:fallback`.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::dom::{Document, NodeId, NodeKind, QName, is_xml_whitespace};
use crate::error::XsltError;
use crate::exec::Executor;
use crate::output::{OutputMethod, OutputSettings};
use crate::pattern::Pattern;
use crate::xpath::XPath;

/// Namespace of XSLT 1.0 instructions.
pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// A compiled XSLT 1.0 stylesheet.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    pub(crate) templates: Vec<Template>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) named: HashMap<String, usize>,
    pub(crate) globals: Vec<Binding>,
    pub(crate) output: OutputSettings,
    space_rules: Vec<SpaceRule>,
}

#[derive(Debug, Clone)]
pub(crate) struct Template {
    pub params: Vec<Binding>,
    pub body: Vec<Instruction>,
}

/// A match rule: one pattern alternative pointing at a template.
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub pattern: Pattern,
    pub priority: f64,
    pub mode: Option<String>,
    pub template: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub name: String,
    pub value: BindingValue,
}

#[derive(Debug, Clone)]
pub(crate) enum BindingValue {
    Select(XPath),
    Body(Vec<Instruction>),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SortType {
    Text,
    Number,
}

#[derive(Debug, Clone)]
pub(crate) struct Sort {
    pub select: XPath,
    pub data_type: SortType,
    pub descending: bool,
}

/// Attribute value template.
#[derive(Debug, Clone)]
pub(crate) struct Avt {
    pub parts: Vec<AvtPart>,
}

#[derive(Debug, Clone)]
pub(crate) enum AvtPart {
    Literal(String),
    Expr(XPath),
}

#[derive(Debug, Clone)]
pub(crate) enum Instruction {
    Text {
        text: String,
        escape: bool,
    },
    LiteralElement {
        name: String,
        namespaces: Vec<(Option<String>, String)>,
        attributes: Vec<(String, Avt)>,
        body: Vec<Instruction>,
    },
    ValueOf {
        select: XPath,
        escape: bool,
    },
    CopyOf {
        select: XPath,
    },
    Copy {
        body: Vec<Instruction>,
    },
    ApplyTemplates {
        select: Option<XPath>,
        mode: Option<String>,
        sorts: Vec<Sort>,
        params: Vec<Binding>,
    },
    CallTemplate {
        name: String,
        params: Vec<Binding>,
    },
    ForEach {
        select: XPath,
        sorts: Vec<Sort>,
        body: Vec<Instruction>,
    },
    If {
        test: XPath,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(XPath, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    Variable(Binding),
    Element {
        name: Avt,
        namespace: Option<Avt>,
        /// Prefix bindings in scope, for resolving a prefixed computed name.
        scope: BTreeMap<String, String>,
        default_namespace: Option<String>,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Avt,
        namespace: Option<Avt>,
        scope: BTreeMap<String, String>,
        body: Vec<Instruction>,
    },
    Comment {
        body: Vec<Instruction>,
    },
    Message {
        body: Vec<Instruction>,
        terminate: bool,
    },
    /// Unknown instruction in a forwards-compatible stylesheet.
    Fallback {
        name: String,
        /// Bodies of its `xsl:fallback` children; `None` when it has none.
        body: Option<Vec<Instruction>>,
    },
}

#[derive(Debug, Clone)]
enum SpaceTest {
    Any,
    Namespace(String),
    Name(Option<String>, String),
}

#[derive(Debug, Clone)]
struct SpaceRule {
    test: SpaceTest,
    strip: bool,
}

impl SpaceRule {
    fn priority(&self) -> f64 {
        match self.test {
            SpaceTest::Any => -0.5,
            SpaceTest::Namespace(_) => -0.25,
            SpaceTest::Name(..) => 0.0,
        }
    }

    fn matches(&self, name: &QName) -> bool {
        match &self.test {
            SpaceTest::Any => true,
            SpaceTest::Namespace(uri) => name.namespace.as_deref() == Some(uri.as_str()),
            SpaceTest::Name(namespace, local) => name.is(namespace.as_deref(), local),
        }
    }
}

impl Stylesheet {
    /// Parses and compiles a stylesheet.
    pub fn compile(xslt: &str) -> Result<Self, XsltError> {
        let doc = Document::parse(xslt).map_err(|source| XsltError::StylesheetXml { source })?;
        let root = doc
            .document_element()
            .ok_or_else(|| XsltError::compile("stylesheet has no document element"))?;
        let mut compiler = Compiler {
            doc: &doc,
            excluded: Vec::new(),
            forwards_compatible: false,
        };
        let sheet = compiler.stylesheet(root)?;
        debug!(
            templates = sheet.templates.len(),
            rules = sheet.rules.len(),
            globals = sheet.globals.len(),
            "compiled stylesheet"
        );
        Ok(sheet)
    }

    /// Output settings declared by `xsl:output`.
    pub fn output(&self) -> &OutputSettings {
        &self.output
    }

    /// Parses `input` and runs the stylesheet over it.
    pub fn transform(&self, input: &str) -> Result<String, XsltError> {
        let doc = Document::parse(input).map_err(|source| XsltError::InputXml { source })?;
        self.apply(&doc)
    }

    /// Runs the stylesheet over an already parsed document.
    pub fn apply(&self, doc: &Document) -> Result<String, XsltError> {
        if self.space_rules.iter().any(|rule| rule.strip) {
            let mut stripped = doc.clone();
            stripped.strip_whitespace(|name| self.strips(name));
            return Executor::new(self, &stripped).run();
        }
        Executor::new(self, doc).run()
    }

    fn strips(&self, name: &QName) -> bool {
        let mut best: Option<&SpaceRule> = None;
        for rule in &self.space_rules {
            if !rule.matches(name) {
                continue;
            }
            if best.is_none_or(|current| rule.priority() >= current.priority()) {
                best = Some(rule);
            }
        }
        best.is_some_and(|rule| rule.strip)
    }
}

struct Compiler<'a> {
    doc: &'a Document,
    /// Namespace URIs not copied onto literal result elements.
    excluded: Vec<String>,
    forwards_compatible: bool,
}

impl<'a> Compiler<'a> {
    fn xslt_name(&self, node: NodeId) -> Option<&'a str> {
        match self.doc.kind(node) {
            NodeKind::Element { name, .. } if name.namespace.as_deref() == Some(XSLT_NAMESPACE) => {
                Some(name.local.as_str())
            }
            _ => None,
        }
    }

    fn attr(&self, node: NodeId, local: &str) -> Option<&'a str> {
        self.doc.attribute(node, local)
    }

    fn required(&self, node: NodeId, local: &str) -> Result<&'a str, XsltError> {
        self.attr(node, local).ok_or_else(|| {
            XsltError::compile(format!(
                "<xsl:{}> requires a {local} attribute",
                self.xslt_name(node).unwrap_or("?")
            ))
        })
    }

    fn xpath(&self, node: NodeId, local: &str, source: &str) -> Result<XPath, XsltError> {
        XPath::compile_with(source, &self.doc.in_scope_namespaces(node)).map_err(|error| {
            XsltError::XPath {
                context: format!(
                    "{local} attribute of <xsl:{}>",
                    self.xslt_name(node).unwrap_or("?")
                ),
                source: error,
            }
        })
    }

    fn required_xpath(&self, node: NodeId, local: &str) -> Result<XPath, XsltError> {
        let source = self.required(node, local)?;
        self.xpath(node, local, source)
    }

    fn yes_no(&self, node: NodeId, local: &str) -> Result<bool, XsltError> {
        match self.attr(node, local).map(str::trim) {
            None | Some("no") => Ok(false),
            Some("yes") => Ok(true),
            Some(other) => Err(XsltError::compile(format!(
                "{local} must be \"yes\" or \"no\", got {other:?}"
            ))),
        }
    }

    fn stylesheet(&mut self, root: NodeId) -> Result<Stylesheet, XsltError> {
        let mut sheet = Stylesheet {
            templates: Vec::new(),
            rules: Vec::new(),
            named: HashMap::new(),
            globals: Vec::new(),
            output: OutputSettings::default(),
            space_rules: Vec::new(),
        };

        let Some(kind) = self.xslt_name(root) else {
            return self.simplified(root, sheet);
        };
        if kind != "stylesheet" && kind != "transform" {
            return Err(XsltError::compile(format!(
                "document element must be xsl:stylesheet, found xsl:{kind}"
            )));
        }
        self.forwards_compatible = self.attr(root, "version").is_some_and(is_forwards_version);
        self.excluded = self.excluded_namespaces(root, "exclude-result-prefixes")?;
        self.excluded
            .extend(self.excluded_namespaces(root, "extension-element-prefixes")?);

        for child in self.doc.children(root).to_vec() {
            let NodeKind::Element { .. } = self.doc.kind(child) else {
                if let NodeKind::Text(text) = self.doc.kind(child) {
                    if !is_xml_whitespace(text) {
                        return Err(XsltError::compile(
                            "text is not allowed at the top level of a stylesheet",
                        ));
                    }
                }
                continue;
            };
            let Some(kind) = self.xslt_name(child) else {
                continue;
            };
            match kind {
                "template" => self.template(child, &mut sheet)?,
                "variable" | "param" => sheet.globals.push(self.binding(child)?),
                "output" => self.output(child, &mut sheet.output)?,
                "strip-space" | "preserve-space" => {
                    let strip = kind == "strip-space";
                    for test in self.required(child, "elements")?.split_whitespace() {
                        let test = self.space_test(child, test)?;
                        sheet.space_rules.push(SpaceRule { test, strip });
                    }
                }
                "decimal-format" => {}
                other if self.forwards_compatible => {
                    debug!(element = other, "ignoring unknown top-level element");
                }
                other => {
                    return Err(XsltError::compile(format!(
                        "top-level element xsl:{other} is not supported"
                    )));
                }
            }
        }
        Ok(sheet)
    }

    /// A literal result element used as the whole stylesheet.
    fn simplified(&mut self, root: NodeId, mut sheet: Stylesheet) -> Result<Stylesheet, XsltError> {
        let version = self
            .doc
            .attributes(root)
            .iter()
            .find_map(|attr| match self.doc.kind(*attr) {
                NodeKind::Attribute { name, value } if name.is(Some(XSLT_NAMESPACE), "version") => {
                    Some(value.as_str())
                }
                _ => None,
            });
        let Some(version) = version else {
            return Err(XsltError::compile(
                "document element is neither xsl:stylesheet nor a literal result element with xsl:version",
            ));
        };
        self.forwards_compatible = is_forwards_version(version);
        let body = vec![self.instruction(root)?.ok_or_else(|| {
            XsltError::compile("simplified stylesheet produced no instruction")
        })?];
        sheet.templates.push(Template {
            params: Vec::new(),
            body,
        });
        for pattern in Pattern::compile("/", &BTreeMap::new())? {
            sheet.rules.push(Rule {
                priority: pattern.default_priority(),
                pattern,
                mode: None,
                template: 0,
            });
        }
        Ok(sheet)
    }

    fn excluded_namespaces(&self, node: NodeId, local: &str) -> Result<Vec<String>, XsltError> {
        let scope = self.doc.in_scope_namespaces(node);
        let mut out = Vec::new();
        for prefix in self.attr(node, local).unwrap_or_default().split_whitespace() {
            if prefix == "#default" {
                if let Some(uri) = default_namespace(self.doc, node) {
                    out.push(uri);
                }
                continue;
            }
            let uri = scope.get(prefix).ok_or_else(|| {
                XsltError::compile(format!("{local} names undeclared prefix {prefix:?}"))
            })?;
            out.push(uri.clone());
        }
        Ok(out)
    }

    fn space_test(&self, node: NodeId, test: &str) -> Result<SpaceTest, XsltError> {
        if test == "*" {
            return Ok(SpaceTest::Any);
        }
        let scope = self.doc.in_scope_namespaces(node);
        let resolve = |prefix: &str| {
            scope.get(prefix).cloned().ok_or_else(|| {
                XsltError::compile(format!("undeclared prefix {prefix:?} in {test:?}"))
            })
        };
        match test.split_once(':') {
            Some((prefix, "*")) => Ok(SpaceTest::Namespace(resolve(prefix)?)),
            Some((prefix, local)) => Ok(SpaceTest::Name(Some(resolve(prefix)?), local.to_string())),
            None => Ok(SpaceTest::Name(None, test.to_string())),
        }
    }

    fn output(&self, node: NodeId, output: &mut OutputSettings) -> Result<(), XsltError> {
        if let Some(method) = self.attr(node, "method") {
            output.method = Some(OutputMethod::parse(method).ok_or_else(|| {
                XsltError::compile(format!("unsupported output method {method:?}"))
            })?);
        }
        if self.attr(node, "indent").is_some() {
            output.indent = self.yes_no(node, "indent")?;
        }
        if self.attr(node, "omit-xml-declaration").is_some() {
            output.omit_xml_declaration = self.yes_no(node, "omit-xml-declaration")?;
        }
        if let Some(encoding) = self.attr(node, "encoding") {
            output.encoding = Some(encoding.trim().to_string());
        }
        Ok(())
    }

    fn template(&mut self, node: NodeId, sheet: &mut Stylesheet) -> Result<(), XsltError> {
        let name = self.attr(node, "name").map(|name| name.trim().to_string());
        let matches = self.attr(node, "match");
        if name.is_none() && matches.is_none() {
            return Err(XsltError::compile(
                "xsl:template needs a match or a name attribute",
            ));
        }

        let (params, body) = self.params_and_body(node)?;
        let index = sheet.templates.len();
        sheet.templates.push(Template { params, body });

        if let Some(name) = name {
            // A later template with the same name overrides an earlier one.
            sheet.named.insert(name, index);
        }
        if let Some(source) = matches {
            let priority = match self.attr(node, "priority") {
                Some(value) => Some(value.trim().parse::<f64>().map_err(|_| {
                    XsltError::compile(format!("invalid template priority {value:?}"))
                })?),
                None => None,
            };
            let mode = self.attr(node, "mode").map(|mode| mode.trim().to_string());
            for pattern in Pattern::compile(source, &self.doc.in_scope_namespaces(node))? {
                debug!(pattern = pattern.source(), template = index, "registered template rule");
                sheet.rules.push(Rule {
                    priority: priority.unwrap_or_else(|| pattern.default_priority()),
                    pattern,
                    mode: mode.clone(),
                    template: index,
                });
            }
        }
        Ok(())
    }

    /// Leading `xsl:param` children and the remaining body.
    fn params_and_body(
        &mut self,
        node: NodeId,
    ) -> Result<(Vec<Binding>, Vec<Instruction>), XsltError> {
        let mut params = Vec::new();
        let mut body = Vec::new();
        for child in self.doc.children(node).to_vec() {
            if self.xslt_name(child) == Some("param") {
                if !body.is_empty() {
                    return Err(XsltError::compile(
                        "xsl:param must come before other template content",
                    ));
                }
                params.push(self.binding(child)?);
            } else if let Some(instruction) = self.instruction(child)? {
                body.push(instruction);
            }
        }
        Ok((params, body))
    }

    fn body(&mut self, node: NodeId) -> Result<Vec<Instruction>, XsltError> {
        let mut body = Vec::new();
        for child in self.doc.children(node).to_vec() {
            if let Some(instruction) = self.instruction(child)? {
                body.push(instruction);
            }
        }
        Ok(body)
    }

    fn binding(&mut self, node: NodeId) -> Result<Binding, XsltError> {
        let name = self.required(node, "name")?.trim().to_string();
        let value = match self.attr(node, "select") {
            Some(source) => {
                if self.doc.children(node).iter().any(|child| !self.is_blank(*child)) {
                    return Err(XsltError::compile(format!(
                        "variable {name} has both a select attribute and content"
                    )));
                }
                BindingValue::Select(self.xpath(node, "select", source)?)
            }
            None if self.doc.children(node).is_empty() => BindingValue::Empty,
            None => BindingValue::Body(self.body(node)?),
        };
        Ok(Binding { name, value })
    }

    fn with_params(&mut self, node: NodeId) -> Result<Vec<Binding>, XsltError> {
        let mut params = Vec::new();
        for child in self.doc.children(node).to_vec() {
            if self.xslt_name(child) == Some("with-param") {
                params.push(self.binding(child)?);
            }
        }
        Ok(params)
    }

    fn sorts(&self, node: NodeId) -> Result<Vec<Sort>, XsltError> {
        let mut sorts = Vec::new();
        for child in self.doc.children(node) {
            if self.xslt_name(*child) != Some("sort") {
                continue;
            }
            let select = self.xpath(*child, "select", self.attr(*child, "select").unwrap_or("."))?;
            let data_type = match self.attr(*child, "data-type").map(str::trim) {
                None | Some("text") => SortType::Text,
                Some("number") => SortType::Number,
                Some(other) => {
                    return Err(XsltError::compile(format!("unsupported sort data-type {other:?}")));
                }
            };
            let descending = match self.attr(*child, "order").map(str::trim) {
                None | Some("ascending") => false,
                Some("descending") => true,
                Some(other) => {
                    return Err(XsltError::compile(format!("invalid sort order {other:?}")));
                }
            };
            sorts.push(Sort {
                select,
                data_type,
                descending,
            });
        }
        Ok(sorts)
    }

    fn avt(&self, node: NodeId, value: &str) -> Result<Avt, XsltError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = value.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut expr = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(inner) => expr.push(inner),
                            None => {
                                return Err(XsltError::compile(format!(
                                    "unterminated expression in attribute value {value:?}"
                                )));
                            }
                        }
                    }
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    let xpath = XPath::compile_with(&expr, &self.doc.in_scope_namespaces(node))
                        .map_err(|error| XsltError::XPath {
                            context: format!("attribute value template {value:?}"),
                            source: error,
                        })?;
                    parts.push(AvtPart::Expr(xpath));
                }
                '}' => {
                    return Err(XsltError::compile(format!(
                        "unmatched '}}' in attribute value {value:?}"
                    )));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(Avt { parts })
    }

    fn is_blank(&self, node: NodeId) -> bool {
        matches!(self.doc.kind(node), NodeKind::Text(text) if is_xml_whitespace(text))
            || matches!(self.doc.kind(node), NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. })
    }

    /// Compiles one stylesheet node into an instruction; `None` for ignorable nodes.
    fn instruction(&mut self, node: NodeId) -> Result<Option<Instruction>, XsltError> {
        match self.doc.kind(node) {
            NodeKind::Text(text) => {
                if is_xml_whitespace(text) {
                    return Ok(None);
                }
                return Ok(Some(Instruction::Text {
                    text: text.clone(),
                    escape: true,
                }));
            }
            NodeKind::Element { .. } => {}
            _ => return Ok(None),
        }

        let Some(kind) = self.xslt_name(node) else {
            return self.literal_element(node).map(Some);
        };

        let instruction = match kind {
            "text" => Instruction::Text {
                text: self.doc.string_value(node),
                escape: !self.yes_no(node, "disable-output-escaping")?,
            },
            "value-of" => Instruction::ValueOf {
                select: self.required_xpath(node, "select")?,
                escape: !self.yes_no(node, "disable-output-escaping")?,
            },
            "copy-of" => Instruction::CopyOf {
                select: self.required_xpath(node, "select")?,
            },
            "copy" => Instruction::Copy {
                body: self.body(node)?,
            },
            "apply-templates" => Instruction::ApplyTemplates {
                select: match self.attr(node, "select") {
                    Some(source) => Some(self.xpath(node, "select", source)?),
                    None => None,
                },
                mode: self.attr(node, "mode").map(|mode| mode.trim().to_string()),
                sorts: self.sorts(node)?,
                params: self.with_params(node)?,
            },
            "call-template" => Instruction::CallTemplate {
                name: self.required(node, "name")?.trim().to_string(),
                params: self.with_params(node)?,
            },
            "for-each" => {
                let select = self.required_xpath(node, "select")?;
                let sorts = self.sorts(node)?;
                let mut body = Vec::new();
                for child in self.doc.children(node).to_vec() {
                    if self.xslt_name(child) == Some("sort") {
                        continue;
                    }
                    if let Some(instruction) = self.instruction(child)? {
                        body.push(instruction);
                    }
                }
                Instruction::ForEach { select, sorts, body }
            }
            "if" => Instruction::If {
                test: self.required_xpath(node, "test")?,
                body: self.body(node)?,
            },
            "choose" => self.choose(node)?,
            "variable" => Instruction::Variable(self.binding(node)?),
            "element" => Instruction::Element {
                name: self.avt(node, self.required(node, "name")?)?,
                namespace: match self.attr(node, "namespace") {
                    Some(value) => Some(self.avt(node, value)?),
                    None => None,
                },
                scope: self.doc.in_scope_namespaces(node),
                default_namespace: default_namespace(self.doc, node),
                body: self.body(node)?,
            },
            "attribute" => Instruction::Attribute {
                name: self.avt(node, self.required(node, "name")?)?,
                namespace: match self.attr(node, "namespace") {
                    Some(value) => Some(self.avt(node, value)?),
                    None => None,
                },
                scope: self.doc.in_scope_namespaces(node),
                body: self.body(node)?,
            },
            "comment" => Instruction::Comment {
                body: self.body(node)?,
            },
            "message" => Instruction::Message {
                body: self.body(node)?,
                terminate: self.yes_no(node, "terminate")?,
            },
            "fallback" => return Ok(None),
            "param" => {
                return Err(XsltError::compile(
                    "xsl:param is only allowed at the start of a template or at the top level",
                ));
            }
            "sort" | "with-param" | "when" | "otherwise" => {
                return Err(XsltError::compile(format!("xsl:{kind} is misplaced")));
            }
            other if self.forwards_compatible => self.fallback(node, other)?,
            other => {
                return Err(XsltError::compile(format!(
                    "instruction xsl:{other} is not supported"
                )));
            }
        };
        Ok(Some(instruction))
    }

    fn fallback(&mut self, node: NodeId, name: &str) -> Result<Instruction, XsltError> {
        let mut body: Option<Vec<Instruction>> = None;
        for child in self.doc.children(node).to_vec() {
            if self.xslt_name(child) == Some("fallback") {
                let fallback = self.body(child)?;
                body.get_or_insert_with(Vec::new).extend(fallback);
            }
        }
        Ok(Instruction::Fallback {
            name: name.to_string(),
            body,
        })
    }

    fn choose(&mut self, node: NodeId) -> Result<Instruction, XsltError> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        for child in self.doc.children(node).to_vec() {
            match self.xslt_name(child) {
                Some("when") => {
                    if otherwise.is_some() {
                        return Err(XsltError::compile("xsl:when after xsl:otherwise"));
                    }
                    let test = self.required_xpath(child, "test")?;
                    branches.push((test, self.body(child)?));
                }
                Some("otherwise") => otherwise = Some(self.body(child)?),
                _ if self.is_blank(child) => {}
                _ => {
                    return Err(XsltError::compile(
                        "xsl:choose may only contain xsl:when and xsl:otherwise",
                    ));
                }
            }
        }
        if branches.is_empty() {
            return Err(XsltError::compile("xsl:choose needs at least one xsl:when"));
        }
        Ok(Instruction::Choose {
            branches,
            otherwise: otherwise.unwrap_or_default(),
        })
    }

    fn literal_element(&mut self, node: NodeId) -> Result<Instruction, XsltError> {
        let NodeKind::Element {
            name,
            attributes: attribute_ids,
            namespaces: declared,
        } = self.doc.kind(node).clone()
        else {
            return Err(XsltError::compile("expected an element"));
        };

        let mut namespaces: Vec<(Option<String>, String)> = declared
            .into_iter()
            .filter(|(_, uri)| uri != XSLT_NAMESPACE && !self.excluded.contains(uri))
            .collect();
        namespaces.push((name.prefix.clone(), name.namespace.clone().unwrap_or_default()));

        let mut attributes = Vec::new();
        for attribute in attribute_ids {
            let NodeKind::Attribute { name, value } = self.doc.kind(attribute) else {
                continue;
            };
            if name.namespace.as_deref() == Some(XSLT_NAMESPACE) {
                continue;
            }
            if let (Some(prefix), Some(uri)) = (&name.prefix, &name.namespace) {
                namespaces.push((Some(prefix.clone()), uri.clone()));
            }
            attributes.push((name.qualified(), self.avt(node, value)?));
        }

        Ok(Instruction::LiteralElement {
            name: name.qualified(),
            namespaces,
            attributes,
            body: self.body(node)?,
        })
    }
}

fn is_forwards_version(version: &str) -> bool {
    version.trim() != "1.0"
}

/// Default namespace in scope at `node`, if any.
fn default_namespace(doc: &Document, node: NodeId) -> Option<String> {
    let mut current = Some(node);
    while let Some(id) = current {
        if let NodeKind::Element { namespaces, .. } = doc.kind(id) {
            if let Some((_, uri)) = namespaces.iter().find(|(prefix, _)| prefix.is_none()) {
                return (!uri.is_empty()).then(|| uri.clone());
            }
        }
        current = doc.parent(id);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const XSL: &str = r#"xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0""#;

    fn sheet(body: &str) -> Result<Stylesheet, XsltError> {
        Stylesheet::compile(&format!("<xsl:stylesheet {XSL}>{body}</xsl:stylesheet>"))
    }

    #[test]
    fn compiles_rules_per_union_alternative() {
        let compiled = sheet(r#"<xsl:template match="a | b">x</xsl:template>"#).unwrap();
        assert_eq!(compiled.templates.len(), 1);
        assert_eq!(compiled.rules.len(), 2);
    }

    #[test]
    fn reads_output_settings() {
        let compiled = sheet(r#"<xsl:output method="text" indent="yes"/>"#).unwrap();
        assert_eq!(compiled.output().method, Some(OutputMethod::Text));
        assert!(compiled.output().indent);
    }

    #[test]
    fn rejects_unsupported_instructions() {
        let error = sheet(r#"<xsl:template match="/"><xsl:number/></xsl:template>"#).unwrap_err();
        assert!(matches!(error, XsltError::Compile { .. }));
        let error = sheet(r#"<xsl:include href="other.xsl"/>"#).unwrap_err();
        assert!(matches!(error, XsltError::Compile { .. }));
    }

    #[test]
    fn forwards_compatible_sheets_defer_unknown_instructions() {
        let forwards = |body: &str| {
            Stylesheet::compile(&format!(
                r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="2.0">{body}</xsl:stylesheet>"#
            ))
        };
        let compiled = forwards(
            r#"<xsl:function name="f"/><xsl:template match="/"><xsl:fallback-test/></xsl:template>"#,
        )
        .unwrap();
        assert!(matches!(
            &compiled.templates[0].body[0],
            Instruction::Fallback { name, body: None } if name == "fallback-test"
        ));
    }

    #[test]
    fn reports_bad_xpath_with_context() {
        let error = sheet(r#"<xsl:template match="/"><xsl:value-of select="/form/"/></xsl:template>"#)
            .unwrap_err();
        let XsltError::XPath { context, .. } = error else {
            panic!("expected XPath error, got {error:?}");
        };
        assert_eq!(context, "select attribute of <xsl:value-of>");
    }

    #[test]
    fn rejects_malformed_stylesheet_xml() {
        assert!(matches!(
            Stylesheet::compile("<xsl:stylesheet"),
            Err(XsltError::StylesheetXml { .. })
        ));
        assert!(matches!(
            Stylesheet::compile("<plain/>"),
            Err(XsltError::Compile { .. })
        ));
    }

    #[test]
    fn parses_attribute_value_templates() {
        let compiled = sheet(
            r#"<xsl:template match="/"><out a="x{{1}}-{/form/@id}"/></xsl:template>"#,
        )
        .unwrap();
        let Instruction::LiteralElement { attributes, .. } = &compiled.templates[0].body[0] else {
            panic!("expected literal element");
        };
        let parts = &attributes[0].1.parts;
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], AvtPart::Literal(text) if text == "x{1}-"));
        assert!(matches!(&parts[1], AvtPart::Expr(_)));
    }
}
