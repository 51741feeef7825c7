//! Arena-backed XML tree.
//!
//! Nodes are stored in document order: an element is followed by its
//! attributes, then by its descendants. Comparing two [`NodeId`]s therefore
//! compares document order, which the XPath evaluator relies on.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

use crate::error::XmlError;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Deepest element nesting [`Document::parse`] accepts.
pub const MAX_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A namespace-resolved name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
            namespace: None,
        }
    }

    /// Name as written in the source (`prefix:local` or `local`).
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local),
            None => self.local.clone(),
        }
    }

    pub fn is(&self, namespace: Option<&str>, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == namespace
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element {
        name: QName,
        attributes: Vec<NodeId>,
        /// Namespace declarations made on this element (`None` is the default namespace).
        namespaces: Vec<(Option<String>, String)>,
    },
    Attribute {
        name: QName,
        value: String,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    /// Parses a complete XML document.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let mut builder = Builder::new();
        let mut reader = Reader::from_str(xml);

        loop {
            let event = reader.read_event().map_err(|error| XmlError::Syntax {
                message: format!("{error} (near byte {})", reader.buffer_position()),
            })?;
            match event {
                Event::Start(start) => builder.start_element(&start, false)?,
                Event::Empty(start) => builder.start_element(&start, true)?,
                Event::End(_) => builder.end_element(),
                Event::Text(text) => {
                    let text = decode(&text)?.replace("\r\n", "\n");
                    builder.text(&text)?;
                }
                Event::CData(data) => builder.text(decode(&data)?)?,
                Event::GeneralRef(reference) => {
                    let name = decode(&reference)?;
                    let resolved = resolve_reference(name)?;
                    builder.text(&resolved)?;
                }
                Event::Comment(comment) => builder.comment(decode(&comment)?),
                Event::PI(instruction) => builder.processing_instruction(decode(&instruction)?),
                Event::Eof => break,
                _ => {}
            }
        }

        builder.finish()
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The single top-level element.
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|id| self.is_element(*id))
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn attributes(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Element { .. })
    }

    pub fn is_attribute(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Attribute { .. })
    }

    /// Element or attribute name.
    pub fn name(&self, id: NodeId) -> Option<&QName> {
        match self.kind(id) {
            NodeKind::Element { name, .. } | NodeKind::Attribute { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Value of an attribute in no namespace.
    pub fn attribute(&self, element: NodeId, local: &str) -> Option<&str> {
        self.attributes(element)
            .iter()
            .find_map(|id| match self.kind(*id) {
                NodeKind::Attribute { name, value } if name.is(None, local) => {
                    Some(value.as_str())
                }
                _ => None,
            })
    }

    /// XPath string-value of a node.
    pub fn string_value(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Root | NodeKind::Element { .. } => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
            NodeKind::Attribute { value, .. } => value.clone(),
            NodeKind::Text(text) | NodeKind::Comment(text) => text.clone(),
            NodeKind::ProcessingInstruction { data, .. } => data.clone(),
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for child in self.children(id) {
            match self.kind(*child) {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Element { .. } => self.collect_text(*child, out),
                _ => {}
            }
        }
    }

    /// Prefixed namespace bindings in scope at `id`, innermost declaration winning.
    pub fn in_scope_namespaces(&self, id: NodeId) -> BTreeMap<String, String> {
        let mut bindings = BTreeMap::new();
        bindings.insert("xml".to_string(), XML_NAMESPACE.to_string());
        let mut current = Some(id);
        while let Some(node) = current {
            if let NodeKind::Element { namespaces, .. } = self.kind(node) {
                for (prefix, uri) in namespaces {
                    if let Some(prefix) = prefix {
                        bindings
                            .entry(prefix.clone())
                            .or_insert_with(|| uri.clone());
                    }
                }
            }
            current = self.parent(node);
        }
        bindings
    }

    /// Removes whitespace-only text children of every element for which `strip` returns true.
    pub fn strip_whitespace<F>(&mut self, strip: F)
    where
        F: Fn(&QName) -> bool,
    {
        for index in 0..self.nodes.len() {
            let NodeKind::Element { name, .. } = &self.nodes[index].kind else {
                continue;
            };
            if !strip(name) {
                continue;
            }
            let children = std::mem::take(&mut self.nodes[index].children);
            let kept = children
                .into_iter()
                .filter(|child| match &self.nodes[child.0].kind {
                    NodeKind::Text(text) => !is_xml_whitespace(text),
                    _ => true,
                })
                .collect();
            self.nodes[index].children = kept;
        }
    }

    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
        });
        id
    }
}

pub(crate) fn is_xml_whitespace(text: &str) -> bool {
    text.chars()
        .all(|ch| matches!(ch, ' ' | '\t' | '\n' | '\r'))
}

fn decode(bytes: &[u8]) -> Result<&str, XmlError> {
    std::str::from_utf8(bytes).map_err(|error| XmlError::Encoding {
        message: error.to_string(),
    })
}

fn resolve_reference(name: &str) -> Result<String, XmlError> {
    unescape(&format!("&{name};"))
        .map(std::borrow::Cow::into_owned)
        .map_err(|error| XmlError::Syntax {
            message: format!("cannot resolve reference &{name};: {error}"),
        })
}

struct Builder {
    doc: Document,
    open: Vec<NodeId>,
    scopes: Vec<Vec<(Option<String>, String)>>,
    has_root: bool,
}

impl Builder {
    fn new() -> Self {
        let mut doc = Document { nodes: Vec::new() };
        let root = doc.push(NodeKind::Root, None);
        Self {
            doc,
            open: vec![root],
            scopes: Vec::new(),
            has_root: false,
        }
    }

    fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or(NodeId(0))
    }

    fn append(&mut self, kind: NodeKind) -> NodeId {
        let parent = self.current();
        let id = self.doc.push(kind, Some(parent));
        self.doc.nodes[parent.0].children.push(id);
        id
    }

    fn start_element(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<(), XmlError> {
        let raw_name = decode(start.name().as_ref())?.to_string();
        // `open` holds the root node, so its length is the new element's depth.
        if self.open.len() > MAX_DEPTH {
            return Err(XmlError::TooDeep { limit: MAX_DEPTH });
        }
        if self.open.len() == 1 {
            if self.has_root {
                return Err(XmlError::MultipleRoots { name: raw_name });
            }
            self.has_root = true;
        }

        let mut declared = Vec::new();
        let mut raw_attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|error| XmlError::Syntax {
                message: format!("invalid attribute on <{raw_name}>: {error}"),
            })?;
            let key = decode(attribute.key.as_ref())?.to_string();
            let raw_value = decode(&attribute.value)?.replace(['\t', '\n', '\r'], " ");
            let value = unescape(&raw_value)
                .map_err(|error| XmlError::Syntax {
                    message: format!("invalid value for attribute {key}: {error}"),
                })?
                .into_owned();
            if key == "xmlns" {
                declared.push((None, value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                declared.push((Some(prefix.to_string()), value));
            } else {
                raw_attributes.push((key, value));
            }
        }

        self.scopes.push(declared.clone());
        let name = self.resolve(&raw_name, true)?;
        let element = self.append(NodeKind::Element {
            name,
            attributes: Vec::new(),
            namespaces: declared,
        });

        let mut attribute_ids = Vec::with_capacity(raw_attributes.len());
        for (key, value) in raw_attributes {
            let name = self.resolve(&key, false)?;
            let id = self
                .doc
                .push(NodeKind::Attribute { name, value }, Some(element));
            attribute_ids.push(id);
        }
        if let NodeKind::Element { attributes, .. } = &mut self.doc.nodes[element.0].kind {
            *attributes = attribute_ids;
        }

        if empty {
            self.scopes.pop();
        } else {
            self.open.push(element);
        }
        Ok(())
    }

    fn end_element(&mut self) {
        if self.open.len() > 1 {
            self.open.pop();
            self.scopes.pop();
        }
    }

    fn text(&mut self, text: &str) -> Result<(), XmlError> {
        if text.is_empty() {
            return Ok(());
        }
        if self.open.len() == 1 {
            if is_xml_whitespace(text) {
                return Ok(());
            }
            return Err(XmlError::TextOutsideRoot);
        }
        let parent = self.current();
        if let Some(last) = self.doc.nodes[parent.0].children.last().copied() {
            if let NodeKind::Text(existing) = &mut self.doc.nodes[last.0].kind {
                existing.push_str(text);
                return Ok(());
            }
        }
        self.append(NodeKind::Text(text.to_string()));
        Ok(())
    }

    fn comment(&mut self, text: &str) {
        self.append(NodeKind::Comment(text.to_string()));
    }

    fn processing_instruction(&mut self, raw: &str) {
        let raw = raw.trim();
        let (target, data) = match raw.find(char::is_whitespace) {
            Some(split) => (&raw[..split], raw[split..].trim_start()),
            None => (raw, ""),
        };
        self.append(NodeKind::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
    }

    fn resolve(&self, raw: &str, is_element: bool) -> Result<QName, XmlError> {
        let (prefix, local) = match raw.split_once(':') {
            Some((prefix, local)) => (Some(prefix), local),
            None => (None, raw),
        };
        let namespace = match prefix {
            Some("xml") => Some(XML_NAMESPACE.to_string()),
            Some(prefix) => Some(self.lookup(Some(prefix)).ok_or_else(|| {
                XmlError::UndeclaredPrefix {
                    prefix: prefix.to_string(),
                }
            })?),
            None if is_element => self.lookup(None).filter(|uri| !uri.is_empty()),
            None => None,
        };
        Ok(QName {
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
            namespace,
        })
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<String> {
        self.scopes.iter().rev().find_map(|scope| {
            scope
                .iter()
                .find(|(declared, _)| declared.as_deref() == prefix)
                .map(|(_, uri)| uri.clone())
        })
    }

    fn finish(self) -> Result<Document, XmlError> {
        if self.open.len() > 1 {
            let name = self
                .doc
                .name(self.current())
                .map(QName::qualified)
                .unwrap_or_default();
            return Err(XmlError::UnclosedElement { name });
        }
        if !self.has_root {
            return Err(XmlError::MissingRoot);
        }
        Ok(self.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_elements_attributes_and_text() {
        let doc = Document::parse(r#"<form id="12"><header><uid>abc</uid></header></form>"#)
            .unwrap();
        let form = doc.document_element().unwrap();
        assert_eq!(doc.name(form).unwrap().local, "form");
        assert_eq!(doc.attribute(form, "id"), Some("12"));
        assert_eq!(doc.string_value(form), "abc");
    }

    #[test]
    fn resolves_entities_and_char_refs() {
        let doc = Document::parse("<a t=\"x&amp;y\">1 &lt; 2&#13;</a>").unwrap();
        let a = doc.document_element().unwrap();
        assert_eq!(doc.attribute(a, "t"), Some("x&y"));
        assert_eq!(doc.string_value(a), "1 < 2\r");
        assert_eq!(doc.children(a).len(), 1);
    }

    #[test]
    fn resolves_namespaces() {
        let doc = Document::parse(
            r#"<f:form xmlns:f="urn:form" xmlns="urn:default"><item f:code="1"/></f:form>"#,
        )
        .unwrap();
        let form = doc.document_element().unwrap();
        assert!(doc.name(form).unwrap().is(Some("urn:form"), "form"));
        let item = doc.children(form)[0];
        assert!(doc.name(item).unwrap().is(Some("urn:default"), "item"));
        let code = doc.attributes(item)[0];
        assert!(doc.name(code).unwrap().is(Some("urn:form"), "code"));
    }

    #[test]
    fn rejects_undeclared_prefix() {
        let error = Document::parse("<x:form/>").unwrap_err();
        assert_eq!(
            error,
            XmlError::UndeclaredPrefix {
                prefix: "x".to_string()
            }
        );
    }

    #[test]
    fn rejects_unclosed_and_empty_documents() {
        assert!(Document::parse("<form><a></a>").is_err());
        assert_eq!(Document::parse("   ").unwrap_err(), XmlError::MissingRoot);
        assert!(matches!(
            Document::parse("<a/><b/>").unwrap_err(),
            XmlError::MultipleRoots { .. }
        ));
    }

    #[test]
    fn rejects_nesting_past_the_depth_limit() {
        let nested = |depth: usize| format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        assert!(Document::parse(&nested(MAX_DEPTH)).is_ok());
        assert_eq!(
            Document::parse(&nested(MAX_DEPTH + 1)).unwrap_err(),
            XmlError::TooDeep { limit: MAX_DEPTH }
        );
        assert!(Document::parse(&nested(200_000)).is_err());
    }

    #[test]
    fn document_order_follows_ids() {
        let doc = Document::parse(r#"<a x="1"><b/>text</a>"#).unwrap();
        let a = doc.document_element().unwrap();
        let x = doc.attributes(a)[0];
        let b = doc.children(a)[0];
        assert!(a < x && x < b);
    }

    #[test]
    fn strips_whitespace_only_text() {
        let mut doc = Document::parse("<a>\n  <b> x </b>\n</a>").unwrap();
        doc.strip_whitespace(|_| true);
        let a = doc.document_element().unwrap();
        assert_eq!(doc.children(a).len(), 1);
        assert_eq!(doc.string_value(a), " x ");
    }
}
