//! Result tree and its serialization.

use quick_xml::Writer;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::XsltError;

/// Node of the result tree.
#[derive(Debug, Clone, PartialEq)]
pub enum OutNode {
    Element {
        /// Qualified name as it will be written.
        name: String,
        /// Namespace declarations carried by this element.
        namespaces: Vec<(Option<String>, String)>,
        attributes: Vec<(String, String)>,
        children: Vec<OutNode>,
    },
    Text {
        text: String,
        /// False when produced with `disable-output-escaping="yes"`.
        escape: bool,
    },
    Comment(String),
}

impl OutNode {
    pub(crate) fn collect_text(&self, out: &mut String) {
        match self {
            Self::Element { children, .. } => {
                for child in children {
                    child.collect_text(out);
                }
            }
            Self::Text { text, .. } => out.push_str(text),
            Self::Comment(_) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMethod {
    #[default]
    Xml,
    Html,
    Text,
}

impl OutputMethod {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "xml" => Some(Self::Xml),
            "html" => Some(Self::Html),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Settings from `xsl:output`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSettings {
    /// `None` when the stylesheet did not choose a method.
    pub method: Option<OutputMethod>,
    pub indent: bool,
    pub omit_xml_declaration: bool,
    pub encoding: Option<String>,
}

impl OutputSettings {
    /// The method in effect for `result`, applying the html root-element default.
    pub fn effective_method(&self, result: &[OutNode]) -> OutputMethod {
        if let Some(method) = self.method {
            return method;
        }
        let first_element = result.iter().find_map(|node| match node {
            OutNode::Element { name, .. } => Some(name.as_str()),
            OutNode::Text { text, .. } if !crate::dom::is_xml_whitespace(text) => Some(""),
            _ => None,
        });
        match first_element {
            Some(name) if name.eq_ignore_ascii_case("html") => OutputMethod::Html,
            _ => OutputMethod::Xml,
        }
    }
}

const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

pub(crate) fn serialize(result: &[OutNode], settings: &OutputSettings) -> Result<String, XsltError> {
    match settings.effective_method(result) {
        OutputMethod::Text => {
            let mut out = String::new();
            for node in result {
                node.collect_text(&mut out);
            }
            Ok(out)
        }
        method => serialize_markup(result, settings, method),
    }
}

fn serialize_markup(
    result: &[OutNode],
    settings: &OutputSettings,
    method: OutputMethod,
) -> Result<String, XsltError> {
    let mut writer = if settings.indent {
        Writer::new_with_indent(Vec::new(), b' ', 2)
    } else {
        Writer::new(Vec::new())
    };

    if method == OutputMethod::Xml && !settings.omit_xml_declaration {
        let encoding = settings.encoding.as_deref().unwrap_or("UTF-8");
        write(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some(encoding), None)),
        )?;
    }

    let mut scope = Vec::new();
    for node in result {
        write_node(&mut writer, node, method, &mut scope)?;
    }

    String::from_utf8(writer.into_inner()).map_err(|error| XsltError::Output {
        message: error.to_string(),
    })
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), XsltError> {
    writer.write_event(event).map_err(|error| XsltError::Output {
        message: error.to_string(),
    })
}

/// Writes one node; `scope` tracks namespace declarations already emitted by ancestors.
fn write_node(
    writer: &mut Writer<Vec<u8>>,
    node: &OutNode,
    method: OutputMethod,
    scope: &mut Vec<(Option<String>, String)>,
) -> Result<(), XsltError> {
    match node {
        OutNode::Text { text, escape } => {
            let event = if *escape {
                BytesText::from_escaped(partial_escape(text.as_str()))
            } else {
                BytesText::from_escaped(text.as_str())
            };
            write(writer, Event::Text(event))
        }
        OutNode::Comment(text) => {
            let text = comment_text(text);
            write(writer, Event::Comment(BytesText::from_escaped(text.as_str())))
        }
        OutNode::Element {
            name,
            namespaces,
            attributes,
            children,
        } => {
            let mut start = BytesStart::new(name.as_str());
            let scope_len = scope.len();
            for (prefix, uri) in namespaces {
                let visible = scope
                    .iter()
                    .rev()
                    .find(|(declared, _)| declared == prefix)
                    .map(|(_, uri)| uri.as_str());
                let redundant = match visible {
                    Some(visible) => visible == uri,
                    None => prefix.is_none() && uri.is_empty(),
                };
                if redundant {
                    continue;
                }
                let key = match prefix {
                    Some(prefix) => format!("xmlns:{prefix}"),
                    None => "xmlns".to_string(),
                };
                start.push_attribute((key.as_str(), uri.as_str()));
                scope.push((prefix.clone(), uri.clone()));
            }
            for (key, value) in attributes {
                start.push_attribute((key.as_str(), value.as_str()));
            }

            let is_void = method == OutputMethod::Html
                && HTML_VOID_ELEMENTS
                    .iter()
                    .any(|void| name.eq_ignore_ascii_case(void));
            if is_void {
                write(writer, Event::Start(start))?;
            } else if children.is_empty() && method == OutputMethod::Xml {
                write(writer, Event::Empty(start))?;
            } else {
                write(writer, Event::Start(start))?;
                for child in children {
                    write_node(writer, child, method, scope)?;
                }
                write(writer, Event::End(BytesEnd::new(name.as_str())))?;
            }
            scope.truncate(scope_len);
            Ok(())
        }
    }
}

/// Comment content made well-formed: no `--` and no trailing `-`.
fn comment_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_dash = false;
    for ch in text.chars() {
        if ch == '-' && previous_dash {
            out.push(' ');
        }
        previous_dash = ch == '-';
        out.push(ch);
    }
    if previous_dash {
        out.push(' ');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: &str, children: Vec<OutNode>) -> OutNode {
        OutNode::Element {
            name: name.to_string(),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children,
        }
    }

    fn text(value: &str) -> OutNode {
        OutNode::Text {
            text: value.to_string(),
            escape: true,
        }
    }

    #[test]
    fn text_method_concatenates_text() {
        let settings = OutputSettings {
            method: Some(OutputMethod::Text),
            ..OutputSettings::default()
        };
        let result = vec![element("a", vec![text("x<"), text("y")]), text("&z")];
        assert_eq!(serialize(&result, &settings).unwrap(), "x<y&z");
    }

    #[test]
    fn xml_method_escapes_and_declares() {
        let result = vec![OutNode::Element {
            name: "obs".to_string(),
            namespaces: vec![(None, "urn:hl7".to_string())],
            attributes: vec![("code".to_string(), "a\"b".to_string())],
            children: vec![text("1 < 2"), element("empty", Vec::new())],
        }];
        let out = serialize(&result, &OutputSettings::default()).unwrap();
        assert_eq!(
            out,
            r#"<?xml version="1.0" encoding="UTF-8"?><obs xmlns="urn:hl7" code="a&quot;b">1 &lt; 2<empty/></obs>"#
        );
    }

    #[test]
    fn html_root_selects_html_method() {
        let result = vec![element("html", vec![element("br", Vec::new())])];
        let settings = OutputSettings::default();
        assert_eq!(settings.effective_method(&result), OutputMethod::Html);
        assert_eq!(serialize(&result, &settings).unwrap(), "<html><br></html>");
    }

    #[test]
    fn unescaped_text_is_written_verbatim() {
        let settings = OutputSettings {
            omit_xml_declaration: true,
            ..OutputSettings::default()
        };
        let result = vec![element(
            "a",
            vec![OutNode::Text {
                text: "<b/>".to_string(),
                escape: false,
            }],
        )];
        assert_eq!(serialize(&result, &settings).unwrap(), "<a><b/></a>");
    }

    #[test]
    fn comments_never_contain_double_dashes() {
        let settings = OutputSettings {
            omit_xml_declaration: true,
            ..OutputSettings::default()
        };
        let result = vec![element(
            "a",
            vec![
                OutNode::Comment("c--d".to_string()),
                OutNode::Comment("end-".to_string()),
                OutNode::Comment("---".to_string()),
            ],
        )];
        assert_eq!(
            serialize(&result, &settings).unwrap(),
            "<a><!--c- -d--><!--end- --><!--- - - --></a>"
        );
    }
}
