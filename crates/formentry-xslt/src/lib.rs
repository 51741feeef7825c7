//! XSLT 1.0 engine for form entry transforms.
//!
//! The crate has three layers:
//!
//! - [`dom`]: an arena-backed XML tree parsed with `quick-xml`
//! - [`xpath`]: an XPath 1.0 parser and evaluator over that tree
//! - [`Stylesheet`]: a compiled XSLT stylesheet and its executor
//!
//! # Example
//!
//! ```
//! let xslt = r#"<xsl:stylesheet version="1.0"
//!     xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
//!   <xsl:output method="text"/>
//!   <xsl:template match="/">MSH|<xsl:value-of select="/form/@id"/></xsl:template>
//! </xsl:stylesheet>"#;
//! let out = formentry_xslt::transform(xslt, r#"<form id="7"/>"#).unwrap();
//! assert_eq!(out, "MSH|7");
//! ```

pub mod dom;
mod error;
mod exec;
mod output;
mod pattern;
mod stylesheet;
pub mod xpath;

pub use dom::{Document, NodeId, NodeKind, QName};
pub use error::{XPathError, XmlError, XsltError};
pub use output::{OutNode, OutputMethod, OutputSettings};
pub use stylesheet::{Stylesheet, XSLT_NAMESPACE};
pub use xpath::{Context, NoVariables, Value, Variables, XPath};

/// Compiles `xslt` and applies it to `input` in one step.
///
/// Each call compiles a fresh stylesheet.
pub fn transform(xslt: &str, input: &str) -> Result<String, XsltError> {
    Stylesheet::compile(xslt)?.transform(input)
}
