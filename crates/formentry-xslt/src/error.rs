use thiserror::Error;

/// Errors raised while parsing an XML document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    #[error("{message}")]
    Syntax { message: String },

    #[error("element <{name}> is not closed")]
    UnclosedElement { name: String },

    #[error("document has no root element")]
    MissingRoot,

    #[error("document has more than one root element (found <{name}>)")]
    MultipleRoots { name: String },

    #[error("text is not allowed outside the root element")]
    TextOutsideRoot,

    #[error("namespace prefix {prefix:?} is not declared")]
    UndeclaredPrefix { prefix: String },

    #[error("elements are nested deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("invalid UTF-8 in document: {message}")]
    Encoding { message: String },
}

/// Errors raised while compiling or evaluating an XPath expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XPathError {
    #[error("syntax error in {expr:?}: {message}")]
    Syntax { expr: String, message: String },

    #[error("unknown function {name}()")]
    UnknownFunction { name: String },

    #[error("function {name}() expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: &'static str,
        actual: usize,
    },

    #[error("namespace prefix {prefix:?} is not bound")]
    UnboundPrefix { prefix: String },

    #[error("variable ${name} is not defined")]
    UnboundVariable { name: String },

    #[error("{message}")]
    Type { message: String },
}

/// Errors raised while compiling or running a stylesheet.
#[derive(Debug, Error)]
pub enum XsltError {
    #[error("stylesheet is not well-formed XML: {source}")]
    StylesheetXml {
        #[source]
        source: XmlError,
    },

    #[error("input is not well-formed XML: {source}")]
    InputXml {
        #[source]
        source: XmlError,
    },

    #[error("invalid stylesheet: {message}")]
    Compile { message: String },

    #[error("invalid XPath in {context}: {source}")]
    XPath {
        context: String,
        #[source]
        source: XPathError,
    },

    #[error("evaluation failed: {source}")]
    Evaluation {
        #[source]
        source: XPathError,
    },

    #[error("{message}")]
    Runtime { message: String },

    #[error("transform terminated by xsl:message: {message}")]
    Terminated { message: String },

    #[error("failed to serialize result: {message}")]
    Output { message: String },
}

impl XsltError {
    pub(crate) fn compile(message: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
        }
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }
}

impl From<XPathError> for XsltError {
    fn from(source: XPathError) -> Self {
        Self::Evaluation { source }
    }
}
