//! XSLT application.

use crate::error::TransformError;

/// Applies a form's stylesheet to a raw payload.
pub trait TransformEngine: Send + Sync {
    fn apply(&self, xslt: &str, input: &str) -> Result<String, TransformError>;
}

/// Engine backed by `formentry-xslt`. Compiles the stylesheet on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct XsltEngine;

impl TransformEngine for XsltEngine {
    fn apply(&self, xslt: &str, input: &str) -> Result<String, TransformError> {
        Ok(formentry_xslt::transform(xslt, input)?)
    }
}
