use std::fmt;

use thiserror::Error;

use crate::FormId;

/// Summary recorded when the form identifier cannot be read from a payload.
pub const MALFORMED_PAYLOAD_SUMMARY: &str = "Error retrieving form ID from data";

/// Summary recorded when the transform fails to compile or evaluate.
pub const TRANSFORM_FAILURE_SUMMARY: &str = "Unable to transform to HL7";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid form id {value:?}: {reason}")]
    InvalidFormId { value: String, reason: String },
}

/// Category of a terminal processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// XML parse failure or missing form identifier.
    MalformedPayload,
    /// The form identifier has no matching form.
    UnknownForm,
    /// The XSLT failed to compile or evaluate.
    TransformFailure,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedPayload => "malformed_payload",
            Self::UnknownForm => "unknown_form",
            Self::TransformFailure => "transform_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal failure for one queue entry.
///
/// The summary and detail are what ends up in the error bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub summary: String,
    pub detail: Option<String>,
}

impl Failure {
    pub fn malformed_payload(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::MalformedPayload,
            summary: MALFORMED_PAYLOAD_SUMMARY.to_string(),
            detail: Some(detail.into()),
        }
    }

    pub fn unknown_form(form_id: FormId) -> Self {
        Self {
            kind: FailureKind::UnknownForm,
            summary: format!("form id {form_id} does not exist"),
            detail: None,
        }
    }

    pub fn transform_failure(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::TransformFailure,
            summary: TRANSFORM_FAILURE_SUMMARY.to_string(),
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.summary, detail),
            None => f.write_str(&self.summary),
        }
    }
}

impl std::error::Error for Failure {}
