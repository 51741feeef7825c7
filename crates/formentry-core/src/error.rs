//! Error types for queue processing.
//!
//! Terminal failures of a single entry are not errors here: they become
//! [`formentry_model::Failure`] values and end up in the error bin.
//! [`ProcessError`] covers only the conditions that must leave an entry
//! queued and stop the drain.

use std::path::PathBuf;

use formentry_model::QueueEntryId;
use thiserror::Error;

/// Failure reported by a storage or delivery collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File system operation failed.
    #[error("failed to {operation} {}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be encoded or decoded.
    #[error("failed to {operation} record {}", path.display())]
    Serialization {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A stored record is present but unusable.
    #[error("corrupt record {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The collaborator refused or could not take the request.
    #[error("{message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// A condition that stops the drain and leaves the current entry queued.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The inbound message sink did not take the transformed message.
    #[error("inbound sink rejected queue entry {queue_entry_id}")]
    SinkFailure {
        queue_entry_id: QueueEntryId,
        #[source]
        source: StoreError,
    },

    /// The configured HL7 source is not registered.
    #[error("HL7 source {name:?} is not configured")]
    SourceUnavailable { name: String },

    /// A queue, archive, error-bin or configuration call failed.
    #[error("failed to {operation}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ProcessError {
    pub(crate) fn store(operation: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { operation, source }
    }

    /// Short label for logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SinkFailure { .. } => "sink_failure",
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::Store { .. } => "store",
        }
    }
}

/// Error raised by a [`TransformEngine`](crate::TransformEngine).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransformError {
    pub message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<formentry_xslt::XsltError> for TransformError {
    fn from(error: formentry_xslt::XsltError) -> Self {
        Self::new(error.to_string())
    }
}

/// A [`ProcessorLoopBuilder`](crate::ProcessorLoopBuilder) was finished
/// without one of its required collaborators.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("processor loop is missing its {collaborator} collaborator")]
pub struct BuildError {
    pub collaborator: &'static str,
}
