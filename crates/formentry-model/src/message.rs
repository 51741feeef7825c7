//! Inbound HL7 messages handed to the downstream sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical channel an inbound message arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hl7Source {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Hl7Source {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }
}

/// A transformed payload keyed for duplicate detection by `(source, source_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub source: Hl7Source,
    pub source_key: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

/// Result of handing a message to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The message was stored for downstream processing.
    Accepted,
    /// A message with the same source and key was already stored; nothing changed.
    Duplicate,
}
