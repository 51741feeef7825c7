//! Hands transformed messages to the inbound sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use formentry_model::{Hl7Source, InboundMessage, QueueEntryId, SubmitOutcome};
use tracing::debug;

use crate::error::StoreError;
use crate::ports::MessageSink;

/// Dedup key for a submission: the embedded source key when present and
/// non-blank, otherwise the queue entry id in decimal.
pub fn dedup_key(source_key: Option<&str>, queue_entry_id: QueueEntryId) -> String {
    source_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map_or_else(|| queue_entry_id.to_string(), str::to_string)
}

pub struct Router {
    sink: Arc<dyn MessageSink>,
}

impl Router {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// Submits one message keyed by `(source, key)`.
    pub fn route(
        &self,
        source: &Hl7Source,
        key: &str,
        payload: String,
        received_at: DateTime<Utc>,
    ) -> Result<SubmitOutcome, StoreError> {
        let message = InboundMessage {
            source: source.clone(),
            source_key: key.to_string(),
            payload,
            received_at,
        };
        let outcome = self.sink.submit(&message)?;
        debug!(source = %source.name, key, ?outcome, "Submitted inbound message");
        Ok(outcome)
    }
}
