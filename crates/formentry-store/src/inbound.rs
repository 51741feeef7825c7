//! Inbound HL7 queue on disk.

use std::path::PathBuf;

use formentry_core::{MessageSink, StoreError};
use formentry_model::{InboundMessage, SubmitOutcome};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::records::{Inserted, RecordDir};

/// One stored inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    #[serde(flatten)]
    pub message: InboundMessage,
}

/// Writes each `(source, key)` once; later submissions report
/// [`SubmitOutcome::Duplicate`].
///
/// The check is made on disk under the directory's allocation lock, so it
/// holds across sinks opened by different processes.
#[derive(Debug)]
pub struct DirectoryMessageSink {
    records: RecordDir,
}

impl DirectoryMessageSink {
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        Ok(Self {
            records: RecordDir::open(dir)?,
        })
    }

    pub fn list(&self) -> Result<Vec<StoredMessage>, StoreError> {
        self.records.read_all()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.records.len()
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// File name recording a `(source, key)` pair.
fn key_file_name(message: &InboundMessage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.source.name.as_bytes());
    hasher.update([0]);
    hasher.update(message.source_key.as_bytes());
    hex::encode(hasher.finalize())
}

impl MessageSink for DirectoryMessageSink {
    fn submit(&self, message: &InboundMessage) -> Result<SubmitOutcome, StoreError> {
        let inserted = self
            .records
            .insert_once(&key_file_name(message), |id| StoredMessage {
                id,
                message: message.clone(),
            })?;
        match inserted {
            Inserted::New(stored) => {
                info!(
                    inbound_id = stored.id,
                    source = %message.source.name,
                    "Stored inbound message"
                );
                Ok(SubmitOutcome::Accepted)
            }
            Inserted::Existing(stored) => {
                debug!(
                    inbound_id = stored.id,
                    source = %message.source.name,
                    key = %message.source_key,
                    "Inbound message already stored"
                );
                Ok(SubmitOutcome::Duplicate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use formentry_model::Hl7Source;
    use tempfile::tempdir;

    fn message(source: &str, key: &str) -> InboundMessage {
        InboundMessage {
            source: Hl7Source::new(source),
            source_key: key.to_string(),
            payload: "MSH|".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_sinks_on_one_directory_share_duplicates() {
        let dir = tempdir().unwrap();
        let first = DirectoryMessageSink::open(dir.path().to_path_buf()).unwrap();
        let second = DirectoryMessageSink::open(dir.path().to_path_buf()).unwrap();

        assert_eq!(
            first.submit(&message("local", "k")).unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            second.submit(&message("local", "k")).unwrap(),
            SubmitOutcome::Duplicate
        );
        assert_eq!(
            second.submit(&message("remote", "k")).unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(first.len().unwrap(), 2);
    }

    #[test]
    fn test_key_file_names_separate_source_from_key() {
        assert_ne!(
            key_file_name(&message("ab", "c")),
            key_file_name(&message("a", "bc"))
        );
        assert_eq!(key_file_name(&message("a", "b")).len(), 64);
    }
}
