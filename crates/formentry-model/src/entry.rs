//! Queue, archive and error-bin records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArchiveEntryId, ErrorEntryId, Failure, QueueEntryId};

/// A raw XML form submission waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(id: QueueEntryId, payload: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            payload: payload.into(),
            created_at,
        }
    }
}

/// A successfully processed entry, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: ArchiveEntryId,
    pub queue_entry_id: QueueEntryId,
    pub payload: String,
    pub archived_at: DateTime<Utc>,
}

/// An archive record before the sink assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArchiveEntry {
    pub queue_entry_id: QueueEntryId,
    pub payload: String,
    pub archived_at: DateTime<Utc>,
}

impl NewArchiveEntry {
    pub fn from_queue_entry(entry: &QueueEntry, archived_at: DateTime<Utc>) -> Self {
        Self {
            queue_entry_id: entry.id,
            payload: entry.payload.clone(),
            archived_at,
        }
    }

    pub fn with_id(self, id: ArchiveEntryId) -> ArchiveEntry {
        ArchiveEntry {
            id,
            queue_entry_id: self.queue_entry_id,
            payload: self.payload,
            archived_at: self.archived_at,
        }
    }
}

/// A failed entry moved to the error bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: ErrorEntryId,
    pub queue_entry_id: QueueEntryId,
    pub payload: String,
    pub error_summary: String,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub creator: String,
}

/// An error record before the sink assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewErrorEntry {
    pub queue_entry_id: QueueEntryId,
    pub payload: String,
    pub error_summary: String,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub creator: String,
}

impl NewErrorEntry {
    pub fn from_failure(
        entry: &QueueEntry,
        failure: &Failure,
        creator: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            queue_entry_id: entry.id,
            payload: entry.payload.clone(),
            error_summary: failure.summary.clone(),
            error_detail: failure.detail.clone(),
            created_at,
            creator: creator.into(),
        }
    }

    pub fn with_id(self, id: ErrorEntryId) -> ErrorEntry {
        ErrorEntry {
            id,
            queue_entry_id: self.queue_entry_id,
            payload: self.payload,
            error_summary: self.error_summary,
            error_detail: self.error_detail,
            created_at: self.created_at,
            creator: self.creator,
        }
    }
}
