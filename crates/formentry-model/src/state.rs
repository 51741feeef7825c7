use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ArchiveEntry, ErrorEntry, FailureKind, QueueEntryId, SubmitOutcome};

/// Lifecycle state of a queue entry. `Archived` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Queued,
    Archived,
    Errored,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Archived => "archived",
            Self::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// Terminal outcome of processing one queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Archived {
        archive: ArchiveEntry,
        source_key: String,
        submit: SubmitOutcome,
    },
    Errored {
        error: ErrorEntry,
        kind: FailureKind,
    },
}

impl Disposition {
    pub fn state(&self) -> EntryState {
        match self {
            Self::Archived { .. } => EntryState::Archived,
            Self::Errored { .. } => EntryState::Errored,
        }
    }

    pub fn queue_entry_id(&self) -> QueueEntryId {
        match self {
            Self::Archived { archive, .. } => archive.queue_entry_id,
            Self::Errored { error, .. } => error.queue_entry_id,
        }
    }
}
