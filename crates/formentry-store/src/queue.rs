use std::path::PathBuf;

use chrono::Utc;
use formentry_core::{QueueStore, StoreError};
use formentry_model::{QueueEntry, QueueEntryId};
use tracing::debug;

use crate::records::RecordDir;

/// Queue kept as one JSON file per entry.
///
/// [`pop_oldest`](QueueStore::pop_oldest) only reads; an entry disappears
/// when it is deleted after its outcome has been written, so a crash in
/// between leaves it queued.
#[derive(Debug)]
pub struct DirectoryQueue {
    records: RecordDir,
}

impl DirectoryQueue {
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        let records = RecordDir::open(dir)?;
        debug!(path = %records.path().display(), "Opened queue");
        Ok(Self { records })
    }

    /// Every queued entry, oldest first.
    pub fn list(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.records.read_all()
    }
}

impl QueueStore for DirectoryQueue {
    fn pop_oldest(&self) -> Result<Option<QueueEntry>, StoreError> {
        // An entry can vanish between listing and reading when another
        // process finishes it; move on to the next one.
        for id in self.records.ids()? {
            if let Some(entry) = self.records.read(id)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn delete(&self, id: QueueEntryId) -> Result<(), StoreError> {
        if !self.records.remove(id.get())? {
            debug!(queue_entry_id = %id, "Queue entry already removed");
        }
        Ok(())
    }

    fn enqueue(&self, payload: &str) -> Result<QueueEntry, StoreError> {
        let entry = self
            .records
            .insert(|id| QueueEntry::new(QueueEntryId::new(id), payload, Utc::now()))?;
        debug!(queue_entry_id = %entry.id, bytes = payload.len(), "Enqueued form entry");
        Ok(entry)
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.records.len()
    }
}
