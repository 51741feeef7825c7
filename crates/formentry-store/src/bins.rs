//! Append-only archive and error bin.
//!
//! Both keep at most one record per queue entry id, so a drain that dies
//! between writing an outcome and deleting the queue entry does not leave a
//! second record behind when the entry is retried.

use std::path::PathBuf;

use formentry_core::{ArchiveSink, ErrorSink, StoreError};
use formentry_model::{
    ArchiveEntry, ArchiveEntryId, ErrorEntry, ErrorEntryId, NewArchiveEntry, NewErrorEntry,
};
use tracing::debug;

use crate::records::{Inserted, RecordDir};

#[derive(Debug)]
pub struct DirectoryArchive {
    records: RecordDir,
}

impl DirectoryArchive {
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        Ok(Self {
            records: RecordDir::open(dir)?,
        })
    }
}

impl ArchiveSink for DirectoryArchive {
    fn insert(&self, entry: NewArchiveEntry) -> Result<ArchiveEntry, StoreError> {
        let key = entry.queue_entry_id.to_string();
        let inserted = self
            .records
            .insert_once(&key, |id| entry.with_id(ArchiveEntryId::new(id)))?;
        if let Inserted::Existing(existing) = &inserted {
            debug!(
                queue_entry_id = %existing.queue_entry_id,
                archive_id = %existing.id,
                "Queue entry already archived"
            );
        }
        Ok(inserted.into_record())
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.records.len()
    }
}

#[derive(Debug)]
pub struct DirectoryErrorBin {
    records: RecordDir,
}

impl DirectoryErrorBin {
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        Ok(Self {
            records: RecordDir::open(dir)?,
        })
    }
}

impl ErrorSink for DirectoryErrorBin {
    fn insert(&self, entry: NewErrorEntry) -> Result<ErrorEntry, StoreError> {
        let key = entry.queue_entry_id.to_string();
        let inserted = self
            .records
            .insert_once(&key, |id| entry.with_id(ErrorEntryId::new(id)))?;
        if let Inserted::Existing(existing) = &inserted {
            debug!(
                queue_entry_id = %existing.queue_entry_id,
                error_id = %existing.id,
                "Queue entry already in the error bin"
            );
        }
        Ok(inserted.into_record())
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.records.len()
    }

    fn list(&self) -> Result<Vec<ErrorEntry>, StoreError> {
        self.records.read_all()
    }
}
