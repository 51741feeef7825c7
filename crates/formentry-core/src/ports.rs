//! Collaborators the processor depends on.
//!
//! Every trait is object safe and `Send + Sync` so one set of collaborators
//! can be shared behind `Arc` by a [`ProcessorLoop`](crate::ProcessorLoop)
//! used from several threads.

use formentry_model::{
    ArchiveEntry, ErrorEntry, FormDescriptor, FormId, Hl7Source, InboundMessage, NewArchiveEntry,
    NewErrorEntry, QueueEntry, QueueEntryId, SubmitOutcome,
};

use crate::error::StoreError;

/// Durable FIFO of pending submissions.
pub trait QueueStore: Send + Sync {
    /// The entry with the lowest id, left in place.
    fn pop_oldest(&self) -> Result<Option<QueueEntry>, StoreError>;

    /// Removes an entry. Deleting an id that is no longer queued is not an error.
    fn delete(&self, id: QueueEntryId) -> Result<(), StoreError>;

    /// Appends a new submission.
    fn enqueue(&self, payload: &str) -> Result<QueueEntry, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Append-only store of successfully processed entries.
pub trait ArchiveSink: Send + Sync {
    /// Stores the entry. A second insert for the same queue entry id stores
    /// nothing and returns the entry already kept for it.
    fn insert(&self, entry: NewArchiveEntry) -> Result<ArchiveEntry, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;
}

/// Append-only error bin.
pub trait ErrorSink: Send + Sync {
    /// Stores the entry, at most once per queue entry id like
    /// [`ArchiveSink::insert`].
    fn insert(&self, entry: NewErrorEntry) -> Result<ErrorEntry, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    /// All error entries, oldest first.
    fn list(&self) -> Result<Vec<ErrorEntry>, StoreError>;
}

/// Held for the length of a drain; dropping it releases the lock.
pub type DrainLease = Box<dyn Send>;

/// Lock shared by every processor draining the same queue, including ones in
/// other processes.
pub trait DrainLock: Send + Sync {
    /// Takes the lock without waiting; `None` while another drain holds it.
    fn try_acquire(&self) -> Result<Option<DrainLease>, StoreError>;
}

/// Looks up form templates by the id embedded in a submission.
pub trait FormResolver: Send + Sync {
    fn by_id(&self, id: FormId) -> Result<Option<FormDescriptor>, StoreError>;
}

/// Downstream inbound HL7 queue.
///
/// A second submission with the same source and key must not create a second
/// message; it is reported as [`SubmitOutcome::Duplicate`].
pub trait MessageSink: Send + Sync {
    fn submit(&self, message: &InboundMessage) -> Result<SubmitOutcome, StoreError>;
}

/// Registered HL7 sources.
pub trait SourceRegistry: Send + Sync {
    fn by_name(&self, name: &str) -> Result<Option<Hl7Source>, StoreError>;
}

/// Global string properties.
pub trait ConfigStore: Send + Sync {
    fn get_string(&self, key: &str, default: &str) -> Result<String, StoreError>;
}
