//! Data model for the form entry queue processor.
//!
//! Entries move through a small state machine: a [`QueueEntry`] is either
//! archived (an [`ArchiveEntry`] is written) or sent to the error bin (an
//! [`ErrorEntry`] is written). Nothing here performs I/O.

pub mod entry;
pub mod error;
pub mod form;
pub mod ids;
pub mod message;
pub mod state;

pub use entry::{ArchiveEntry, ErrorEntry, NewArchiveEntry, NewErrorEntry, QueueEntry};
pub use error::{Failure, FailureKind, ModelError};
pub use form::FormDescriptor;
pub use ids::{ArchiveEntryId, ErrorEntryId, FormId, QueueEntryId};
pub use message::{Hl7Source, InboundMessage, SubmitOutcome};
pub use state::{Disposition, EntryState};
