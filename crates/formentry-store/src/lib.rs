//! Directory-backed collaborators for the form entry processor.
//!
//! A store root holds:
//!
//! - `queue/`, `archive/`, `error/`, `hl7_in/`: one JSON file per record
//! - `forms.toml`: the form manifest, see [`forms`]
//! - `drain.lock`: held while a processor drains the queue, see [`lock`]
//!
//! Configuration lives separately in `formentry.toml`, see [`config`].

pub mod bins;
pub mod config;
pub mod error;
pub mod forms;
pub mod inbound;
mod io;
pub mod lock;
pub mod queue;
mod records;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use formentry_core::{
    BuildError, CachingFormResolver, ProcessorLoop, ProcessorLoopBuilder, StoreError,
};

pub use bins::{DirectoryArchive, DirectoryErrorBin};
pub use config::{CONFIG_FILE, FormEntryConfig};
pub use error::ConfigError;
pub use forms::{DirectoryForms, FORMS_MANIFEST, FormManifest, FormRecord};
pub use inbound::{DirectoryMessageSink, StoredMessage};
pub use lock::{DRAIN_LOCK_FILE, DirectoryDrainLock};
pub use queue::DirectoryQueue;

/// All directory-backed collaborators rooted at one directory.
pub struct LocalStore {
    root: PathBuf,
    pub queue: Arc<DirectoryQueue>,
    pub archive: Arc<DirectoryArchive>,
    pub errors: Arc<DirectoryErrorBin>,
    pub inbound: Arc<DirectoryMessageSink>,
    pub forms: Arc<DirectoryForms>,
    pub drain_lock: Arc<DirectoryDrainLock>,
}

impl LocalStore {
    /// Opens (creating directories as needed) the store under `root`.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            root: root.to_path_buf(),
            queue: Arc::new(DirectoryQueue::open(root.join("queue"))?),
            archive: Arc::new(DirectoryArchive::open(root.join("archive"))?),
            errors: Arc::new(DirectoryErrorBin::open(root.join("error"))?),
            inbound: Arc::new(DirectoryMessageSink::open(root.join("hl7_in"))?),
            forms: Arc::new(DirectoryForms::open(root)?),
            drain_lock: Arc::new(DirectoryDrainLock::new(root)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wires a processor over this store. Form lookups are cached for the
    /// lifetime of the processor.
    pub fn processor(&self, config: Arc<FormEntryConfig>) -> Result<ProcessorLoop, BuildError> {
        self.builder(config).build()
    }

    /// The builder behind [`processor`](Self::processor), for callers that
    /// replace a collaborator.
    pub fn builder(&self, config: Arc<FormEntryConfig>) -> ProcessorLoopBuilder {
        ProcessorLoop::builder()
            .queue(self.queue.clone())
            .archive(self.archive.clone())
            .errors(self.errors.clone())
            .forms(Arc::new(CachingFormResolver::new(self.forms.clone())))
            .sink(self.inbound.clone())
            .sources(config.clone())
            .config(config)
            .drain_lock(self.drain_lock.clone())
    }
}
