//! In-memory collaborators for tests and embedding.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use formentry_model::{
    ArchiveEntry, ArchiveEntryId, ErrorEntry, ErrorEntryId, FormDescriptor, FormId, Hl7Source,
    InboundMessage, NewArchiveEntry, NewErrorEntry, QueueEntry, QueueEntryId, SubmitOutcome,
};

use crate::error::StoreError;
use crate::ports::{
    ArchiveSink, ConfigStore, ErrorSink, FormResolver, MessageSink, QueueStore, SourceRegistry,
};
use crate::processor::DEFAULT_SOURCE_NAME;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_id(len: usize) -> i64 {
    i64::try_from(len).map_or(i64::MAX, |len| len.saturating_add(1))
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    entries: BTreeMap<QueueEntryId, QueueEntry>,
}

/// Queue ordered by id. Ids are never reused.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids currently queued, oldest first.
    pub fn ids(&self) -> Vec<QueueEntryId> {
        lock(&self.state).entries.keys().copied().collect()
    }
}

impl QueueStore for MemoryQueue {
    fn pop_oldest(&self) -> Result<Option<QueueEntry>, StoreError> {
        Ok(lock(&self.state).entries.values().next().cloned())
    }

    fn delete(&self, id: QueueEntryId) -> Result<(), StoreError> {
        lock(&self.state).entries.remove(&id);
        Ok(())
    }

    fn enqueue(&self, payload: &str) -> Result<QueueEntry, StoreError> {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let entry = QueueEntry::new(QueueEntryId::new(state.next_id), payload, Utc::now());
        state.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.state).entries.len())
    }
}

#[derive(Debug, Default)]
pub struct MemoryArchive {
    entries: Mutex<Vec<ArchiveEntry>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ArchiveEntry> {
        lock(&self.entries).clone()
    }
}

impl ArchiveSink for MemoryArchive {
    fn insert(&self, entry: NewArchiveEntry) -> Result<ArchiveEntry, StoreError> {
        let mut entries = lock(&self.entries);
        if let Some(existing) = entries
            .iter()
            .find(|existing| existing.queue_entry_id == entry.queue_entry_id)
        {
            return Ok(existing.clone());
        }
        let id = ArchiveEntryId::new(next_id(entries.len()));
        let entry = entry.with_id(id);
        entries.push(entry.clone());
        Ok(entry)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.entries).len())
    }
}

#[derive(Debug, Default)]
pub struct MemoryErrorBin {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl MemoryErrorBin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorSink for MemoryErrorBin {
    fn insert(&self, entry: NewErrorEntry) -> Result<ErrorEntry, StoreError> {
        let mut entries = lock(&self.entries);
        if let Some(existing) = entries
            .iter()
            .find(|existing| existing.queue_entry_id == entry.queue_entry_id)
        {
            return Ok(existing.clone());
        }
        let id = ErrorEntryId::new(next_id(entries.len()));
        let entry = entry.with_id(id);
        entries.push(entry.clone());
        Ok(entry)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.entries).len())
    }

    fn list(&self) -> Result<Vec<ErrorEntry>, StoreError> {
        Ok(lock(&self.entries).clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryForms {
    forms: Mutex<HashMap<FormId, FormDescriptor>>,
}

impl MemoryForms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_form(self, form: FormDescriptor) -> Self {
        self.insert(form);
        self
    }

    pub fn insert(&self, form: FormDescriptor) {
        lock(&self.forms).insert(form.form_id, form);
    }
}

impl FormResolver for MemoryForms {
    fn by_id(&self, id: FormId) -> Result<Option<FormDescriptor>, StoreError> {
        Ok(lock(&self.forms).get(&id).cloned())
    }
}

/// Inbound sink that keeps every submission and delivers each
/// `(source, key)` once.
#[derive(Debug, Default)]
pub struct MemoryMessageSink {
    submissions: Mutex<Vec<InboundMessage>>,
    delivered: Mutex<Vec<InboundMessage>>,
    keys: Mutex<HashSet<(String, String)>>,
    failing: AtomicBool,
}

impl MemoryMessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following submission fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every message passed to `submit`, including duplicates.
    pub fn submissions(&self) -> Vec<InboundMessage> {
        lock(&self.submissions).clone()
    }

    /// Messages actually stored.
    pub fn delivered(&self) -> Vec<InboundMessage> {
        lock(&self.delivered).clone()
    }
}

impl MessageSink for MemoryMessageSink {
    fn submit(&self, message: &InboundMessage) -> Result<SubmitOutcome, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("inbound queue unavailable"));
        }
        lock(&self.submissions).push(message.clone());
        let key = (message.source.name.clone(), message.source_key.clone());
        if !lock(&self.keys).insert(key) {
            return Ok(SubmitOutcome::Duplicate);
        }
        lock(&self.delivered).push(message.clone());
        Ok(SubmitOutcome::Accepted)
    }
}

/// Fixed properties and sources. Starts with the default `local` source.
#[derive(Debug)]
pub struct MemoryConfig {
    properties: HashMap<String, String>,
    sources: Vec<Hl7Source>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            properties: HashMap::new(),
            sources: vec![Hl7Source::new(DEFAULT_SOURCE_NAME)],
        }
    }
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: Hl7Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn without_sources(mut self) -> Self {
        self.sources.clear();
        self
    }
}

impl ConfigStore for MemoryConfig {
    fn get_string(&self, key: &str, default: &str) -> Result<String, StoreError> {
        Ok(self
            .properties
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string()))
    }
}

impl SourceRegistry for MemoryConfig {
    fn by_name(&self, name: &str) -> Result<Option<Hl7Source>, StoreError> {
        Ok(self
            .sources
            .iter()
            .find(|source| source.name == name)
            .cloned())
    }
}
