//! The local store driven through a processor.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use formentry_core::{
    ArchiveSink, DrainOutcome, DrainReport, ErrorSink, FormResolver, MessageSink, ProcessorLoop,
    QueueStore, StoreError,
};
use formentry_model::{
    Failure, FormDescriptor, FormId, Hl7Source, InboundMessage, NewArchiveEntry, NewErrorEntry,
    QueueEntry, SubmitOutcome,
};
use formentry_store::{
    DRAIN_LOCK_FILE, DirectoryForms, FORMS_MANIFEST, FormEntryConfig, LocalStore,
};
use proptest::prelude::*;
use tempfile::tempdir;

const XSLT: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="text"/>
  <xsl:template match="/form">MSH|^~\&amp;|FORMENTRY|<xsl:value-of select="header/uid"/></xsl:template>
</xsl:stylesheet>"#;

fn write_forms(root: &Path) {
    fs::write(
        root.join(FORMS_MANIFEST),
        "[[form]]\nid = 12\nuuid = \"uuid-12\"\nname = \"Adult Return\"\nxslt = \"xslt/12.xsl\"\n",
    )
    .unwrap();
    fs::create_dir_all(root.join("xslt")).unwrap();
    fs::write(root.join("xslt/12.xsl"), XSLT).unwrap();
}

fn payload(uid: &str) -> String {
    format!(r#"<form id="12"><header><uid>{uid}</uid></header></form>"#)
}

#[test]
fn test_drain_writes_records_to_disk() {
    let dir = tempdir().unwrap();
    write_forms(dir.path());
    let store = LocalStore::open(dir.path()).unwrap();
    store.queue.enqueue(&payload("a-1")).unwrap();
    store.queue.enqueue("<form/>").unwrap();

    let processor = store
        .processor(Arc::new(FormEntryConfig::default()))
        .unwrap();
    let outcome = processor.process_queue().unwrap();
    assert_eq!(
        outcome,
        DrainOutcome::Drained(DrainReport {
            archived: 1,
            errored: 1
        })
    );

    assert_eq!(store.queue.len().unwrap(), 0);
    assert_eq!(store.archive.len().unwrap(), 1);
    assert_eq!(store.errors.len().unwrap(), 1);

    let messages = store.inbound.list().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.source_key, "a-1");
    assert_eq!(messages[0].message.payload, "MSH|^~\\&|FORMENTRY|a-1");

    assert!(dir.path().join("queue/sequence").exists());
    assert!(
        dir.path()
            .join("archive/00000000000000000001.json")
            .exists()
    );
    let error = fs::read_to_string(dir.path().join("error/00000000000000000001.json")).unwrap();
    assert!(error.contains("Error retrieving form ID from data"));
}

#[test]
fn test_pop_oldest_leaves_entry_until_deleted() {
    let dir = tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let first = store.queue.enqueue("<a/>").unwrap();
    store.queue.enqueue("<b/>").unwrap();

    assert_eq!(store.queue.pop_oldest().unwrap(), Some(first.clone()));
    assert_eq!(store.queue.pop_oldest().unwrap(), Some(first.clone()));

    let reopened = LocalStore::open(dir.path()).unwrap();
    assert_eq!(reopened.queue.len().unwrap(), 2);
    reopened.queue.delete(first.id).unwrap();
    reopened.queue.delete(first.id).unwrap();
    assert_eq!(
        reopened.queue.pop_oldest().unwrap().map(|entry| entry.payload),
        Some("<b/>".to_string())
    );
}

#[test]
fn test_inbound_duplicates_survive_reopen() {
    let dir = tempdir().unwrap();
    let message = InboundMessage {
        source: Hl7Source::new("local"),
        source_key: "k-1".to_string(),
        payload: "MSH".to_string(),
        received_at: Utc::now(),
    };

    let store = LocalStore::open(dir.path()).unwrap();
    assert_eq!(
        store.inbound.submit(&message).unwrap(),
        SubmitOutcome::Accepted
    );
    drop(store);

    let store = LocalStore::open(dir.path()).unwrap();
    assert_eq!(
        store.inbound.submit(&message).unwrap(),
        SubmitOutcome::Duplicate
    );
    let other_source = InboundMessage {
        source: Hl7Source::new("lab"),
        ..message
    };
    assert_eq!(
        store.inbound.submit(&other_source).unwrap(),
        SubmitOutcome::Accepted
    );
    assert_eq!(store.inbound.len().unwrap(), 2);
}

#[test]
fn test_unconfigured_source_keeps_entry_queued() {
    let dir = tempdir().unwrap();
    write_forms(dir.path());
    let store = LocalStore::open(dir.path()).unwrap();
    store.queue.enqueue(&payload("a-1")).unwrap();

    let config = FormEntryConfig {
        hl7_sources: Vec::new(),
        ..FormEntryConfig::default()
    };
    let processor = store.processor(Arc::new(config)).unwrap();
    assert!(processor.process_queue().is_err());
    assert_eq!(store.queue.len().unwrap(), 1);
    assert_eq!(store.errors.list().unwrap().len(), 0);
    assert!(store.inbound.is_empty().unwrap());
}

/// Resolver that runs another processor's drain in the middle of a lookup.
struct DrainingResolver {
    inner: Arc<DirectoryForms>,
    other: ProcessorLoop,
    outcomes: Mutex<Vec<DrainOutcome>>,
}

impl FormResolver for DrainingResolver {
    fn by_id(&self, id: FormId) -> Result<Option<FormDescriptor>, StoreError> {
        let outcome = self
            .other
            .process_queue()
            .map_err(|error| StoreError::unavailable(error.to_string()))?;
        self.outcomes.lock().unwrap().push(outcome);
        self.inner.by_id(id)
    }
}

#[test]
fn test_stores_sharing_a_root_never_drain_together() {
    let dir = tempdir().unwrap();
    write_forms(dir.path());
    let config = Arc::new(FormEntryConfig::default());
    let first = LocalStore::open(dir.path()).unwrap();
    let second = LocalStore::open(dir.path()).unwrap();
    first.queue.enqueue(&payload("shared")).unwrap();

    let resolver = Arc::new(DrainingResolver {
        inner: first.forms.clone(),
        other: second.processor(config.clone()).unwrap(),
        outcomes: Mutex::default(),
    });
    let processor = first
        .builder(config.clone())
        .forms(resolver.clone())
        .build()
        .unwrap();

    assert_eq!(
        processor.process_queue().unwrap(),
        DrainOutcome::Drained(DrainReport {
            archived: 1,
            errored: 0
        })
    );
    assert_eq!(*resolver.outcomes.lock().unwrap(), vec![DrainOutcome::Skipped]);
    assert_eq!(second.archive.len().unwrap(), 1);
    assert_eq!(second.inbound.len().unwrap(), 1);
    assert!(dir.path().join(DRAIN_LOCK_FILE).exists());

    assert_eq!(
        second.processor(config).unwrap().process_queue().unwrap(),
        DrainOutcome::Drained(DrainReport::default())
    );
}

#[test]
fn test_outcomes_are_written_once_per_queue_entry() {
    let dir = tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let entry = store.queue.enqueue("<form/>").unwrap();

    let archived = store
        .archive
        .insert(NewArchiveEntry::from_queue_entry(&entry, Utc::now()))
        .unwrap();
    let reopened = LocalStore::open(dir.path()).unwrap();
    let again = reopened
        .archive
        .insert(NewArchiveEntry::from_queue_entry(&entry, Utc::now()))
        .unwrap();
    assert_eq!(again, archived);
    assert_eq!(reopened.archive.len().unwrap(), 1);

    let failure = Failure::malformed_payload("no form id");
    let errored = store
        .errors
        .insert(NewErrorEntry::from_failure(&entry, &failure, "test", Utc::now()))
        .unwrap();
    reopened
        .errors
        .insert(NewErrorEntry::from_failure(&entry, &failure, "test", Utc::now()))
        .unwrap();
    assert_eq!(reopened.errors.list().unwrap(), vec![errored]);
}

#[derive(Debug, Clone)]
enum Op {
    Enqueue,
    DeleteOldest,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn queue_ids_increase_and_oldest_comes_first(
        ops in proptest::collection::vec(prop_oneof![Just(Op::Enqueue), Just(Op::DeleteOldest)], 1..20)
    ) {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let mut model: Vec<QueueEntry> = Vec::new();
        let mut last_id = 0;

        for op in ops {
            match op {
                Op::Enqueue => {
                    let entry = store.queue.enqueue("<form/>").unwrap();
                    prop_assert!(entry.id.get() > last_id);
                    last_id = entry.id.get();
                    model.push(entry);
                }
                Op::DeleteOldest => {
                    let oldest = store.queue.pop_oldest().unwrap();
                    prop_assert_eq!(oldest.as_ref().map(|e| e.id), model.first().map(|e| e.id));
                    if let Some(entry) = oldest {
                        store.queue.delete(entry.id).unwrap();
                        model.remove(0);
                    }
                }
            }
            prop_assert_eq!(store.queue.len().unwrap(), model.len());
        }
    }
}
