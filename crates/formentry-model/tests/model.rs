//! Tests for formentry-model types.

use chrono::{TimeZone, Utc};
use formentry_model::{
    Disposition, EntryState, ErrorEntryId, Failure, FailureKind, FormId, NewErrorEntry,
    QueueEntry, QueueEntryId,
};

fn sample_entry() -> QueueEntry {
    QueueEntry::new(
        QueueEntryId::new(12),
        "<form id=\"1\"/>",
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
    )
}

#[test]
fn test_unknown_form_summary_names_the_id() {
    let failure = Failure::unknown_form(FormId::new(999_999));
    assert_eq!(failure.kind, FailureKind::UnknownForm);
    assert_eq!(failure.summary, "form id 999999 does not exist");
    assert!(failure.detail.is_none());
}

#[test]
fn test_error_entry_copies_failure_and_payload() {
    let entry = sample_entry();
    let failure = Failure::malformed_payload("unexpected end of file");
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let error = NewErrorEntry::from_failure(&entry, &failure, "daemon", created)
        .with_id(ErrorEntryId::new(3));

    assert_eq!(error.queue_entry_id, entry.id);
    assert_eq!(error.payload, entry.payload);
    assert_eq!(error.error_summary, "Error retrieving form ID from data");
    assert_eq!(error.error_detail.as_deref(), Some("unexpected end of file"));
    assert_eq!(error.creator, "daemon");

    let disposition = Disposition::Errored {
        error,
        kind: failure.kind,
    };
    assert_eq!(disposition.state(), EntryState::Errored);
    assert!(disposition.state().is_terminal());
    assert_eq!(disposition.queue_entry_id(), QueueEntryId::new(12));
}

#[test]
fn test_queue_entry_serializes() {
    let entry = sample_entry();
    let json = serde_json::to_string(&entry).expect("serialize entry");
    let round: QueueEntry = serde_json::from_str(&json).expect("deserialize entry");
    assert_eq!(round, entry);
    assert!(json.contains("\"id\":12"));
}

#[test]
fn test_queued_is_not_terminal() {
    assert!(!EntryState::Queued.is_terminal());
    assert_eq!(EntryState::Archived.to_string(), "archived");
}
