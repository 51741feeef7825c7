//! The queue drain loop.
//!
//! Each entry runs through parse, form lookup, source lookup, transform and
//! dispatch. Terminal failures move the entry to the error bin; anything
//! else stops the drain and leaves the entry queued for the next run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use formentry_model::{
    Disposition, Failure, Hl7Source, NewArchiveEntry, NewErrorEntry, QueueEntry,
};
use tracing::{debug, debug_span, error, info, info_span, warn};

use crate::engine::{TransformEngine, XsltEngine};
use crate::error::{BuildError, ProcessError};
use crate::payload::parse_payload;
use crate::ports::{
    ArchiveSink, ConfigStore, DrainLock, ErrorSink, FormResolver, MessageSink, QueueStore,
    SourceRegistry,
};
use crate::router::{Router, dedup_key};

/// Property naming the HL7 source transformed messages are filed under.
pub const DEFAULT_SOURCE_PROPERTY: &str = "formentry.default_hl7_source";

/// Source used when [`DEFAULT_SOURCE_PROPERTY`] is not set.
pub const DEFAULT_SOURCE_NAME: &str = "local";

/// Creator recorded on error entries unless the builder sets another.
pub const DEFAULT_CREATOR: &str = "formentry-processor";

/// Result of [`ProcessorLoop::process_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain held the token; nothing was done.
    Skipped,
    /// The queue was drained until empty.
    Drained(DrainReport),
}

/// Counts of entries finished by one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub archived: usize,
    pub errored: usize,
}

impl DrainReport {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Archived { .. } => self.archived += 1,
            Disposition::Errored { .. } => self.errored += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.archived + self.errored
    }
}

/// Result of [`ProcessorLoop::process_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextOutcome {
    Empty,
    Processed(Disposition),
}

/// Entry counts across the queue, archive and error bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued: usize,
    pub archived: usize,
    pub errored: usize,
}

/// Releases the drain token when dropped, including during unwinding.
struct DrainGuard<'a> {
    token: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(token: &'a AtomicBool) -> Option<Self> {
        token
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { token })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.token.store(false, Ordering::Release);
    }
}

/// Drains the form entry queue.
///
/// Only one [`process_queue`](Self::process_queue) runs at a time per
/// instance; share the instance (for example behind `Arc`) to get single
/// flight across threads. Processors in different processes are kept apart
/// by a [`DrainLock`] set on the builder.
pub struct ProcessorLoop {
    queue: Arc<dyn QueueStore>,
    archive: Arc<dyn ArchiveSink>,
    errors: Arc<dyn ErrorSink>,
    forms: Arc<dyn FormResolver>,
    engine: Arc<dyn TransformEngine>,
    router: Router,
    sources: Arc<dyn SourceRegistry>,
    config: Arc<dyn ConfigStore>,
    creator: String,
    drain_lock: Option<Arc<dyn DrainLock>>,
    draining: AtomicBool,
}

impl ProcessorLoop {
    pub fn builder() -> ProcessorLoopBuilder {
        ProcessorLoopBuilder::default()
    }

    /// Whether a drain currently holds the token.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Processes entries until the queue is empty.
    ///
    /// Returns [`DrainOutcome::Skipped`] without touching the queue when
    /// another drain is in progress. A non-terminal failure stops the drain
    /// and is returned; entries finished before it stay finished.
    pub fn process_queue(&self) -> Result<DrainOutcome, ProcessError> {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            warn!("Queue drain already in progress, skipping");
            return Ok(DrainOutcome::Skipped);
        };
        let _lease = match &self.drain_lock {
            Some(lock) => match lock
                .try_acquire()
                .map_err(ProcessError::store("acquire drain lock"))?
            {
                Some(lease) => Some(lease),
                None => {
                    warn!("Queue drain held by another processor, skipping");
                    return Ok(DrainOutcome::Skipped);
                }
            },
            None => None,
        };
        let span = info_span!("drain");
        let _enter = span.enter();

        let mut report = DrainReport::default();
        loop {
            match self.process_next() {
                Ok(NextOutcome::Empty) => break,
                Ok(NextOutcome::Processed(disposition)) => report.record(&disposition),
                Err(err) => {
                    error!(
                        error = %err,
                        kind = err.kind(),
                        archived = report.archived,
                        errored = report.errored,
                        "Queue drain stopped"
                    );
                    return Err(err);
                }
            }
        }
        info!(
            archived = report.archived,
            errored = report.errored,
            "Queue drained"
        );
        Ok(DrainOutcome::Drained(report))
    }

    /// Processes the oldest queued entry, if any.
    ///
    /// This does not take the drain token; callers mixing it with
    /// [`process_queue`](Self::process_queue) must serialize them.
    pub fn process_next(&self) -> Result<NextOutcome, ProcessError> {
        let entry = self
            .queue
            .pop_oldest()
            .map_err(ProcessError::store("read oldest queue entry"))?;
        match entry {
            Some(entry) => self.process_one(entry).map(NextOutcome::Processed),
            None => Ok(NextOutcome::Empty),
        }
    }

    /// Runs one entry through the pipeline and records its outcome.
    pub fn process_one(&self, entry: QueueEntry) -> Result<Disposition, ProcessError> {
        let span = debug_span!("entry", queue_entry_id = %entry.id);
        let _enter = span.enter();

        let info = match parse_payload(&entry.payload) {
            Ok(info) => info,
            Err(detail) => return self.reject(&entry, Failure::malformed_payload(detail)),
        };
        debug!(form_id = %info.form_id, "Parsed payload");

        let form = self
            .forms
            .by_id(info.form_id)
            .map_err(ProcessError::store("resolve form"))?;
        let Some(form) = form else {
            return self.reject(&entry, Failure::unknown_form(info.form_id));
        };

        let source = self.source()?;
        let key = dedup_key(info.source_key.as_deref(), entry.id);

        let hl7 = match self.engine.apply(&form.xslt, &entry.payload) {
            Ok(hl7) => hl7,
            Err(err) => return self.reject(&entry, Failure::transform_failure(err.message)),
        };

        let submit = self
            .router
            .route(&source, &key, hl7, Utc::now())
            .map_err(|source| ProcessError::SinkFailure {
                queue_entry_id: entry.id,
                source,
            })?;
        let archive = self
            .archive
            .insert(NewArchiveEntry::from_queue_entry(&entry, Utc::now()))
            .map_err(ProcessError::store("write archive entry"))?;
        self.queue
            .delete(entry.id)
            .map_err(ProcessError::store("delete queue entry"))?;

        info!(
            form_id = %info.form_id,
            archive_id = %archive.id,
            ?submit,
            "Archived queue entry"
        );
        Ok(Disposition::Archived {
            archive,
            source_key: key,
            submit,
        })
    }

    /// Counts across the queue, archive and error bin.
    pub fn status(&self) -> Result<QueueStatus, ProcessError> {
        Ok(QueueStatus {
            queued: self
                .queue
                .len()
                .map_err(ProcessError::store("count queue entries"))?,
            archived: self
                .archive
                .len()
                .map_err(ProcessError::store("count archive entries"))?,
            errored: self
                .errors
                .len()
                .map_err(ProcessError::store("count error entries"))?,
        })
    }

    fn source(&self) -> Result<Hl7Source, ProcessError> {
        let name = self
            .config
            .get_string(DEFAULT_SOURCE_PROPERTY, DEFAULT_SOURCE_NAME)
            .map_err(ProcessError::store("read source property"))?;
        self.sources
            .by_name(&name)
            .map_err(ProcessError::store("look up HL7 source"))?
            .ok_or(ProcessError::SourceUnavailable { name })
    }

    fn reject(&self, entry: &QueueEntry, failure: Failure) -> Result<Disposition, ProcessError> {
        warn!(
            kind = %failure.kind,
            summary = %failure.summary,
            "Moving queue entry to error bin"
        );
        let kind = failure.kind;
        let error = self
            .errors
            .insert(NewErrorEntry::from_failure(
                entry,
                &failure,
                self.creator.as_str(),
                Utc::now(),
            ))
            .map_err(ProcessError::store("write error entry"))?;
        self.queue
            .delete(entry.id)
            .map_err(ProcessError::store("delete queue entry"))?;
        Ok(Disposition::Errored { error, kind })
    }
}

/// Collects the collaborators of a [`ProcessorLoop`].
///
/// The transform engine defaults to [`XsltEngine`] and the creator to
/// [`DEFAULT_CREATOR`]; everything else is required.
#[derive(Default)]
pub struct ProcessorLoopBuilder {
    queue: Option<Arc<dyn QueueStore>>,
    archive: Option<Arc<dyn ArchiveSink>>,
    errors: Option<Arc<dyn ErrorSink>>,
    forms: Option<Arc<dyn FormResolver>>,
    engine: Option<Arc<dyn TransformEngine>>,
    sink: Option<Arc<dyn MessageSink>>,
    sources: Option<Arc<dyn SourceRegistry>>,
    config: Option<Arc<dyn ConfigStore>>,
    creator: Option<String>,
    drain_lock: Option<Arc<dyn DrainLock>>,
}

impl ProcessorLoopBuilder {
    pub fn queue(mut self, queue: Arc<dyn QueueStore>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn archive(mut self, archive: Arc<dyn ArchiveSink>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn errors(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn forms(mut self, forms: Arc<dyn FormResolver>) -> Self {
        self.forms = Some(forms);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn TransformEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Inbound message sink the router submits to.
    pub fn sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn sources(mut self, sources: Arc<dyn SourceRegistry>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn config(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    /// Name recorded as the creator of error entries.
    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    /// Lock taken for the whole of each drain, in addition to the
    /// in-process token.
    pub fn drain_lock(mut self, lock: Arc<dyn DrainLock>) -> Self {
        self.drain_lock = Some(lock);
        self
    }

    pub fn build(self) -> Result<ProcessorLoop, BuildError> {
        fn required<T>(value: Option<T>, collaborator: &'static str) -> Result<T, BuildError> {
            value.ok_or(BuildError { collaborator })
        }

        let engine: Arc<dyn TransformEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(XsltEngine),
        };
        Ok(ProcessorLoop {
            queue: required(self.queue, "queue")?,
            archive: required(self.archive, "archive")?,
            errors: required(self.errors, "error sink")?,
            forms: required(self.forms, "form resolver")?,
            engine,
            router: Router::new(required(self.sink, "message sink")?),
            sources: required(self.sources, "source registry")?,
            config: required(self.config, "config store")?,
            creator: self.creator.unwrap_or_else(|| DEFAULT_CREATOR.to_string()),
            drain_lock: self.drain_lock,
            draining: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_token() {
        let token = AtomicBool::new(false);
        {
            let guard = DrainGuard::acquire(&token);
            assert!(guard.is_some());
            assert!(DrainGuard::acquire(&token).is_none());
        }
        assert!(!token.load(Ordering::Acquire));
        assert!(DrainGuard::acquire(&token).is_some());
    }

    #[test]
    fn test_guard_releases_token_on_panic() {
        let token = AtomicBool::new(false);
        let result = std::panic::catch_unwind(|| {
            let _guard = DrainGuard::acquire(&token);
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!token.load(Ordering::Acquire));
    }

    #[test]
    fn test_builder_reports_missing_collaborator() {
        let error = ProcessorLoop::builder().build().err().unwrap();
        assert_eq!(error.collaborator, "queue");
    }

    #[test]
    fn test_report_counts() {
        let mut report = DrainReport::default();
        assert_eq!(report.total(), 0);
        report.archived = 2;
        report.errored = 1;
        assert_eq!(report.total(), 3);
    }
}
