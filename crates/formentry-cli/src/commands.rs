//! Command implementations, independent of argument parsing and output.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use formentry_core::{
    DrainOutcome, ErrorSink, ProcessorLoop, QueueStatus, QueueStore, TransformEngine, XsltEngine,
};
use formentry_model::{ErrorEntry, QueueEntry};
use formentry_store::{CONFIG_FILE, FormEntryConfig, LocalStore};
use tracing::{info, info_span};

/// Configuration, store and processor for one invocation.
pub struct Workspace {
    pub config: Arc<FormEntryConfig>,
    pub store: LocalStore,
    pub processor: ProcessorLoop,
}

/// Outcome of `formentry process`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Another drain was already running.
    pub skipped: bool,
    pub archived: usize,
    pub errored: usize,
    /// Why the drain stopped early, with its causes.
    pub failure: Option<String>,
    pub status: QueueStatus,
}

impl ProcessResult {
    pub fn has_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Loads the configuration and opens the store it points at.
///
/// An explicit `config_path` must exist; without one, `formentry.toml` in
/// the working directory is used when present.
pub fn open_workspace(config_path: Option<&Path>) -> Result<Workspace> {
    let config = match config_path {
        Some(path) => FormEntryConfig::load(path)
            .with_context(|| format!("load configuration {}", path.display()))?,
        None => FormEntryConfig::load_or_default(Path::new(CONFIG_FILE))
            .context("load default configuration")?,
    };
    let config = Arc::new(config);
    let store = LocalStore::open(&config.store_dir)
        .with_context(|| format!("open store {}", config.store_dir.display()))?;
    let processor = store
        .processor(Arc::clone(&config))
        .context("wire queue processor")?;
    Ok(Workspace {
        config,
        store,
        processor,
    })
}

/// Drains the queue once.
///
/// A drain that stops early is reported in [`ProcessResult::failure`] rather
/// than as an error, so the entries it did finish are still counted.
pub fn run_process(workspace: &Workspace) -> Result<ProcessResult> {
    let before = workspace.processor.status().context("read queue status")?;
    let outcome = workspace.processor.process_queue();
    let after = workspace.processor.status().context("read queue status")?;

    let (skipped, failure) = match outcome {
        Ok(DrainOutcome::Skipped) => (true, None),
        Ok(DrainOutcome::Drained(_)) => (false, None),
        Err(error) => (false, Some(format!("{:#}", anyhow::Error::from(error)))),
    };
    Ok(ProcessResult {
        skipped,
        archived: after.archived.saturating_sub(before.archived),
        errored: after.errored.saturating_sub(before.errored),
        failure,
        status: after,
    })
}

pub fn run_status(workspace: &Workspace) -> Result<QueueStatus> {
    workspace.processor.status().context("read queue status")
}

/// Appends each file's contents to the queue, in the order given.
pub fn run_enqueue(workspace: &Workspace, files: &[PathBuf]) -> Result<Vec<QueueEntry>> {
    let span = info_span!("enqueue", files = files.len());
    let _guard = span.enter();
    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let payload = fs::read_to_string(path)
            .with_context(|| format!("read payload {}", path.display()))?;
        let entry = workspace
            .store
            .queue
            .enqueue(&payload)
            .with_context(|| format!("enqueue {}", path.display()))?;
        info!(queue_entry_id = %entry.id, path = %path.display(), "Queued form entry");
        entries.push(entry);
    }
    Ok(entries)
}

/// Queued entries, oldest first, at most `limit` of them.
pub fn run_queue(workspace: &Workspace, limit: Option<usize>) -> Result<Vec<QueueEntry>> {
    let mut entries = workspace.store.queue.list().context("list queue entries")?;
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    Ok(entries)
}

/// Error-bin entries, newest first, at most `limit` of them.
pub fn run_errors(workspace: &Workspace, limit: Option<usize>) -> Result<Vec<ErrorEntry>> {
    let mut entries = workspace.store.errors.list().context("list error entries")?;
    entries.reverse();
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    Ok(entries)
}

/// Applies a stylesheet file to an input file outside the queue.
pub fn run_transform(xslt: &Path, input: &Path) -> Result<String> {
    let stylesheet = fs::read_to_string(xslt)
        .with_context(|| format!("read stylesheet {}", xslt.display()))?;
    let payload =
        fs::read_to_string(input).with_context(|| format!("read input {}", input.display()))?;
    XsltEngine
        .apply(&stylesheet, &payload)
        .with_context(|| format!("transform {} with {}", input.display(), xslt.display()))
}
