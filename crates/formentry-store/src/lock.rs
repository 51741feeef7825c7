//! Lock file serializing drains of one store across processes.

use std::fs::{OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use formentry_core::{DrainLease, DrainLock, StoreError};
use tracing::debug;

use crate::io::io_error;

/// Name of the lock file in the store root.
pub const DRAIN_LOCK_FILE: &str = "drain.lock";

/// Exclusive lock on `drain.lock`, held by the open file for the whole drain.
#[derive(Debug)]
pub struct DirectoryDrainLock {
    path: PathBuf,
}

impl DirectoryDrainLock {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(DRAIN_LOCK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DrainLock for DirectoryDrainLock {
    fn try_acquire(&self) -> Result<Option<DrainLease>, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(io_error("open lock", &self.path))?;
        match file.try_lock() {
            Ok(()) => {
                debug!(path = %self.path.display(), "Took drain lock");
                Ok(Some(Box::new(file)))
            }
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(error)) => Err(io_error("lock", &self.path)(error)),
        }
    }
}
