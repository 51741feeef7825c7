//! A directory of JSON records keyed by numeric id.
//!
//! Each record lives in `<id>.json` with the id zero padded, so a plain
//! directory listing sorts in id order. The last allocated id is kept in a
//! `sequence` file; ids are therefore never handed out twice, even after the
//! record that held one is deleted.
//!
//! Allocation takes an exclusive lock on `sequence.lock`, so several
//! processes can insert into one directory. Keyed inserts also record the id
//! given to each key under `keys/`, which makes them idempotent.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use formentry_core::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::io::{io_error, read_json, write_atomic, write_json};

const SEQUENCE_FILE: &str = "sequence";
const LOCK_FILE: &str = "sequence.lock";
const KEYS_DIR: &str = "keys";

/// Outcome of [`RecordDir::insert_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Inserted<T> {
    New(T),
    Existing(T),
}

impl<T> Inserted<T> {
    pub(crate) fn into_record(self) -> T {
        match self {
            Self::New(record) | Self::Existing(record) => record,
        }
    }
}

/// Exclusive allocation lock; released when the file is closed.
struct AllocationLock {
    _file: File,
}

#[derive(Debug)]
pub(crate) struct RecordDir {
    dir: PathBuf,
}

impl RecordDir {
    pub(crate) fn open(dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&dir).map_err(io_error("create directory", &dir))?;
        Ok(Self { dir })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn record_path(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{id:020}.json"))
    }

    /// Allocates the next id, builds the record for it and writes it.
    pub(crate) fn insert<T, F>(&self, build: F) -> Result<T, StoreError>
    where
        T: Serialize,
        F: FnOnce(i64) -> T,
    {
        let _lock = self.lock()?;
        let id = self.next_id()?;
        let record = build(id);
        write_json(&self.record_path(id), &record)?;
        Ok(record)
    }

    /// Like [`insert`](Self::insert), but at most once per `key`.
    ///
    /// When `key` was inserted before and its record is still present, that
    /// record is returned untouched. `key` must be usable as a file name.
    pub(crate) fn insert_once<T, F>(&self, key: &str, build: F) -> Result<Inserted<T>, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(i64) -> T,
    {
        let _lock = self.lock()?;
        let key_path = self.dir.join(KEYS_DIR).join(key);
        let id = match read_key(&key_path)? {
            Some(id) => {
                if let Some(existing) = self.read(id)? {
                    return Ok(Inserted::Existing(existing));
                }
                id
            }
            None => {
                let id = self.next_id()?;
                write_atomic(&key_path, format!("{id}\n").as_bytes())?;
                id
            }
        };
        let record = build(id);
        write_json(&self.record_path(id), &record)?;
        Ok(Inserted::New(record))
    }

    pub(crate) fn read<T: DeserializeOwned>(&self, id: i64) -> Result<Option<T>, StoreError> {
        read_json(&self.record_path(id))
    }

    /// Removes a record; `false` if it was already gone.
    pub(crate) fn remove(&self, id: i64) -> Result<bool, StoreError> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(io_error("remove", &path)(error)),
        }
    }

    /// Ids of the records present, ascending.
    pub(crate) fn ids(&self) -> Result<Vec<i64>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(io_error("list", &self.dir))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error("list", &self.dir))?;
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|name| name.strip_suffix(".json"))
            else {
                continue;
            };
            if !stem.is_empty()
                && stem.bytes().all(|byte| byte.is_ascii_digit())
                && let Ok(id) = stem.parse::<i64>()
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub(crate) fn len(&self) -> Result<usize, StoreError> {
        Ok(self.ids()?.len())
    }

    /// Every record in id order. Records removed while listing are skipped.
    pub(crate) fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let mut records = Vec::new();
        for id in self.ids()? {
            if let Some(record) = self.read(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Blocks until this process holds the directory's allocation lock.
    fn lock(&self) -> Result<AllocationLock, StoreError> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_error("open lock", &path))?;
        file.lock().map_err(io_error("lock", &path))?;
        Ok(AllocationLock { _file: file })
    }

    /// Caller holds the allocation lock.
    fn next_id(&self) -> Result<i64, StoreError> {
        let path = self.dir.join(SEQUENCE_FILE);
        let last = match fs::read_to_string(&path) {
            Ok(text) => text.trim().parse::<i64>().map_err(|error| StoreError::Corrupt {
                path: path.clone(),
                reason: format!("invalid sequence value: {error}"),
            })?,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                self.ids()?.last().copied().unwrap_or(0)
            }
            Err(error) => return Err(io_error("read", &path)(error)),
        };
        let next = last.checked_add(1).ok_or_else(|| StoreError::Corrupt {
            path: path.clone(),
            reason: "sequence exhausted".to_string(),
        })?;
        write_atomic(&path, format!("{next}\n").as_bytes())?;
        Ok(next)
    }
}

/// Id recorded for a key; `None` when the key is new.
fn read_key(path: &Path) -> Result<Option<i64>, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|error| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("invalid key record: {error}"),
            }),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(io_error("read", path)(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ids_are_monotonic_across_deletes_and_reopen() {
        let dir = tempdir().unwrap();
        let records = RecordDir::open(dir.path().join("queue")).unwrap();
        assert_eq!(records.insert(|id| id).unwrap(), 1);
        assert_eq!(records.insert(|id| id).unwrap(), 2);
        records.remove(2).unwrap();

        let reopened = RecordDir::open(dir.path().join("queue")).unwrap();
        assert_eq!(reopened.insert(|id| id).unwrap(), 3);
        assert_eq!(reopened.ids().unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_missing_sequence_resumes_after_highest_record() {
        let dir = tempdir().unwrap();
        let records = RecordDir::open(dir.path().to_path_buf()).unwrap();
        write_json(&records.record_path(41), &41).unwrap();
        assert_eq!(records.insert(|id| id).unwrap(), 42);
    }

    #[test]
    fn test_listing_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let records = RecordDir::open(dir.path().to_path_buf()).unwrap();
        records.insert(|id| id).unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();
        fs::write(dir.path().join("README"), "").unwrap();
        assert_eq!(records.ids().unwrap(), vec![1]);
        assert_eq!(records.read_all::<i64>().unwrap(), vec![1]);
    }

    #[test]
    fn test_corrupt_sequence_is_reported() {
        let dir = tempdir().unwrap();
        let records = RecordDir::open(dir.path().to_path_buf()).unwrap();
        fs::write(dir.path().join(SEQUENCE_FILE), "many").unwrap();
        assert!(matches!(
            records.insert(|id| id),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_insert_once_returns_the_record_already_kept() {
        let dir = tempdir().unwrap();
        let records = RecordDir::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            records.insert_once("7", |id| (id, "first".to_string())).unwrap(),
            Inserted::New((1, "first".to_string()))
        );
        assert_eq!(
            records.insert_once("7", |id| (id, "second".to_string())).unwrap(),
            Inserted::Existing((1, "first".to_string()))
        );
        assert_eq!(
            records.insert_once("8", |id| (id, "other".to_string())).unwrap(),
            Inserted::New((2, "other".to_string()))
        );

        let reopened = RecordDir::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            reopened.insert_once("7", |id| (id, "third".to_string())).unwrap(),
            Inserted::Existing((1, "first".to_string()))
        );
        assert_eq!(reopened.ids().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_insert_once_rewrites_a_lost_record_under_its_id() {
        let dir = tempdir().unwrap();
        let records = RecordDir::open(dir.path().to_path_buf()).unwrap();
        records.insert_once("k", |id| id).unwrap();
        records.remove(1).unwrap();
        assert_eq!(records.insert_once("k", |id| id).unwrap(), Inserted::New(1));
        assert_eq!(records.insert(|id| id).unwrap(), 2);
    }

    #[test]
    fn test_separate_handles_never_share_an_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue");
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let records = RecordDir::open(path.clone()).unwrap();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| records.insert(|id| id).unwrap())
                        .collect::<Vec<i64>>()
                })
            })
            .collect();
        let mut ids: Vec<i64> = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=100).collect::<Vec<_>>());
        assert_eq!(RecordDir::open(path).unwrap().len().unwrap(), 100);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let records = RecordDir::open(dir.path().to_path_buf()).unwrap();
        records.insert(|id| id).unwrap();
        assert!(records.remove(1).unwrap());
        assert!(!records.remove(1).unwrap());
    }
}
