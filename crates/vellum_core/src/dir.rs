//! Database directory layout and the single-writer lock.
//!
//! On disk a database is a directory:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK          # advisory lock, one process at a time
//! └─ journal.vlm   # append-only commit journal
//! ```
//!
//! The LOCK file is held exclusively for the lifetime of the open database.
//! A second open of the same path fails with `StoreUnavailable`.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.vlm";

/// Holds the database directory and its exclusive lock.
#[derive(Debug)]
pub(crate) struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory and acquires its lock.
    ///
    /// # Errors
    ///
    /// Fails with `StoreUnavailable` if another process holds the lock,
    /// or if the directory is missing and `create_if_missing` is false.
    pub(crate) fn open(path: &Path, create_if_missing: bool) -> Result<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(Error::store_unavailable(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(Error::store_unavailable(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(Error::store_unavailable(format!(
                "database is locked by another process: {}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Path of the commit journal.
    pub(crate) fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        let dir = DatabaseDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert_eq!(dir.journal_path(), path.join("journal.vlm"));
    }

    #[test]
    fn open_without_create_fails_on_missing() {
        let temp = tempdir().unwrap();
        let result = DatabaseDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(Error::StoreUnavailable { .. })));
    }

    #[test]
    fn second_open_is_rejected_while_locked() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");

        let _first = DatabaseDir::open(&path, true).unwrap();
        let second = DatabaseDir::open(&path, true);
        assert!(matches!(second, Err(Error::StoreUnavailable { .. })));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        {
            let _dir = DatabaseDir::open(&path, true).unwrap();
        }
        let _again = DatabaseDir::open(&path, true).unwrap();
    }
}
