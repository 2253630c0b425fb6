//! Cross-process lock around first-time key creation.
//!
//! Neither the secure store nor the preference store guarantees that two
//! processes racing to create the key end up with the same one. Holding an
//! exclusive file lock while the key is established closes that window.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{KeyError, KeyResult};

/// A file-backed exclusive lock shared by every process using the same path.
#[derive(Debug, Clone)]
pub struct CreationLock {
    file: Arc<File>,
    path: PathBuf,
}

/// Holds the lock until dropped.
#[derive(Debug)]
pub struct CreationLockGuard {
    file: Arc<File>,
}

impl CreationLock {
    /// Opens or creates the lock file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Lock`] if the file cannot be opened or created.
    pub fn open(path: &Path) -> KeyResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| lock_err(path, &err))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| lock_err(path, &err))?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until the lock is acquired.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Lock`] if the lock cannot be acquired.
    pub fn lock(&self) -> KeyResult<CreationLockGuard> {
        self.file.lock().map_err(|err| lock_err(&self.path, &err))?;
        Ok(CreationLockGuard {
            file: Arc::clone(&self.file),
        })
    }

    /// Acquires the lock if nobody else holds it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Lock`] for failures other than contention.
    pub fn try_lock(&self) -> KeyResult<Option<CreationLockGuard>> {
        match self.file.try_lock() {
            Ok(()) => Ok(Some(CreationLockGuard {
                file: Arc::clone(&self.file),
            })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(err)) => Err(lock_err(&self.path, &err)),
        }
    }

    /// Runs `f` while holding the lock.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Lock`] if the lock cannot be acquired, otherwise whatever `f` returns.
    pub fn with_lock<R>(&self, f: impl FnOnce() -> KeyResult<R>) -> KeyResult<R> {
        let _guard = self.lock()?;
        f()
    }
}

impl Drop for CreationLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn lock_err(path: &Path, err: &std::io::Error) -> KeyError {
    KeyError::Lock(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_lock_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("datakey-lock-{}.lock", Uuid::new_v4()));
        path
    }

    #[test]
    fn test_lock_is_exclusive() {
        let path = temp_lock_path();
        let lock_a = CreationLock::open(&path).expect("open lock");
        let guard = lock_a.lock().expect("acquire lock");

        let lock_b = CreationLock::open(&path).expect("open lock");
        assert!(lock_b.try_lock().expect("try lock").is_none());

        drop(guard);
        assert!(lock_b.try_lock().expect("try lock").is_some());

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let path = temp_lock_path();
        let lock = CreationLock::open(&path).expect("open lock");
        let result: KeyResult<()> =
            lock.with_lock(|| Err(KeyError::PersistenceFailed("disk full".to_string())));
        assert!(matches!(result, Err(KeyError::PersistenceFailed(_))));

        let other = CreationLock::open(lock.path()).expect("open lock");
        assert!(other.try_lock().expect("try lock").is_some());

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("create.lock");
        let lock = CreationLock::open(&path).expect("open lock");
        assert!(lock.path().exists());
        assert_eq!(lock.with_lock(|| Ok(7)).expect("locked"), 7);
    }
}
