// Store-level exclusive lock
// One writer per store file. Acquisition never blocks; the lock is released on drop.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use crate::constants::LOCK_FILE_SUFFIX;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("store {path} is locked by {holder}")]
    AlreadyLocked { path: String, holder: String },

    #[error("failed to create lock file: {0}")]
    CreateFailed(String),

    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    #[error("lock i/o error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Exclusive lock guarding one store. Dropping the guard releases it.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    file: Option<File>,
}

impl StoreLock {
    /// Lock the store at `store_path` by locking `<store_path>.lock`.
    /// Fails immediately with `AlreadyLocked` if another holder exists.
    pub fn acquire(store_path: &Path) -> Result<Self, LockError> {
        let path = lock_path_for(store_path);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e)))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                let mut holder = String::new();
                let _ = file.read_to_string(&mut holder);
                let holder = if holder.trim().is_empty() { "another process".to_string() } else { holder.trim().to_string() };
                return Err(LockError::AlreadyLocked {
                    path: store_path.display().to_string(),
                    holder,
                });
            }
            return Err(LockError::AcquireFailed(e.to_string()));
        }

        // Record who holds the lock so a refused caller can report it
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", holder_id())?;
        file.flush()?;

        log::debug!("Locked store {}", store_path.display());
        Ok(Self { path, file: Some(file) })
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.set_len(0);
            let _ = FileExt::unlock(&file);
        }
    }
}

/// Lock file path for a store: the store file name with `.lock` appended.
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(LOCK_FILE_SUFFIX);
    store_path.with_file_name(name)
}

/// host:pid of the current process
fn holder_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_appends_suffix() {
        let p = lock_path_for(Path::new("/data/site.ddb"));
        assert_eq!(p, PathBuf::from("/data/site.ddb.lock"));
    }

    #[test]
    fn test_second_acquire_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("store.ddb");

        let first = StoreLock::acquire(&store).unwrap();
        assert!(first.is_held());

        match StoreLock::acquire(&store) {
            Err(LockError::AlreadyLocked { holder, .. }) => {
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("expected AlreadyLocked, got {:?}", other),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("store.ddb");

        {
            let _lock = StoreLock::acquire(&store).unwrap();
        }
        let again = StoreLock::acquire(&store).unwrap();
        assert!(again.is_held());
    }
}
