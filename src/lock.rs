//! File-based advisory locking.
//!
//! Two locks live in the store directory: `reconcile.lock` serializes route
//! table changes between every process on the host, and `daemon.lock` keeps
//! a second daemon from starting against the same store.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Holds an exclusive flock on a file; released when dropped
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Block until the exclusive lock on `path` is ours
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .map_err(|e| Error::persistence(path, e))?;
        debug!("Acquired lock {:?}", path);
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock without waiting; fails if another process holds it
    pub fn try_acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Config(format!(
                "another instance is already running (lock held on {})",
                path.display()
            ))
        })?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Open or create without truncating, so the lock and the file are the
/// same inode for every process
fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::persistence(path, e))?;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::persistence(path, e))?;

    Ok(file)
}
