//! On-disk state: the cached feed, the selection list and the custom ranges.
//!
//! Everything lives in one directory:
//!
//! - `ip-ranges.json` - last successfully parsed feed; its mtime is the
//!   `If-Modified-Since` validator for the next fetch
//! - `selections.json` - JSON array of `region:service` strings
//! - `customs.json` - JSON array of CIDR strings
//! - `reconcile.lock` - advisory lock serializing route changes on the host
//! - `daemon.lock` - held by the running daemon
//!
//! JSON files are written atomically (tempfile + rename). A missing file
//! means "nothing saved yet", never an error.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};
use crate::prefixes::Selector;
use crate::routes::CustomRange;

const FEED_FILE: &str = "ip-ranges.json";
const SELECTIONS_FILE: &str = "selections.json";
const CUSTOMS_FILE: &str = "customs.json";
const LOCK_FILE: &str = "reconcile.lock";
const DAEMON_LOCK_FILE: &str = "daemon.lock";

#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the store directory if needed and check it is writable
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::persistence(&self.dir, e))?;
        NamedTempFile::new_in(&self.dir).map_err(|e| Error::persistence(&self.dir, e))?;
        Ok(())
    }

    pub fn feed_path(&self) -> PathBuf {
        self.dir.join(FEED_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn daemon_lock_path(&self) -> PathBuf {
        self.dir.join(DAEMON_LOCK_FILE)
    }

    /// Modification time of the cached feed, if one exists
    pub fn feed_modified(&self) -> Option<SystemTime> {
        fs::metadata(self.feed_path()).and_then(|m| m.modified()).ok()
    }

    pub fn open_feed(&self) -> Result<File> {
        let path = self.feed_path();
        File::open(&path).map_err(|e| Error::persistence(path, e))
    }

    /// Temporary file in the store directory for an in-progress download
    pub fn feed_staging(&self) -> Result<NamedTempFile> {
        NamedTempFile::new_in(&self.dir).map_err(|e| Error::persistence(&self.dir, e))
    }

    /// Replace the cached feed with a completed download
    pub fn commit_feed(&self, staged: NamedTempFile) -> Result<()> {
        let path = self.feed_path();
        staged
            .as_file()
            .sync_all()
            .map_err(|e| Error::persistence(&path, e))?;
        staged
            .persist(&path)
            .map_err(|e| Error::persistence(&path, e.error))?;
        Ok(())
    }

    /// Remove the cached feed so the next fetch is unconditional
    pub fn discard_feed(&self) -> Result<()> {
        let path = self.feed_path();
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Discarded cached feed {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::persistence(path, e)),
        }
    }

    pub fn load_selections(&self) -> Result<Vec<Selector>> {
        self.load_json(SELECTIONS_FILE)
    }

    pub fn save_selections(&self, selections: &[Selector]) -> Result<()> {
        self.save_json(SELECTIONS_FILE, selections)
    }

    pub fn load_customs(&self) -> Result<Vec<CustomRange>> {
        self.load_json(CUSTOMS_FILE)
    }

    pub fn save_customs(&self, customs: &[CustomRange]) -> Result<()> {
        self.save_json(CUSTOMS_FILE, customs)
    }

    fn load_json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(Error::persistence(path, e)),
        };
        serde_json::from_slice(&content).map_err(|e| Error::CorruptState {
            path,
            message: e.to_string(),
        })
    }

    fn save_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        fs::create_dir_all(&self.dir).map_err(|e| Error::persistence(&self.dir, e))?;

        let content = serde_json::to_vec_pretty(value).map_err(|e| Error::CorruptState {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let mut temp_file =
            NamedTempFile::new_in(&self.dir).map_err(|e| Error::persistence(&self.dir, e))?;
        temp_file
            .write_all(&content)
            .and_then(|_| temp_file.as_file().sync_all())
            .map_err(|e| Error::persistence(&path, e))?;
        temp_file
            .persist(&path)
            .map_err(|e| Error::persistence(&path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_missing_files_are_empty() {
        let (_dir, store) = store();
        assert!(store.load_selections().unwrap().is_empty());
        assert!(store.load_customs().unwrap().is_empty());
        assert!(store.feed_modified().is_none());
    }

    #[test]
    fn test_selections_roundtrip() {
        let (_dir, store) = store();
        let selections: Vec<Selector> =
            vec!["us-east-1:*".parse().unwrap(), "*:EC2".parse().unwrap()];
        store.save_selections(&selections).unwrap();
        assert_eq!(store.load_selections().unwrap(), selections);
    }

    #[test]
    fn test_customs_roundtrip() {
        let (_dir, store) = store();
        let customs: Vec<CustomRange> = vec!["10.10.10.0/24".parse().unwrap()];
        store.save_customs(&customs).unwrap();
        assert_eq!(store.load_customs().unwrap(), customs);

        let raw = fs::read_to_string(store.dir().join(CUSTOMS_FILE)).unwrap();
        assert!(raw.contains("\"10.10.10.0/24\""));
    }

    #[test]
    fn test_corrupt_selections_reported() {
        let (_dir, store) = store();
        fs::write(store.dir().join(SELECTIONS_FILE), b"[\"no-colon\"]").unwrap();
        assert!(matches!(
            store.load_selections(),
            Err(Error::CorruptState { .. })
        ));
    }

    #[test]
    fn test_save_creates_directory() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("nested").join("state"));
        store.save_customs(&[]).unwrap();
        assert!(store.load_customs().unwrap().is_empty());
    }

    #[test]
    fn test_commit_and_discard_feed() {
        let (_dir, store) = store();
        store.ensure_dir().unwrap();

        let mut staged = store.feed_staging().unwrap();
        staged.write_all(b"{\"prefixes\":[]}").unwrap();
        store.commit_feed(staged).unwrap();

        assert!(store.feed_modified().is_some());
        assert!(store.open_feed().is_ok());

        store.discard_feed().unwrap();
        assert!(store.feed_modified().is_none());
        // Discarding twice is fine
        store.discard_feed().unwrap();
    }

    #[test]
    fn test_open_missing_feed_is_persistence_error() {
        let (_dir, store) = store();
        assert!(matches!(
            store.open_feed(),
            Err(Error::Persistence { .. })
        ));
    }
}
