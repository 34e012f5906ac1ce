//! Durable checkpoint storage.
//!
//! A checkpoint lives at `<location>/<name>/`: snapshot images plus a
//! `config.json` metadata file. The lifecycle of an entry is
//!
//! 1. [`CheckpointStore::reserve`] atomically creates the directory,
//!    which fails if the name is taken;
//! 2. the runtime writes images into [`Reservation::dir`];
//! 3. [`CheckpointStore::commit`] publishes the metadata by renaming a
//!    fully written temporary file into place, or
//!    [`CheckpointStore::abort`] removes the directory.
//!
//! Readers only consider entries with a published `config.json`, so a
//! partially written checkpoint is never listed.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use stasis_common::constants::{CHECKPOINT_CONFIG_FILE, TEMP_FILE_PREFIX};
use stasis_common::error::{Result, StasisError};
use stasis_common::types::{CheckpointId, is_valid_checkpoint_id};

/// A reserved, not yet published checkpoint entry.
#[derive(Debug)]
#[must_use = "a reservation must be committed or aborted"]
pub struct Reservation {
    name: CheckpointId,
    dir: PathBuf,
}

impl Reservation {
    /// Directory the snapshot images are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoint being written.
    pub const fn name(&self) -> &CheckpointId {
        &self.name
    }
}

/// Key-value persistence for checkpoint entries.
///
/// Metadata is opaque bytes here; the agent owns its encoding.
pub trait CheckpointStore: Send + Sync {
    /// Creates the entry directory for `name` under `location`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the entry exists, an I/O error otherwise.
    fn reserve(&self, location: &Path, name: &CheckpointId) -> Result<Reservation>;

    /// Publishes `metadata`, making the entry visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be written; the entry is
    /// removed in that case.
    fn commit(&self, reservation: Reservation, metadata: &[u8]) -> Result<()>;

    /// Removes a reserved entry and everything written into it.
    fn abort(&self, reservation: Reservation);

    /// Reads the metadata of a published entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata exists but cannot be read.
    fn get(&self, location: &Path, name: &CheckpointId) -> Result<Option<Vec<u8>>>;

    /// Reads the metadata of every published entry under `location`,
    /// sorted by name. A missing location holds no entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be read.
    fn list(&self, location: &Path) -> Result<Vec<(String, Vec<u8>)>>;

    /// Removes an entry. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be removed.
    fn delete(&self, location: &Path, name: &CheckpointId) -> Result<bool>;

    /// Directory holding the images of an entry.
    fn entry_dir(&self, location: &Path, name: &CheckpointId) -> PathBuf;
}

/// Store backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCheckpointStore;

impl FsCheckpointStore {
    /// Creates the store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StasisError {
    StasisError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn reserve(&self, location: &Path, name: &CheckpointId) -> Result<Reservation> {
        std::fs::create_dir_all(location).map_err(|e| io_error(location, e))?;
        let dir = self.entry_dir(location, name);
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                return Err(StasisError::AlreadyExists {
                    kind: "checkpoint",
                    id: name.to_string(),
                });
            }
            Err(e) => return Err(io_error(&dir, e)),
        }
        tracing::debug!(dir = %dir.display(), "checkpoint entry reserved");
        Ok(Reservation {
            name: name.clone(),
            dir,
        })
    }

    fn commit(&self, reservation: Reservation, metadata: &[u8]) -> Result<()> {
        let tmp = reservation.dir.join(format!(
            "{TEMP_FILE_PREFIX}{CHECKPOINT_CONFIG_FILE}-{}",
            uuid::Uuid::new_v4()
        ));
        let target = reservation.dir.join(CHECKPOINT_CONFIG_FILE);
        let published = std::fs::write(&tmp, metadata)
            .map_err(|e| io_error(&tmp, e))
            .and_then(|()| std::fs::rename(&tmp, &target).map_err(|e| io_error(&target, e)));
        if let Err(e) = published {
            self.abort(reservation);
            return Err(e);
        }
        tracing::debug!(dir = %reservation.dir.display(), "checkpoint entry published");
        Ok(())
    }

    fn abort(&self, reservation: Reservation) {
        if let Err(e) = std::fs::remove_dir_all(&reservation.dir) {
            if e.kind() != IoErrorKind::NotFound {
                tracing::warn!(dir = %reservation.dir.display(), error = %e, "failed to remove checkpoint entry");
            }
        }
    }

    fn get(&self, location: &Path, name: &CheckpointId) -> Result<Option<Vec<u8>>> {
        let path = self.entry_dir(location, name).join(CHECKPOINT_CONFIG_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn list(&self, location: &Path) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = match std::fs::read_dir(location) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(location, e)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(location, e))?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_valid_checkpoint_id(&name) {
                continue;
            }
            let config = entry.path().join(CHECKPOINT_CONFIG_FILE);
            match std::fs::read(&config) {
                Ok(bytes) => found.push((name, bytes)),
                Err(e) if e.kind() == IoErrorKind::NotFound => {
                    tracing::debug!(entry = %entry.path().display(), "skipping unpublished checkpoint entry");
                }
                Err(e) => return Err(io_error(&config, e)),
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    fn delete(&self, location: &Path, name: &CheckpointId) -> Result<bool> {
        let dir = self.entry_dir(location, name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    fn entry_dir(&self, location: &Path, name: &CheckpointId) -> PathBuf {
        location.join(name.as_str())
    }
}

/// Total size of the regular files below `path`.
pub fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(std::result::Result::ok)
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => dir_size(&entry.path()),
            Ok(t) if t.is_file() => entry.metadata().map_or(0, |m| m.len()),
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use stasis_common::error::ErrorKind;

    use super::*;

    fn id(name: &str) -> CheckpointId {
        CheckpointId::parse(name).unwrap()
    }

    #[test]
    fn committed_entry_is_listed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new();
        let reservation = store.reserve(tmp.path(), &id("snap-1")).unwrap();
        std::fs::write(reservation.dir().join("pages.img"), b"data").unwrap();
        store.commit(reservation, b"{\"n\":1}").unwrap();

        let entries = store.list(tmp.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "snap-1");
        assert_eq!(entries[0].1, b"{\"n\":1}");
        assert!(tmp.path().join("snap-1/config.json").exists());
    }

    #[test]
    fn reserved_entry_is_invisible_until_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new();
        let reservation = store.reserve(tmp.path(), &id("snap-1")).unwrap();
        assert!(store.list(tmp.path()).unwrap().is_empty());
        assert!(store.get(tmp.path(), &id("snap-1")).unwrap().is_none());
        store.commit(reservation, b"{}").unwrap();
        assert!(store.get(tmp.path(), &id("snap-1")).unwrap().is_some());
    }

    #[test]
    fn duplicate_reservation_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new();
        let first = store.reserve(tmp.path(), &id("snap-1")).unwrap();
        let err = store.reserve(tmp.path(), &id("snap-1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        store.abort(first);
    }

    #[test]
    fn abort_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new();
        let reservation = store.reserve(tmp.path(), &id("snap-1")).unwrap();
        std::fs::write(reservation.dir().join("partial.img"), b"x").unwrap();
        store.abort(reservation);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn list_skips_files_and_foreign_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new();
        std::fs::write(tmp.path().join("stray.txt"), b"x").unwrap();
        std::fs::create_dir(tmp.path().join(".hidden")).unwrap();
        std::fs::write(tmp.path().join(".hidden/config.json"), b"{}").unwrap();
        let reservation = store.reserve(tmp.path(), &id("b")).unwrap();
        store.commit(reservation, b"{}").unwrap();
        let reservation = store.reserve(tmp.path(), &id("a")).unwrap();
        store.commit(reservation, b"{}").unwrap();

        let names: Vec<String> = store
            .list(tmp.path())
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn missing_location_lists_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new();
        assert!(store.list(&tmp.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_subtree_and_tolerates_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new();
        let reservation = store.reserve(tmp.path(), &id("snap-1")).unwrap();
        std::fs::create_dir(reservation.dir().join("nested")).unwrap();
        store.commit(reservation, b"{}").unwrap();

        assert!(store.delete(tmp.path(), &id("snap-1")).unwrap());
        assert!(!tmp.path().join("snap-1").exists());
        assert!(!store.delete(tmp.path(), &id("snap-1")).unwrap());
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a"), [0u8; 10]).unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/b"), [0u8; 5]).unwrap();
        assert_eq!(dir_size(tmp.path()), 15);
    }
}
