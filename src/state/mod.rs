// sitevault/src/state/mod.rs
//
// Small key-value store for process-wide records (the "latest backup"
// manifest, the jobs queue). One record per key, written atomically:
// serialize to a temp file in the same directory, then rename over the
// final path. A reader either sees the old record or the new one, never
// a partial write.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LATEST_BACKUP_KEY: &str = "latest-backup";

/// Manifest metadata of the most recent successful capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestBackup {
    pub filepath: PathBuf,
    pub save: bool,
    pub dryrun: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        Ok(StateStore {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Reads a record. A missing or unparseable record reads as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.record_path(key);
        let contents = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Replaces the whole record for `key` atomically.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.record_path(key);
        let serialized = serde_json::to_string_pretty(value)
            .with_context(|| format!("Failed to serialize state record '{}'", key))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temp file in {}", self.dir.display()))?;
        tmp.write_all(serialized.as_bytes())
            .with_context(|| format!("Failed to write state record '{}'", key))?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to persist state record to {}", path.display()))?;

        Ok(())
    }

    /// Removes a record. Missing records are not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to delete state record '{}'", key))
            }
        }
    }

    pub fn latest_backup(&self) -> Option<LatestBackup> {
        self.get(LATEST_BACKUP_KEY)
    }

    pub fn set_latest_backup(&self, record: &LatestBackup) -> Result<()> {
        self.put(LATEST_BACKUP_KEY, record)
    }
}

/// Single-flight guard backed by a create-new lock file. Holding the
/// guard means this process owns the named operation; the file is
/// removed when the guard drops.
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Takes the lock, or returns `Locked` if another invocation holds it.
    pub fn acquire(dir: &Path, name: &str) -> crate::errors::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(LockFile { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(crate::errors::AppError::Locked(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_latest_backup_round_trip() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = StateStore::new(dir.path())?;

        assert!(store.latest_backup().is_none());

        let record = LatestBackup {
            filepath: PathBuf::from("/var/backups/site/backup-example.com-1.tar.gz"),
            save: true,
            dryrun: false,
            timestamp: Utc::now(),
        };
        store.set_latest_backup(&record)?;

        assert_eq!(store.latest_backup(), Some(record.clone()));

        // Overwrite replaces the whole record.
        let newer = LatestBackup {
            filepath: PathBuf::from("/var/backups/site/backup-example.com-2.tar.gz"),
            ..record
        };
        store.set_latest_backup(&newer)?;
        assert_eq!(store.latest_backup(), Some(newer));
        Ok(())
    }

    #[test]
    fn test_write_is_rename_based() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = StateStore::new(dir.path())?;

        store.put("jobs", &vec!["a", "b"])?;

        // The only surviving file for the key is the final record; no
        // temp file is left behind after persist.
        let entries: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["jobs.json".to_string()]);

        let read: Option<Vec<String>> = store.get("jobs");
        assert_eq!(read, Some(vec!["a".to_string(), "b".to_string()]));
        Ok(())
    }

    #[test]
    fn test_lock_file_is_exclusive_and_released_on_drop() -> anyhow::Result<()> {
        let dir = TempDir::new()?;

        let lock = LockFile::acquire(dir.path(), "capture.lock")?;
        assert!(matches!(
            LockFile::acquire(dir.path(), "capture.lock"),
            Err(crate::errors::AppError::Locked(_))
        ));

        drop(lock);
        let relock = LockFile::acquire(dir.path(), "capture.lock");
        assert!(relock.is_ok());
        Ok(())
    }

    #[test]
    fn test_corrupt_record_reads_as_none() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = StateStore::new(dir.path())?;

        std::fs::write(dir.path().join("latest-backup.json"), "{not json")?;
        assert!(store.latest_backup().is_none());

        store.delete(LATEST_BACKUP_KEY)?;
        store.delete("never-existed")?;
        Ok(())
    }
}
