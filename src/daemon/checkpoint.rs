//! Persisted timestamp of the last completed synchronization pass.
//!
//! Stored as a plain-text epoch-millisecond integer. A missing or
//! unparseable file means "never checked".

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Errors returned when writing a checkpoint.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reads and writes the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last checkpoint. Absent, unreadable, and garbage all yield
    /// `None`.
    pub fn load(&self) -> Option<u64> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!(
                    "Cannot read checkpoint {}: {}; treating as never checked",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        match contents.trim().parse::<u64>() {
            Ok(ts) => Some(ts),
            Err(_) => {
                log::warn!(
                    "Ignoring unparseable checkpoint {:?} in {}",
                    contents.trim(),
                    self.path.display()
                );
                None
            }
        }
    }

    /// Atomically replace the checkpoint with `ts`.
    ///
    /// Writes a temp sibling and renames it over the target so a crash never
    /// leaves a half-written value behind.
    pub fn store(&self, ts: u64) -> Result<(), CheckpointError> {
        self.write_atomic(ts).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn write_atomic(&self, ts: u64) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.temp_path();
        {
            let mut file = fs::File::create(&tmp_path)?;
            write!(file, "{}", ts)?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(format!(".tmp-{}", std::process::id()));
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_never_checked() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("last-check"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("state").join("last-check"));

        store.store(1_700_000_000_123).unwrap();
        assert_eq!(store.load(), Some(1_700_000_000_123));
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "1700000000123"
        );
    }

    #[test]
    fn whitespace_is_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("last-check");
        fs::write(&path, "  42\n").unwrap();

        assert_eq!(CheckpointStore::new(path).load(), Some(42));
    }

    #[test]
    fn garbage_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("last-check");
        let store = CheckpointStore::new(&path);

        for garbage in ["", "yesterday", "12abc", "-5", "1.5"] {
            fs::write(&path, garbage).unwrap();
            assert_eq!(store.load(), None, "{:?} should not parse", garbage);
        }
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("last-check"));

        store.store(1).unwrap();
        store.store(2).unwrap();

        assert_eq!(store.load(), Some(2));
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
