//! Default filesystem layout
//!
//! ```text
//! <config_dir>/repomirror/config.toml   # optional settings file
//! <data_dir>/repomirror/
//! ├── last-check                         # checkpoint, epoch milliseconds
//! └── history.db                         # pass journal (SQLite)
//! ```

use std::path::{Path, PathBuf};

const APP_DIR: &str = "repomirror";

/// Locations of the config file and persisted scheduler state.
#[derive(Debug, Clone)]
pub struct StatePaths {
    config_file: PathBuf,
    data_dir: PathBuf,
}

impl StatePaths {
    pub fn new(config_file: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Platform defaults from `dirs`. `None` when the platform reports no
    /// home directory.
    pub fn platform_default() -> Option<Self> {
        let config = dirs::config_dir()?.join(APP_DIR).join("config.toml");
        let data = dirs::data_dir()?.join(APP_DIR);
        Some(Self::new(config, data))
    }

    /// Config file location
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Directory holding the checkpoint and history
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Default checkpoint: `{data_dir}/last-check`
    pub fn checkpoint(&self) -> PathBuf {
        self.data_dir.join("last-check")
    }

    /// Default history database: `{data_dir}/history.db`
    pub fn history(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }
}
