//! Settings loaded once at startup from `config.toml` plus command-line
//! overrides.
//!
//! Example:
//! ```toml
//! source_url = "https://github.com/example/docs.git"
//! local_path = "/srv/mirrors/docs"
//! branch = "main"
//! check_interval_secs = 3600
//! staleness_ceiling_secs = 86400
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::daemon::{DEFAULT_CHECK_INTERVAL, DEFAULT_RETENTION, DEFAULT_STALENESS_CEILING};
use crate::mirror::{
    DEFAULT_GIT_TIMEOUT, DEFAULT_PROBE_TIMEOUT, validate_git_ref, validate_source_url,
};
use crate::paths::StatePaths;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Mirror and scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub source_url: String,
    pub local_path: Option<PathBuf>,
    pub branch: String,
    pub check_interval_secs: u64,
    pub staleness_ceiling_secs: u64,
    pub probe_timeout_secs: u64,
    /// Bounds clone and pull.
    pub git_timeout_secs: u64,
    pub checkpoint_path: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
    pub history_retention: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            local_path: None,
            branch: "main".to_string(),
            check_interval_secs: DEFAULT_CHECK_INTERVAL.as_secs(),
            staleness_ceiling_secs: DEFAULT_STALENESS_CEILING.as_secs(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            git_timeout_secs: DEFAULT_GIT_TIMEOUT.as_secs(),
            checkpoint_path: None,
            history_path: None,
            history_retention: DEFAULT_RETENTION,
        }
    }
}

/// Values given on the command line; each one that is set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source_url: Option<String>,
    pub local_path: Option<PathBuf>,
    pub branch: Option<String>,
}

impl Config {
    /// Parse a config file. A missing file yields defaults unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !required => {
                log::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.source_url {
            self.source_url = url;
        }
        if let Some(path) = overrides.local_path {
            self.local_path = Some(path);
        }
        if let Some(branch) = overrides.branch {
            self.branch = branch;
        }
    }

    /// Reject settings the mirror cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_source_url(&self.source_url).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        validate_git_ref(&self.branch, "branch").map_err(|e| ConfigError::Invalid(e.to_string()))?;

        match &self.local_path {
            None => return Err(ConfigError::Invalid("local_path is required".into())),
            Some(p) if p.as_os_str().is_empty() => {
                return Err(ConfigError::Invalid("local_path cannot be empty".into()));
            }
            Some(_) => {}
        }

        for (name, value) in [
            ("check_interval_secs", self.check_interval_secs),
            ("staleness_ceiling_secs", self.staleness_ceiling_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("git_timeout_secs", self.git_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.history_retention == 0 {
            return Err(ConfigError::Invalid(
                "history_retention must be positive".into(),
            ));
        }

        if self.staleness_ceiling_secs < self.check_interval_secs {
            log::warn!(
                "staleness ceiling ({}s) is shorter than the check interval ({}s); \
                 every tick will probe the remote",
                self.staleness_ceiling_secs,
                self.check_interval_secs
            );
        }

        Ok(())
    }

    /// Mirror location. Only meaningful after `validate` succeeded.
    pub fn local_path(&self) -> &Path {
        self.local_path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn staleness_ceiling(&self) -> Duration {
        Duration::from_secs(self.staleness_ceiling_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn checkpoint_path(&self, paths: &StatePaths) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| paths.checkpoint())
    }

    pub fn history_path(&self, paths: &StatePaths) -> PathBuf {
        self.history_path.clone().unwrap_or_else(|| paths.history())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn valid() -> Config {
        Config {
            source_url: "https://github.com/example/docs.git".into(),
            local_path: Some(PathBuf::from("/srv/docs")),
            ..Config::default()
        }
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.branch, "main");
        assert_eq!(config.check_interval(), Duration::from_secs(3600));
        assert_eq!(config.staleness_ceiling(), Duration::from_secs(86400));
        assert_eq!(config.probe_timeout(), Duration::from_secs(30));
        assert_eq!(config.history_retention, 500);
    }

    #[test]
    fn parse_fills_missing_fields_with_defaults() {
        let config = Config::parse(
            r#"
            source_url = "git@github.com:example/docs.git"
            local_path = "/srv/docs"
            staleness_ceiling_secs = 7200
            "#,
        )
        .unwrap();

        assert_eq!(config.source_url, "git@github.com:example/docs.git");
        assert_eq!(config.local_path(), Path::new("/srv/docs"));
        assert_eq!(config.staleness_ceiling(), Duration::from_secs(7200));
        assert_eq!(config.check_interval_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("sourceurl = \"x\"").is_err());
    }

    #[test]
    fn missing_optional_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml"), false).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Config::load(&dir.path().join("config.toml"), true).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "check_interval_secs = \"soon\"").unwrap();

        let err = Config::load(&path, false).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn overrides_win() {
        let mut config = valid();
        config.apply(Overrides {
            source_url: Some("https://example.com/other.git".into()),
            local_path: None,
            branch: Some("release".into()),
        });

        assert_eq!(config.source_url, "https://example.com/other.git");
        assert_eq!(config.local_path(), Path::new("/srv/docs"));
        assert_eq!(config.branch, "release");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = valid();
        config.source_url = String::new();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.source_url = "--upload-pack=evil".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.branch = "../main".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.local_path = None;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.check_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.history_retention = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_ceiling_is_allowed() {
        let mut config = valid();
        config.staleness_ceiling_secs = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn state_paths_default_from_layout() {
        let paths = StatePaths::new("/cfg/config.toml", "/data");
        let mut config = valid();
        assert_eq!(config.checkpoint_path(&paths), PathBuf::from("/data/last-check"));

        config.history_path = Some(PathBuf::from("/tmp/h.db"));
        assert_eq!(config.history_path(&paths), PathBuf::from("/tmp/h.db"));
    }
}
