//! The on-disk working copy of the tracked upstream.
//!
//! `RepositoryMirror` is the only component that mutates the local path.
//! An update either lands completely (a new fingerprint is observable), leaves
//! the mirror exactly as it was (recoverable pull failure), or discards and
//! rebuilds it from scratch (reclone). The mirror is never repaired in place.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::git::{GitCli, GitError, head_commit, open_repository, origin_url};
use super::lock::{DEFAULT_LOCK_TIMEOUT, MirrorLock};
use crate::types::Fingerprint;

/// Default deadline for clone and pull.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Substrings of git's stderr that mean the working copy cannot be fixed by
/// another pull. Matched case-insensitively.
const FATAL_SIGNATURES: &[&str] = &[
    "not a git repository",
    "not possible to fast-forward",
    "refusing to merge unrelated histories",
    "have diverged",
    "diverging branches",
    "would be overwritten",
    "corrupt",
    "bad object",
    "broken link",
    "loose object",
    "unable to read tree",
    "invalid sha1 pointer",
    "did not send all necessary objects",
    "index file smaller than expected",
    "bad signature",
];

/// Errors returned by mirror operations.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Clone did not produce a valid working copy.
    #[error("clone failed: {0}")]
    CloneFailed(String),
    /// The path is not a usable working copy. Callers treat this as missing.
    #[error("validation failed for {path}: {reason}")]
    ValidationFailed { path: PathBuf, reason: String },
    /// The mirror has never been cloned.
    #[error("mirror at {0} has not been cloned")]
    NotCloned(PathBuf),
    /// The working copy has no commits on HEAD.
    #[error("mirror has no commits")]
    NoCommits,
    /// Reading local repository state failed.
    #[error("failed to read mirror state: {0}")]
    ReadFailed(String),
    /// Transient pull failure; the mirror is untouched.
    #[error("pull failed: {0}")]
    PullFailed(String),
    /// Pull hit a corruption or divergence signature; discard and clone.
    #[error("mirror needs reclone: {0}")]
    NeedsReclone(String),
    /// Another process holds the mirror lock.
    #[error("mirror lock acquisition failed: {0}")]
    LockFailed(String),
    /// Underlying IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Whether this error means "treat the mirror as absent".
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            MirrorError::ValidationFailed { .. } | MirrorError::NotCloned(_)
        )
    }
}

/// What `ensure` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorAction {
    Cloned,
    Pulled,
    Recloned,
    Unchanged,
}

impl MirrorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorAction::Cloned => "cloned",
            MirrorAction::Pulled => "pulled",
            MirrorAction::Recloned => "recloned",
            MirrorAction::Unchanged => "unchanged",
        }
    }

    /// Whether the local fingerprint moved.
    pub fn is_update(&self) -> bool {
        !matches!(self, MirrorAction::Unchanged)
    }
}

impl fmt::Display for MirrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fingerprints observed around a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    pub before: Fingerprint,
    pub after: Fingerprint,
}

impl PullOutcome {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Whether a failed pull's stderr matches a known unrecoverable signature.
pub fn is_fatal_pull_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    FATAL_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Compare two remote addresses, ignoring a trailing slash, a `.git` suffix,
/// the case of the scheme and host, and scp-style vs https GitHub spellings.
/// Paths keep their case. Local paths that both exist are compared after
/// canonicalization.
pub fn urls_match(actual: &str, expected: &str) -> bool {
    let actual_path = Path::new(actual);
    let expected_path = Path::new(expected);
    if let (Ok(a), Ok(b)) = (actual_path.canonicalize(), expected_path.canonicalize()) {
        return a == b;
    }

    normalize_url(actual) == normalize_url(expected)
}

fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = match url.get(..15) {
        Some(prefix) if prefix.eq_ignore_ascii_case("git@github.com:") => {
            format!("https://github.com/{}", &url[15..])
        }
        _ => url.to_string(),
    };
    let url = url.trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);

    // scheme://[user@]host/path
    if let Some((scheme, rest)) = url.split_once("://") {
        let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
        return format!(
            "{}://{}{}",
            scheme.to_ascii_lowercase(),
            lowercase_host(authority),
            path
        );
    }

    // [user@]host:path, unless the part before the colon looks like a path
    // or a drive letter
    match url.split_once(':') {
        Some((authority, path)) if authority.len() > 1 && !authority.contains(['/', '\\']) => {
            format!("{}:{}", lowercase_host(authority), path)
        }
        _ => url.to_string(),
    }
}

fn lowercase_host(authority: &str) -> String {
    match authority.rsplit_once('@') {
        Some((user, host)) => format!("{}@{}", user, host.to_ascii_lowercase()),
        None => authority.to_ascii_lowercase(),
    }
}

/// The local working copy of one upstream branch.
#[derive(Debug, Clone)]
pub struct RepositoryMirror {
    source_url: String,
    local_path: PathBuf,
    branch: String,
    git: GitCli,
    git_timeout: Duration,
    lock_timeout: Duration,
}

impl RepositoryMirror {
    /// Create a mirror handle. Nothing touches the disk until an operation runs.
    pub fn new(
        source_url: impl Into<String>,
        local_path: impl Into<PathBuf>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            local_path: local_path.into(),
            branch: branch.into(),
            git: GitCli::new(),
            git_timeout: DEFAULT_GIT_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set the deadline applied to clone and pull.
    pub fn with_git_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = timeout;
        self
    }

    /// Set how long `ensure` waits for the cross-process lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Discard whatever is at the local path and perform a full clone.
    pub fn clone_fresh(&self) -> Result<Fingerprint, MirrorError> {
        let _lock = self.lock()?;
        self.clone_unlocked()
    }

    /// Confirm the path is a working copy of the configured upstream that can
    /// report its status.
    pub fn validate(&self) -> Result<(), MirrorError> {
        let invalid = |reason: String| MirrorError::ValidationFailed {
            path: self.local_path.clone(),
            reason,
        };

        if !self.local_path.exists() {
            return Err(invalid("path does not exist".into()));
        }

        let repo = open_repository(&self.local_path).map_err(|e| invalid(e.to_string()))?;

        if repo.is_bare() {
            return Err(invalid("repository is bare".into()));
        }

        repo.statuses(None)
            .map_err(|e| invalid(format!("cannot read status: {}", e)))?;

        match origin_url(&repo) {
            Ok(Some(url)) if urls_match(&url, &self.source_url) => Ok(()),
            Ok(Some(url)) => Err(invalid(format!(
                "origin points at {} instead of {}",
                url, self.source_url
            ))),
            Ok(None) => Err(invalid("no origin remote".into())),
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    /// Fingerprint of the commit HEAD points at.
    pub fn local_fingerprint(&self) -> Result<Fingerprint, MirrorError> {
        if !self.local_path.exists() {
            return Err(MirrorError::NotCloned(self.local_path.clone()));
        }

        let repo = open_repository(&self.local_path).map_err(|e| match e {
            GitError::NotFound(_) => MirrorError::NotCloned(self.local_path.clone()),
            other => MirrorError::ReadFailed(other.to_string()),
        })?;

        match head_commit(&repo) {
            Ok(Some(oid)) => Ok(Fingerprint::from(oid)),
            Ok(None) => Err(MirrorError::NoCommits),
            Err(e) => Err(MirrorError::ReadFailed(e.to_string())),
        }
    }

    /// Fetch and fast-forward the tracked branch.
    ///
    /// A pull that changes nothing is not an error; check
    /// [`PullOutcome::changed`].
    pub fn pull(&self) -> Result<PullOutcome, MirrorError> {
        let _lock = self.lock()?;
        self.pull_unlocked()
    }

    /// Bring the mirror up to date by whatever means necessary.
    ///
    /// Missing or invalid → clone. Otherwise pull, and on an unrecoverable
    /// pull failure discard and clone fresh. Recoverable pull failures are
    /// returned as-is with the mirror untouched.
    pub fn ensure(&self) -> Result<MirrorAction, MirrorError> {
        let _lock = self.lock()?;

        if !self.local_path.exists() {
            log::info!("Mirror missing at {}, cloning", self.local_path.display());
            self.clone_unlocked()?;
            return Ok(MirrorAction::Cloned);
        }

        if let Err(err) = self.validate() {
            log::warn!("{}; discarding and cloning", err);
            self.clone_unlocked()?;
            return Ok(MirrorAction::Cloned);
        }

        match self.pull_unlocked() {
            Ok(outcome) if outcome.changed() => {
                log::info!(
                    "Pulled {}: {} -> {}",
                    self.branch,
                    outcome.before.short(),
                    outcome.after.short()
                );
                Ok(MirrorAction::Pulled)
            }
            Ok(outcome) => {
                log::debug!("Pull left {} at {}", self.branch, outcome.after.short());
                Ok(MirrorAction::Unchanged)
            }
            Err(MirrorError::NeedsReclone(reason)) => {
                log::warn!("Pull failed fatally ({}), recloning", reason);
                self.clone_unlocked()?;
                Ok(MirrorAction::Recloned)
            }
            Err(err) => Err(err),
        }
    }

    fn lock(&self) -> Result<MirrorLock, MirrorError> {
        MirrorLock::acquire(&self.local_path, self.lock_timeout)
            .map_err(|e| MirrorError::LockFailed(e.to_string()))
    }

    fn clone_unlocked(&self) -> Result<Fingerprint, MirrorError> {
        if self.local_path.exists() {
            remove_path(&self.local_path).map_err(|e| {
                MirrorError::CloneFailed(format!(
                    "cannot remove existing {}: {}",
                    self.local_path.display(),
                    e
                ))
            })?;
        }

        self.git
            .clone(
                &self.source_url,
                &self.local_path,
                &self.branch,
                self.git_timeout,
            )
            .map_err(|e| MirrorError::CloneFailed(e.to_string()))?;

        self.validate().map_err(|e| {
            MirrorError::CloneFailed(format!("cloned repository is unusable: {}", e))
        })?;

        let fingerprint = self.local_fingerprint().map_err(|e| {
            MirrorError::CloneFailed(format!("cloned repository has no readable HEAD: {}", e))
        })?;

        log::info!(
            "Cloned {} ({}) into {} at {}",
            self.source_url,
            self.branch,
            self.local_path.display(),
            fingerprint.short()
        );

        Ok(fingerprint)
    }

    fn pull_unlocked(&self) -> Result<PullOutcome, MirrorError> {
        if let Err(err) = self.validate() {
            return Err(MirrorError::NeedsReclone(err.to_string()));
        }

        let before = match self.local_fingerprint() {
            Ok(fp) => fp,
            Err(MirrorError::NoCommits) => {
                return Err(MirrorError::NeedsReclone("mirror has no commits".into()));
            }
            Err(err) => return Err(err),
        };

        match self
            .git
            .pull_ff_only(&self.local_path, &self.branch, self.git_timeout)
        {
            Ok(()) => {}
            Err(GitError::PullError(stderr)) if is_fatal_pull_error(&stderr) => {
                return Err(MirrorError::NeedsReclone(stderr));
            }
            Err(err) => return Err(MirrorError::PullFailed(err.to_string())),
        }

        let after = self.local_fingerprint()?;
        Ok(PullOutcome { before, after })
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
