//! Cheap lookup of the upstream tip without fetching any objects.

use std::time::Duration;

use thiserror::Error;

use super::git::{GitCli, GitError};
use crate::types::{Fingerprint, ParseError};

/// Deadline for a single `ls-remote`.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by the remote probe.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The remote did not answer within the deadline.
    #[error("remote probe timed out after {0:?}")]
    ProbeTimeout(Duration),
    /// The remote answered with nothing (unknown branch, empty repository).
    #[error("remote returned no reference for branch {0}")]
    NoResponse(String),
    /// The remote answered with something that is not a commit id.
    #[error("remote returned malformed fingerprint {value:?}: {source}")]
    MalformedFingerprint {
        value: String,
        #[source]
        source: ParseError,
    },
    /// git exited unsuccessfully (unreachable host, auth, bad url).
    #[error("remote probe failed: {0}")]
    CommandFailed(String),
}

impl From<GitError> for ProbeError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Timeout { timeout, .. } => ProbeError::ProbeTimeout(timeout),
            other => ProbeError::CommandFailed(other.to_string()),
        }
    }
}

/// Parse `ls-remote` output of the form `<fingerprint>\t<ref>`.
///
/// Only the first non-empty line is considered. The fingerprint token must be
/// well-formed; a malformed value is an error, never a "different" tip.
pub fn parse_ls_remote(output: &str, branch: &str) -> Result<Fingerprint, ProbeError> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ProbeError::NoResponse(branch.to_string()))?;

    let token = line.split_whitespace().next().unwrap_or_default();

    token
        .parse::<Fingerprint>()
        .map_err(|source| ProbeError::MalformedFingerprint {
            value: token.to_string(),
            source,
        })
}

/// Queries the upstream for the current tip of one branch.
#[derive(Debug, Clone)]
pub struct RemoteProbe {
    source_url: String,
    branch: String,
    timeout: Duration,
    git: GitCli,
}

impl RemoteProbe {
    pub fn new(source_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            branch: branch.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            git: GitCli::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current tip fingerprint of the tracked branch on the remote.
    pub fn remote_fingerprint(&self) -> Result<Fingerprint, ProbeError> {
        let stdout = self
            .git
            .ls_remote(&self.source_url, &self.branch, self.timeout)?;
        let fingerprint = parse_ls_remote(&stdout, &self.branch)?;
        log::debug!(
            "Remote {} {} is at {}",
            self.source_url,
            self.branch,
            fingerprint.short()
        );
        Ok(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{UpstreamRepo, git_available};
    use tempfile::tempdir;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn parses_single_line() {
        let out = format!("{}\trefs/heads/main\n", SHA);
        assert_eq!(parse_ls_remote(&out, "main").unwrap().as_str(), SHA);
    }

    #[test]
    fn empty_output_is_no_response() {
        assert!(matches!(
            parse_ls_remote("", "main"),
            Err(ProbeError::NoResponse(b)) if b == "main"
        ));
        assert!(matches!(
            parse_ls_remote("\n  \n", "main"),
            Err(ProbeError::NoResponse(_))
        ));
    }

    #[test]
    fn short_token_is_malformed() {
        let out = "abc123\trefs/heads/main\n";
        assert!(matches!(
            parse_ls_remote(out, "main"),
            Err(ProbeError::MalformedFingerprint { value, .. }) if value == "abc123"
        ));
    }

    #[test]
    fn non_hex_token_is_malformed() {
        let out = format!("{}z\trefs/heads/main\n", &SHA[..39]);
        assert!(matches!(
            parse_ls_remote(&out, "main"),
            Err(ProbeError::MalformedFingerprint { .. })
        ));
    }

    #[test]
    fn garbage_line_is_malformed() {
        assert!(matches!(
            parse_ls_remote("warning: redirecting to https://example.com\n", "main"),
            Err(ProbeError::MalformedFingerprint { .. })
        ));
    }

    #[test]
    fn timeout_maps_to_probe_timeout() {
        let err: ProbeError = GitError::Timeout {
            command: "ls-remote".into(),
            timeout: Duration::from_secs(30),
        }
        .into();
        assert!(matches!(err, ProbeError::ProbeTimeout(t) if t == Duration::from_secs(30)));
    }

    #[test]
    fn probes_local_upstream() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let upstream = UpstreamRepo::init(&dir.path().join("upstream"));

        let probe = RemoteProbe::new(upstream.url(), "main");
        assert_eq!(probe.remote_fingerprint().unwrap(), upstream.tip());

        let next = upstream.commit_file("b.txt", "b");
        assert_eq!(probe.remote_fingerprint().unwrap(), next);
    }

    #[test]
    fn unknown_branch_is_no_response() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let upstream = UpstreamRepo::init(&dir.path().join("upstream"));

        let probe = RemoteProbe::new(upstream.url(), "does-not-exist");
        assert!(matches!(
            probe.remote_fingerprint(),
            Err(ProbeError::NoResponse(_))
        ));
    }

    #[test]
    fn unreachable_upstream_is_command_failure() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let probe = RemoteProbe::new(dir.path().join("missing").display().to_string(), "main");
        assert!(matches!(
            probe.remote_fingerprint(),
            Err(ProbeError::CommandFailed(_))
        ));
    }
}
