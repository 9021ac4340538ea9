//! Staleness decision over the local and remote fingerprints.
//!
//! Nothing here mutates the mirror. [`evaluate`] reads the two fingerprints
//! through the [`LocalMirror`] and [`Upstream`] seams and [`decide`] turns the
//! reads into a [`SyncOutcome`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::mirror::{
    MirrorAction, MirrorError, ProbeError, RemoteProbe, RepositoryMirror, list_files,
};
use crate::types::Fingerprint;

/// Local side of a sync: the working copy.
pub trait LocalMirror: Send + Sync {
    fn local_path(&self) -> &Path;

    fn validate(&self) -> Result<(), MirrorError>;

    fn local_fingerprint(&self) -> Result<Fingerprint, MirrorError>;

    /// Clone, pull or reclone as needed.
    fn ensure(&self) -> Result<MirrorAction, MirrorError>;

    fn list_files(&self) -> Result<Vec<PathBuf>, MirrorError> {
        let root = self.local_path();
        if !root.exists() {
            return Err(MirrorError::NotCloned(root.to_path_buf()));
        }
        Ok(list_files(root)?)
    }
}

/// Remote side of a sync: something that can report the upstream tip.
pub trait Upstream: Send + Sync {
    fn remote_fingerprint(&self) -> Result<Fingerprint, ProbeError>;
}

impl LocalMirror for RepositoryMirror {
    fn local_path(&self) -> &Path {
        RepositoryMirror::local_path(self)
    }

    fn validate(&self) -> Result<(), MirrorError> {
        RepositoryMirror::validate(self)
    }

    fn local_fingerprint(&self) -> Result<Fingerprint, MirrorError> {
        RepositoryMirror::local_fingerprint(self)
    }

    fn ensure(&self) -> Result<MirrorAction, MirrorError> {
        RepositoryMirror::ensure(self)
    }
}

impl Upstream for RemoteProbe {
    fn remote_fingerprint(&self) -> Result<Fingerprint, ProbeError> {
        RemoteProbe::remote_fingerprint(self)
    }
}

/// Classification of the mirror relative to its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    RepositoryMissing,
    Stale,
    Current,
    ProbeFailed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::RepositoryMissing => "repository_missing",
            SyncState::Stale => "stale",
            SyncState::Current => "current",
            SyncState::ProbeFailed => "probe_failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one decision pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub state: SyncState,
    pub local: Option<Fingerprint>,
    pub remote: Option<Fingerprint>,
    /// Why a fingerprint could not be read, for `repository_missing` and
    /// `probe_failed`.
    pub error: Option<String>,
}

impl SyncOutcome {
    /// Everything except `current` is treated as needing an update. For
    /// `probe_failed` that is the optimistic choice: retry rather than
    /// silently run stale.
    pub fn needs_update(&self) -> bool {
        self.state != SyncState::Current
    }
}

/// Classify two fingerprint reads.
pub fn decide(
    local: Result<Fingerprint, MirrorError>,
    remote: Result<Fingerprint, ProbeError>,
) -> SyncOutcome {
    let local = match local {
        Ok(fp) => fp,
        Err(err) if err.is_missing() => {
            return SyncOutcome {
                state: SyncState::RepositoryMissing,
                local: None,
                remote: remote.ok(),
                error: Some(err.to_string()),
            };
        }
        Err(err) => {
            return SyncOutcome {
                state: SyncState::ProbeFailed,
                local: None,
                remote: remote.ok(),
                error: Some(err.to_string()),
            };
        }
    };

    match remote {
        Ok(remote) => SyncOutcome {
            state: if local == remote {
                SyncState::Current
            } else {
                SyncState::Stale
            },
            local: Some(local),
            remote: Some(remote),
            error: None,
        },
        Err(err) => SyncOutcome {
            state: SyncState::ProbeFailed,
            local: Some(local),
            remote: None,
            error: Some(err.to_string()),
        },
    }
}

/// Read both fingerprints and classify.
///
/// A missing or invalid mirror short-circuits to `repository_missing`
/// without probing the remote.
pub fn evaluate<M, U>(mirror: &M, upstream: &U) -> SyncOutcome
where
    M: LocalMirror + ?Sized,
    U: Upstream + ?Sized,
{
    if let Err(err) = mirror.validate() {
        log::debug!("Mirror unusable: {}", err);
        return SyncOutcome {
            state: SyncState::RepositoryMissing,
            local: None,
            remote: None,
            error: Some(err.to_string()),
        };
    }

    let local = mirror.local_fingerprint();
    let remote = upstream.remote_fingerprint();
    let outcome = decide(local, remote);
    log::debug!(
        "Sync decision: {} (local {:?}, remote {:?})",
        outcome.state,
        outcome.local.as_ref().map(Fingerprint::short),
        outcome.remote.as_ref().map(Fingerprint::short)
    );
    outcome
}
