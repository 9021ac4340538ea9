use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mirror::MirrorAction;
use crate::sync::SyncState;
use crate::types::Fingerprint;

/// Why a pass ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The staleness ceiling has not elapsed; nothing was probed.
    WithinWindow,
    /// Another pass was in flight.
    AlreadyRunning,
    /// Local and remote fingerprints matched.
    NoUpdates,
    Cloned,
    Pulled,
    Recloned,
    /// A pull ran but the fingerprint did not move.
    Unchanged,
    Error,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::WithinWindow => "within_window",
            Reason::AlreadyRunning => "already_running",
            Reason::NoUpdates => "no_updates",
            Reason::Cloned => "cloned",
            Reason::Pulled => "pulled",
            Reason::Recloned => "recloned",
            Reason::Unchanged => "unchanged",
            Reason::Error => "error",
        }
    }

    /// Gate rejections never reach the mirror or the remote.
    pub fn is_skip(&self) -> bool {
        matches!(self, Reason::WithinWindow | Reason::AlreadyRunning)
    }
}

impl From<MirrorAction> for Reason {
    fn from(action: MirrorAction) -> Self {
        match action {
            MirrorAction::Cloned => Reason::Cloned,
            MirrorAction::Pulled => Reason::Pulled,
            MirrorAction::Recloned => Reason::Recloned,
            MirrorAction::Unchanged => Reason::Unchanged,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one `check_for_updates` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// True when the mirror content changed (clone, pull or reclone).
    pub pulled: bool,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SyncState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn skipped(reason: Reason) -> Self {
        Self {
            pulled: false,
            reason,
            state: None,
            local: None,
            remote: None,
            error: None,
        }
    }

    pub fn failed(state: Option<SyncState>, error: impl Into<String>) -> Self {
        Self {
            pulled: false,
            reason: Reason::Error,
            state,
            local: None,
            remote: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    pub local_path: String,
    pub is_checking: bool,
    pub uptime_secs: u64,
    /// Epoch milliseconds of the last completed pass.
    pub last_checkpoint: Option<u64>,
    /// Epoch milliseconds at which the staleness ceiling next elapses.
    /// `None` when no pass has ever completed, meaning a check is due now.
    pub next_check_due: Option<u64>,
    pub version: String,
}

/// Counters and derived rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsResult {
    pub successful_updates: u64,
    pub errors: u64,
    pub uptime_secs: u64,
    pub success_rate: f64,
    pub updates_per_hour: f64,
    pub last_checkpoint: Option<u64>,
}

/// Flat listing of the mirror's visible files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesResult {
    pub root: String,
    pub files: Vec<String>,
}

/// Wire shape of every user-visible result: a success flag plus either data
/// or a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

impl Envelope<CheckResult> {
    /// A failed pass still carries its result so callers can see the
    /// fingerprints that were read before the failure.
    pub fn from_check(result: CheckResult) -> Self {
        match result.error.clone() {
            Some(message) => Self {
                success: false,
                data: Some(result),
                message: Some(message),
            },
            None => Self::ok(result),
        }
    }
}
