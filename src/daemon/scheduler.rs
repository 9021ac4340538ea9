//! Periodic and on-demand synchronization passes.
//!
//! [`UpdateScheduler`] owns the collaborators and the policy (staleness
//! ceiling, checkpoint, history). The mutable side lives in
//! [`SchedulerState`], which the caller owns and lends to every pass.
//! [`SchedulerHandle`] runs the timer loop on its own thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, select};

use crate::daemon::checkpoint::{CheckpointStore, now_millis};
use crate::daemon::history::{History, PassRecord};
use crate::daemon::stats::SchedulerStatistics;
use crate::mirror::MirrorError;
use crate::protocol::{CheckResult, FilesResult, Reason, StatisticsResult, StatusResult};
use crate::sync::{LocalMirror, SyncOutcome, SyncState, Upstream, evaluate};

/// Maximum age of the last pass before a non-forced check probes again.
pub const DEFAULT_STALENESS_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the timer wakes to evaluate the ceiling.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Mutable scheduler state: single-pass guard, checkpoint and counters.
#[derive(Debug)]
pub struct SchedulerState {
    pass_lock: Mutex<()>,
    checking: AtomicBool,
    last_checkpoint: Mutex<Option<u64>>,
    stats: SchedulerStatistics,
}

impl SchedulerState {
    pub fn new(last_checkpoint: Option<u64>) -> Self {
        Self {
            pass_lock: Mutex::new(()),
            checking: AtomicBool::new(false),
            last_checkpoint: Mutex::new(last_checkpoint),
            stats: SchedulerStatistics::new(),
        }
    }

    pub fn is_checking(&self) -> bool {
        self.checking.load(Ordering::SeqCst)
    }

    pub fn last_checkpoint(&self) -> Option<u64> {
        *self.last_checkpoint.lock().unwrap()
    }

    pub fn stats(&self) -> &SchedulerStatistics {
        &self.stats
    }

    fn set_checkpoint(&self, ts: u64) {
        *self.last_checkpoint.lock().unwrap() = Some(ts);
    }

    /// Block until no other pass runs. A panicked pass leaves nothing to
    /// repair, so poisoning is ignored.
    fn wait_for_pass(&self) -> MutexGuard<'_, ()> {
        self.pass_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_begin_pass(&self) -> Option<MutexGuard<'_, ()>> {
        match self.pass_lock.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        }
    }
}

/// Raises `checking` for as long as it is alive.
struct CheckingFlag<'a>(&'a AtomicBool);

impl<'a> CheckingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for CheckingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates synchronization passes for one mirror.
pub struct UpdateScheduler<M, U> {
    mirror: M,
    upstream: U,
    checkpoints: CheckpointStore,
    history: Option<History>,
    ceiling: Duration,
}

impl<M: LocalMirror, U: Upstream> UpdateScheduler<M, U> {
    pub fn new(mirror: M, upstream: U, checkpoints: CheckpointStore) -> Self {
        Self {
            mirror,
            upstream,
            checkpoints,
            history: None,
            ceiling: DEFAULT_STALENESS_CEILING,
        }
    }

    pub fn with_staleness_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    pub fn staleness_ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Fresh state seeded from the persisted checkpoint.
    pub fn initial_state(&self) -> SchedulerState {
        let last = self.checkpoints.load();
        match last {
            Some(ts) => log::debug!("Loaded checkpoint {} from {}", ts, self.checkpoints.path().display()),
            None => log::debug!("No checkpoint at {}", self.checkpoints.path().display()),
        }
        SchedulerState::new(last)
    }

    /// Run one pass unless the single-pass guard or the time gate says
    /// otherwise.
    ///
    /// A non-forced call returns `already_running` if another pass is in
    /// flight, and `within_window` while the staleness ceiling has not
    /// elapsed. A forced call skips the gate and waits for any in-flight pass.
    pub fn check_for_updates(&self, state: &SchedulerState, force: bool) -> CheckResult {
        let _pass = if force {
            state.wait_for_pass()
        } else {
            let Some(guard) = state.try_begin_pass() else {
                log::debug!("Pass already in flight, skipping");
                return CheckResult::skipped(Reason::AlreadyRunning);
            };
            // Read under the guard so a pass that just finished is seen.
            if let Some(remaining) = self.remaining_window(state, now_millis()) {
                log::debug!(
                    "Within staleness window, next probe in {}s",
                    remaining.as_secs()
                );
                return CheckResult::skipped(Reason::WithinWindow);
            }
            guard
        };
        let _checking = CheckingFlag::raise(&state.checking);

        let started_at = now_millis();
        let result = self.run_pass(state);
        self.record_history(started_at, force, &result);

        match &result.error {
            Some(err) => log::warn!("Sync pass failed: {}", err),
            None => log::info!("Sync pass finished: {}", result.reason),
        }
        result
    }

    /// `check_for_updates` with the time gate bypassed.
    pub fn force_update(&self, state: &SchedulerState) -> CheckResult {
        self.check_for_updates(state, true)
    }

    /// Bootstrap: clone when the mirror is missing or invalid, otherwise run a
    /// normal gated pass.
    pub fn ensure_repository(&self, state: &SchedulerState) -> CheckResult {
        match self.mirror.validate() {
            Ok(()) => self.check_for_updates(state, false),
            Err(err) => {
                log::info!("Mirror unusable ({}), cloning", err);
                self.check_for_updates(state, true)
            }
        }
    }

    pub fn status(&self, state: &SchedulerState) -> StatusResult {
        let last = state.last_checkpoint();
        StatusResult {
            local_path: self.mirror.local_path().display().to_string(),
            is_checking: state.is_checking(),
            uptime_secs: state.stats().uptime().as_secs(),
            last_checkpoint: last,
            next_check_due: last.map(|ts| ts.saturating_add(self.ceiling.as_millis() as u64)),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn statistics(&self, state: &SchedulerState) -> StatisticsResult {
        let snap = state.stats().snapshot();
        StatisticsResult {
            successful_updates: snap.successful_updates,
            errors: snap.errors,
            uptime_secs: snap.uptime_secs,
            success_rate: snap.success_rate,
            updates_per_hour: snap.updates_per_hour,
            last_checkpoint: state.last_checkpoint(),
        }
    }

    pub fn list_files(&self) -> Result<FilesResult, MirrorError> {
        let files = self.mirror.list_files()?;
        Ok(FilesResult {
            root: self.mirror.local_path().display().to_string(),
            files: files.iter().map(|p| p.display().to_string()).collect(),
        })
    }

    /// Time left before the ceiling elapses, or `None` if a probe is due.
    fn remaining_window(&self, state: &SchedulerState, now: u64) -> Option<Duration> {
        let last = state.last_checkpoint()?;
        let Some(elapsed) = now.checked_sub(last) else {
            log::warn!("Checkpoint {} is in the future, treating as stale", last);
            return None;
        };
        let elapsed = Duration::from_millis(elapsed);
        self.ceiling.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    fn run_pass(&self, state: &SchedulerState) -> CheckResult {
        let outcome = evaluate(&self.mirror, &self.upstream);
        if outcome.needs_update() {
            return self.update(state, outcome);
        }

        self.commit_checkpoint(state);
        CheckResult {
            pulled: false,
            reason: Reason::NoUpdates,
            state: Some(outcome.state),
            local: outcome.local,
            remote: outcome.remote,
            error: None,
        }
    }

    /// Bring the mirror up to date.
    ///
    /// After a failed probe the mirror is still updated, but only a real
    /// change counts as success. A no-op leaves the probe error standing and
    /// the checkpoint where it was, so the next tick probes again.
    fn update(&self, state: &SchedulerState, outcome: SyncOutcome) -> CheckResult {
        log::info!(
            "Mirror is {}, updating {}",
            outcome.state,
            self.mirror.local_path().display()
        );

        let probe_error = match outcome.state {
            SyncState::ProbeFailed => outcome.error.clone(),
            _ => None,
        };

        let error = match (self.mirror.ensure(), probe_error) {
            (Ok(action), Some(probe_error)) if !action.is_update() => probe_error,
            (Ok(action), _) => {
                self.commit_checkpoint(state);
                if action.is_update() {
                    state.stats().record_update();
                }
                return CheckResult {
                    pulled: action.is_update(),
                    reason: action.into(),
                    state: Some(outcome.state),
                    local: self.mirror.local_fingerprint().ok(),
                    remote: outcome.remote,
                    error: None,
                };
            }
            (Err(err), Some(probe_error)) => format!("{}; update failed: {}", probe_error, err),
            (Err(err), None) => err.to_string(),
        };

        state.stats().record_error();
        CheckResult {
            local: outcome.local,
            remote: outcome.remote,
            ..CheckResult::failed(Some(outcome.state), error)
        }
    }

    /// Advance the checkpoint. A failed write keeps the in-memory value so
    /// this process still honors the ceiling.
    fn commit_checkpoint(&self, state: &SchedulerState) {
        let now = now_millis();
        state.set_checkpoint(now);
        if let Err(e) = self.checkpoints.store(now) {
            log::warn!("{}", e);
        }
    }

    fn record_history(&self, started_at: u64, forced: bool, result: &CheckResult) {
        let Some(history) = &self.history else {
            return;
        };

        let action = match result.reason {
            Reason::Cloned | Reason::Pulled | Reason::Recloned | Reason::Unchanged => {
                Some(result.reason.as_str().to_string())
            }
            _ => None,
        };
        let record = PassRecord {
            started_at,
            finished_at: now_millis(),
            forced,
            reason: result.reason.as_str().to_string(),
            action,
            local: result.local.as_ref().map(|fp| fp.to_string()),
            remote: result.remote.as_ref().map(|fp| fp.to_string()),
            error: result.error.clone(),
        };

        if let Err(e) = history.record(&record) {
            log::warn!("Failed to record pass history: {}", e);
        }
    }
}

/// Handle for the timer thread.
pub struct SchedulerHandle {
    thread: Option<JoinHandle<()>>,
    shutdown: Option<Sender<()>>,
}

impl SchedulerHandle {
    /// Spawn a thread that runs a non-forced pass every `interval` until
    /// shutdown.
    pub fn spawn<M, U>(
        scheduler: Arc<UpdateScheduler<M, U>>,
        state: Arc<SchedulerState>,
        interval: Duration,
    ) -> io::Result<Self>
    where
        M: LocalMirror + 'static,
        U: Upstream + 'static,
    {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("repomirror-scheduler".to_string())
            .spawn(move || {
                log::info!("Scheduler thread started, ticking every {:?}", interval);
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let result = scheduler.check_for_updates(&state, false);
                            if result.reason.is_skip() {
                                log::debug!("Scheduled check skipped: {}", result.reason);
                            }
                        }
                        recv(shutdown_rx) -> _ => {
                            log::info!("Scheduler shutting down");
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            thread: Some(thread),
            shutdown: Some(shutdown_tx),
        })
    }

    /// Stop the timer and wait for any in-flight pass to finish.
    pub fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel and wakes the loop.
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
