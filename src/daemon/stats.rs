//! In-memory scheduler counters. Reset only by process restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Monotonic counters plus the instant they started counting from.
#[derive(Debug)]
pub struct SchedulerStatistics {
    started: Instant,
    updates: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time view with derived rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub successful_updates: u64,
    pub errors: u64,
    pub uptime_secs: u64,
    /// Percentage of attempted updates that succeeded; 0 before any attempt.
    pub success_rate: f64,
    pub updates_per_hour: f64,
}

impl Default for SchedulerStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerStatistics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            updates: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        derive(
            self.updates.load(Ordering::SeqCst),
            self.errors.load(Ordering::SeqCst),
            self.uptime(),
        )
    }
}

fn derive(updates: u64, errors: u64, uptime: Duration) -> StatisticsSnapshot {
    let attempts = updates + errors;
    let success_rate = if attempts == 0 {
        0.0
    } else {
        updates as f64 / attempts as f64 * 100.0
    };

    let hours = uptime.as_secs_f64() / 3600.0;
    let updates_per_hour = if hours > 0.0 {
        updates as f64 / hours
    } else {
        0.0
    };

    StatisticsSnapshot {
        successful_updates: updates,
        errors,
        uptime_secs: uptime.as_secs(),
        success_rate,
        updates_per_hour,
    }
}
