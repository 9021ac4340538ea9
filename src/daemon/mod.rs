//! Scheduling, persistence and counters for synchronization passes.

pub mod checkpoint;
pub mod history;
pub mod scheduler;
pub mod stats;

pub use checkpoint::{CheckpointError, CheckpointStore, now_millis};
pub use history::{DEFAULT_RETENTION, History, PassRecord};
pub use scheduler::{
    DEFAULT_CHECK_INTERVAL, DEFAULT_STALENESS_CEILING, SchedulerHandle, SchedulerState,
    UpdateScheduler,
};
pub use stats::{SchedulerStatistics, StatisticsSnapshot};
