//! Structured results handed to whatever layer fronts the scheduler.

pub mod messages;

pub use messages::{CheckResult, Envelope, FilesResult, Reason, StatisticsResult, StatusResult};
