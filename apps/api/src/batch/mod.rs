// Batch orchestration: job lifecycle, admission control, rate limiting,
// retry/backoff and progress aggregation for resume analysis runs.
// All AI calls go through an `AnalysisClient`. Only `handlers` and `registry`
// know about the HTTP surface.

pub mod config;
pub mod handlers;
pub mod job;
pub mod progress;
pub mod rate_limiter;
pub mod registry;
pub mod result;
pub mod scheduler;
pub mod worker_pool;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BackoffPolicy, BatchConfig, BatchRequest};
pub use job::{Job, JobError, JobSource, JobState};
pub use progress::ProgressSnapshot;
pub use result::{BatchResult, BatchSummary};
pub use scheduler::{BatchError, BatchScheduler};
