//! BatchScheduler — validates a request, runs it wave by wave through the
//! worker pool and assembles the ordered `BatchResult`.
//!
//! A wave is a contiguous slice of at most `batch_size` jobs. Wave k+1 starts
//! only once every job of wave k is terminal. The rate limiter is shared by all
//! waves, so call spacing holds across wave boundaries too.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisClient;
use crate::batch::config::{BatchConfig, BatchRequest, ConfigError};
use crate::batch::job::{Job, JobId, JobState};
use crate::batch::progress::ProgressTracker;
use crate::batch::rate_limiter::RateLimiter;
use crate::batch::result::BatchResult;
use crate::batch::worker_pool::{PoolContext, PoolError, WorkerPool};
use crate::extraction::Extractor;

/// Batch-level failures. Per-job failures never surface here.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid batch configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("batch cancelled before any job started")]
    Cancelled,

    #[error("batch aborted: {0}")]
    Internal(#[from] PoolError),
}

#[derive(Clone)]
pub struct BatchScheduler {
    extractor: Arc<dyn Extractor>,
    client: Arc<dyn AnalysisClient>,
}

impl BatchScheduler {
    pub fn new(extractor: Arc<dyn Extractor>, client: Arc<dyn AnalysisClient>) -> Self {
        Self { extractor, client }
    }

    /// Validates the request and creates its jobs without starting them.
    /// Observers can grab the progress tracker before `execute` is awaited.
    pub fn prepare(
        &self,
        request: BatchRequest,
        cancel: CancellationToken,
    ) -> Result<BatchRun, BatchError> {
        request.validate()?;
        let (sources, config) = request.into_parts();

        let jobs: Vec<Job> = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| Job::new(JobId(index), source))
            .collect();

        Ok(BatchRun {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            progress: ProgressTracker::new(jobs.len()),
            jobs,
            config,
            cancel,
            extractor: self.extractor.clone(),
            client: self.client.clone(),
        })
    }

    /// Runs the batch to completion. Returns a result covering every submitted job.
    pub async fn submit(
        &self,
        request: BatchRequest,
        cancel: CancellationToken,
    ) -> Result<BatchResult, BatchError> {
        self.prepare(request, cancel)?.execute().await
    }
}

/// A validated batch that has not started yet.
pub struct BatchRun {
    id: Uuid,
    submitted_at: DateTime<Utc>,
    jobs: Vec<Job>,
    config: BatchConfig,
    progress: ProgressTracker,
    cancel: CancellationToken,
    extractor: Arc<dyn Extractor>,
    client: Arc<dyn AnalysisClient>,
}

impl BatchRun {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub async fn execute(self) -> Result<BatchResult, BatchError> {
        if self.cancel.is_cancelled() {
            warn!(batch_id = %self.id, "Batch cancelled before start");
            return Err(BatchError::Cancelled);
        }

        let total = self.jobs.len();
        info!(
            batch_id = %self.id,
            total,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            rate_limit_ms = self.config.rate_limit_interval.as_millis() as u64,
            max_retries = self.config.max_retries,
            "Batch started"
        );

        let ctx = Arc::new(PoolContext {
            batch_id: self.id,
            config: self.config,
            extractor: self.extractor,
            client: self.client,
            limiter: Arc::new(RateLimiter::new(self.config.rate_limit_interval)),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
        });
        let pool = WorkerPool::new(ctx);

        let mut finished = Vec::with_capacity(total);
        let mut pending = self.jobs;
        let mut wave = 0usize;
        while !pending.is_empty() {
            let rest = pending.split_off(self.config.batch_size.min(pending.len()));
            let mut current = std::mem::replace(&mut pending, rest);

            if self.cancel.is_cancelled() {
                for job in &mut current {
                    let from = job
                        .skip("batch cancelled before the job was picked up")
                        .map_err(PoolError::from)?;
                    self.progress.record_transition(job.id, from, JobState::Skipped);
                }
                finished.extend(current);
                continue;
            }

            info!(batch_id = %self.id, wave, jobs = current.len(), "Dispatching wave");
            finished.extend(pool.run(current).await?);
            wave += 1;
        }

        let result = BatchResult::assemble(self.id, self.submitted_at, self.config, finished);
        info!(
            batch_id = %self.id,
            succeeded = result.summary.succeeded,
            failed = result.summary.failed,
            skipped = result.summary.skipped,
            success_rate = result.summary.success_rate,
            "Batch finished"
        );
        Ok(result)
    }
}
