//! WorkerPool — a fixed number of executors draining a shared job queue.
//!
//! Per job pass: pick (FIFO among eligible jobs) → Extracting → extract →
//! Analyzing → rate limiter → analyze → apply outcome → hand the job back.
//! Jobs backing off after a transient failure sit in a side list until their
//! deadline passes. Idle executors park on a `Notify` or on the nearest backoff
//! deadline; they never spin.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::AnalysisClient;
use crate::batch::config::BatchConfig;
use crate::batch::job::{ErrorKind, InvalidTransition, Job, JobError, JobId, JobState};
use crate::batch::progress::ProgressTracker;
use crate::batch::rate_limiter::RateLimiter;
use crate::extraction::Extractor;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("worker task aborted: {0}")]
    WorkerAborted(String),

    #[error("slot {0} was not returned to the pool")]
    JobLost(usize),

    #[error("{0} finished the run in non-terminal state {1}")]
    Unfinished(JobId, JobState),
}

/// Everything an executor needs besides the queue. Shared by all waves of a batch.
pub struct PoolContext {
    pub batch_id: Uuid,
    pub config: BatchConfig,
    pub extractor: Arc<dyn Extractor>,
    pub client: Arc<dyn AnalysisClient>,
    pub limiter: Arc<RateLimiter>,
    pub progress: ProgressTracker,
    pub cancel: CancellationToken,
}

struct Transition {
    job: JobId,
    from: JobState,
    to: JobState,
}

enum Next {
    Run(usize, Job),
    Wait(Option<Instant>),
    Done,
}

/// Job arena for one run plus the pending bookkeeping. Guarded by one mutex.
struct Queue {
    slots: Vec<Option<Job>>,
    ready: VecDeque<usize>,
    backing_off: Vec<(Instant, usize)>,
    in_flight: usize,
}

impl Queue {
    fn new(jobs: Vec<Job>) -> Self {
        let ready = (0..jobs.len()).collect();
        Self {
            slots: jobs.into_iter().map(Some).collect(),
            ready,
            backing_off: Vec::new(),
            in_flight: 0,
        }
    }

    /// Dequeue-and-mark-in-flight. Transitions are returned, not recorded, so the
    /// progress lock is never taken while the queue lock is held.
    fn next(
        &mut self,
        now: Instant,
        cancelled: bool,
        transitions: &mut Vec<Transition>,
    ) -> Result<Next, PoolError> {
        if cancelled {
            self.skip_pending(transitions)?;
            return Ok(Next::Done);
        }

        self.promote_expired(now);

        if let Some(index) = self.ready.pop_front() {
            let mut job = self.slots[index].take().ok_or(PoolError::JobLost(index))?;
            let from = job.advance(JobState::Extracting)?;
            transitions.push(Transition {
                job: job.id,
                from,
                to: JobState::Extracting,
            });
            self.in_flight += 1;
            return Ok(Next::Run(index, job));
        }

        if let Some(deadline) = self.backing_off.iter().map(|(at, _)| *at).min() {
            return Ok(Next::Wait(Some(deadline)));
        }
        if self.in_flight > 0 {
            // A running job may still come back for a retry.
            return Ok(Next::Wait(None));
        }
        Ok(Next::Done)
    }

    fn promote_expired(&mut self, now: Instant) {
        let mut expired: Vec<(Instant, usize)> = Vec::new();
        self.backing_off.retain(|&(at, index)| {
            if at <= now {
                expired.push((at, index));
                false
            } else {
                true
            }
        });
        expired.sort();
        self.ready.extend(expired.into_iter().map(|(_, index)| index));
    }

    fn skip_pending(&mut self, transitions: &mut Vec<Transition>) -> Result<(), PoolError> {
        let waiting: Vec<usize> = self
            .ready
            .drain(..)
            .chain(self.backing_off.drain(..).map(|(_, index)| index))
            .collect();
        for index in waiting {
            let job = self.slots[index]
                .as_mut()
                .ok_or(PoolError::JobLost(index))?;
            let from = job.skip("batch cancelled before the job was picked up")?;
            transitions.push(Transition {
                job: job.id,
                from,
                to: JobState::Skipped,
            });
        }
        Ok(())
    }

    fn put_back(&mut self, index: usize, job: Job, retry_at: Option<Instant>) {
        self.slots[index] = Some(job);
        self.in_flight -= 1;
        if let Some(at) = retry_at {
            self.backing_off.push((at, index));
        }
    }

    fn into_jobs(self) -> Result<Vec<Job>, PoolError> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let job = slot.ok_or(PoolError::JobLost(index))?;
                if !job.is_terminal() {
                    return Err(PoolError::Unfinished(job.id, job.state));
                }
                Ok(job)
            })
            .collect()
    }
}

struct Shared {
    ctx: Arc<PoolContext>,
    queue: Mutex<Queue>,
    wake: Notify,
}

pub struct WorkerPool {
    ctx: Arc<PoolContext>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<PoolContext>) -> Self {
        Self { ctx }
    }

    /// Runs every job to a terminal state and returns them in input order.
    pub async fn run(&self, jobs: Vec<Job>) -> Result<Vec<Job>, PoolError> {
        if jobs.is_empty() {
            return Ok(jobs);
        }
        let workers = self.ctx.config.concurrency.min(jobs.len());
        info!(
            batch_id = %self.ctx.batch_id,
            jobs = jobs.len(),
            workers,
            "Worker pool starting"
        );

        let shared = Arc::new(Shared {
            ctx: self.ctx.clone(),
            queue: Mutex::new(Queue::new(jobs)),
            wake: Notify::new(),
        });

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let shared = shared.clone();
            let span = info_span!("worker", batch_id = %self.ctx.batch_id, worker);
            set.spawn(run_worker(shared).instrument(span));
        }

        while let Some(joined) = set.join_next().await {
            let outcome = joined
                .map_err(|e| PoolError::WorkerAborted(e.to_string()))
                .and_then(|result| result);
            if let Err(e) = outcome {
                set.abort_all();
                return Err(e);
            }
        }

        let mut queue = shared.queue.lock().await;
        std::mem::replace(&mut *queue, Queue::new(Vec::new())).into_jobs()
    }
}

async fn run_worker(shared: Arc<Shared>) -> Result<(), PoolError> {
    let mut transitions = Vec::new();
    loop {
        // Register interest before looking at the queue so a wake-up between the
        // check and the wait is not lost.
        let notified = shared.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = {
            let mut queue = shared.queue.lock().await;
            queue.next(
                Instant::now(),
                shared.ctx.cancel.is_cancelled(),
                &mut transitions,
            )?
        };
        for t in transitions.drain(..) {
            shared.ctx.progress.record_transition(t.job, t.from, t.to);
        }

        match next {
            Next::Done => return Ok(()),
            Next::Wait(deadline) => {
                let backoff_expiry = async {
                    match deadline {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = notified.as_mut() => {}
                    _ = backoff_expiry => {}
                    _ = shared.ctx.cancel.cancelled() => {}
                }
            }
            Next::Run(index, mut job) => {
                let span = info_span!(
                    "job",
                    job_id = %job.id,
                    file = %job.source.name,
                    attempt = job.attempt + 1,
                );
                let pass = AssertUnwindSafe(process(&shared.ctx, &mut job))
                    .catch_unwind()
                    .instrument(span.clone())
                    .await;
                let retry_at = match pass {
                    Ok(outcome) => outcome?,
                    Err(payload) => {
                        span.in_scope(|| contain_panic(&shared.ctx, &mut job, payload))?
                    }
                };
                shared.queue.lock().await.put_back(index, job, retry_at);
                shared.wake.notify_waiters();
            }
        }
    }
}

/// One lifecycle pass for a job already moved to Extracting. Returns the
/// instant the job becomes eligible again when it was re-queued.
async fn process(ctx: &PoolContext, job: &mut Job) -> Result<Option<Instant>, PoolError> {
    let budget = ctx.config.job_timeout;
    let started = Instant::now();

    let text = match job.text.clone() {
        Some(text) => text,
        None => match timeout(budget, ctx.extractor.extract(&job.source)).await {
            Ok(Ok(text)) => {
                let text: Arc<str> = Arc::from(text);
                job.text = Some(text.clone());
                text
            }
            Ok(Err(e)) => {
                job.processing_time += started.elapsed();
                warn!(error = %e, "Extraction failed");
                let from = job.fail(JobError::new(ErrorKind::Permanent, e.to_string()))?;
                ctx.progress.record_transition(job.id, from, JobState::Failed);
                return Ok(None);
            }
            Err(_) => {
                job.processing_time += started.elapsed();
                job.attempt += 1;
                let error = timeout_error("extraction", budget);
                return transient_failure(ctx, job, error);
            }
        },
    };
    let extract_time = started.elapsed();

    let from = job.advance(JobState::Analyzing)?;
    ctx.progress.record_transition(job.id, from, JobState::Analyzing);

    ctx.limiter.acquire().await;
    job.attempt += 1;

    let analysis_started = Instant::now();
    let remaining = budget.saturating_sub(extract_time);
    let outcome = timeout(remaining, ctx.client.analyze(&text, &job.source)).await;
    job.processing_time += extract_time + analysis_started.elapsed();

    match outcome {
        Ok(Ok(record)) => {
            let from = job.succeed(record)?;
            ctx.progress.record_transition(job.id, from, JobState::Succeeded);
            debug!(elapsed_ms = job.processing_time.as_millis() as u64, "Analysis succeeded");
            Ok(None)
        }
        Ok(Err(e)) if e.kind().is_retryable() => {
            transient_failure(ctx, job, JobError::new(e.kind(), e.to_string()))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Analysis failed permanently");
            let from = job.fail(JobError::new(e.kind(), e.to_string()))?;
            ctx.progress.record_transition(job.id, from, JobState::Failed);
            Ok(None)
        }
        Err(_) => transient_failure(ctx, job, timeout_error("analysis", budget)),
    }
}

/// Re-queues with backoff while attempts remain, otherwise fails the job.
fn transient_failure(
    ctx: &PoolContext,
    job: &mut Job,
    error: JobError,
) -> Result<Option<Instant>, PoolError> {
    if job.attempt < ctx.config.max_attempts() {
        let delay = ctx.config.backoff.delay_for(job.attempt);
        warn!(
            error = %error.message,
            attempt = job.attempt,
            retry_in_ms = delay.as_millis() as u64,
            "Transient failure, re-queueing"
        );
        let from = job.requeue(error)?;
        ctx.progress.record_transition(job.id, from, JobState::Pending);
        return Ok(Some(Instant::now() + delay));
    }

    warn!(
        error = %error.message,
        attempts = job.attempt,
        "Transient failure, retries exhausted"
    );
    let from = job.fail(error)?;
    ctx.progress.record_transition(job.id, from, JobState::Failed);
    Ok(None)
}

/// A panicking collaborator fails only the job it was working on.
fn contain_panic(
    ctx: &PoolContext,
    job: &mut Job,
    payload: Box<dyn Any + Send>,
) -> Result<Option<Instant>, PoolError> {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    error!(panic = %message, state = %job.state, "Job pass panicked");

    match job.state {
        JobState::Extracting | JobState::Analyzing => {
            let error = JobError::new(ErrorKind::Unknown, format!("job panicked: {message}"));
            let from = job.fail(error)?;
            ctx.progress.record_transition(job.id, from, JobState::Failed);
            Ok(None)
        }
        // The outcome was already applied before the panic.
        JobState::Pending => Ok(Some(Instant::now())),
        _ => Ok(None),
    }
}

fn timeout_error(step: &str, budget: Duration) -> JobError {
    JobError::new(
        ErrorKind::Transient,
        format!("{step} timed out after {}s", budget.as_secs_f64()),
    )
}
