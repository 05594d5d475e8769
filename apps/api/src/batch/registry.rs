//! In-memory index of batches launched through the API.
//!
//! Nothing here survives a restart. Each entry keeps the staging directory of
//! its uploads alive until the batch finishes, then drops it. Finished entries
//! are evicted once they are older than the retention window; running batches
//! are never evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::batch::progress::{ProgressSnapshot, ProgressTracker};
use crate::batch::result::BatchResult;
use crate::batch::scheduler::{BatchError, BatchRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
    Aborted,
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Completed(Arc<BatchResult>),
    Aborted(String),
}

struct BatchEntry {
    submitted_at: DateTime<Utc>,
    progress: ProgressTracker,
    cancel: CancellationToken,
    outcome: Option<BatchOutcome>,
    staging: Option<TempDir>,
    finished_at: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub submitted_at: DateTime<Utc>,
    pub cancel_requested: bool,
    pub progress: ProgressSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<BatchResult>>,
}

#[derive(Clone)]
pub struct BatchRegistry {
    entries: Arc<RwLock<HashMap<Uuid, BatchEntry>>>,
    retention: Duration,
}

impl BatchRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Arc::default(),
            retention,
        }
    }

    /// Registers the run and executes it on a background task.
    pub async fn launch(&self, run: BatchRun, staging: Option<TempDir>) -> Uuid {
        self.evict_expired().await;

        let batch_id = run.id();
        let entry = BatchEntry {
            submitted_at: Utc::now(),
            progress: run.progress(),
            cancel: run.cancel_token(),
            outcome: None,
            staging,
            finished_at: None,
        };
        self.entries.write().await.insert(batch_id, entry);

        let registry = self.clone();
        tokio::spawn(async move {
            let outcome = run.execute().await;
            registry.finish(batch_id, outcome).await;
        });
        batch_id
    }

    async fn finish(&self, batch_id: Uuid, outcome: Result<BatchResult, BatchError>) {
        let outcome = match outcome {
            Ok(result) => {
                info!(%batch_id, "Batch result stored");
                BatchOutcome::Completed(Arc::new(result))
            }
            Err(e) => {
                error!(%batch_id, error = %e, "Batch aborted");
                BatchOutcome::Aborted(e.to_string())
            }
        };
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&batch_id) {
            entry.outcome = Some(outcome);
            entry.staging = None;
            entry.finished_at = Some(Instant::now());
        }
    }

    /// Drops finished batches older than the retention window. Returns how many went.
    pub async fn evict_expired(&self) -> usize {
        let retention = self.retention;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            entry
                .finished_at
                .map_or(true, |finished| finished.elapsed() < retention)
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            info!(evicted, remaining = entries.len(), "Evicted expired batches");
        }
        evicted
    }

    /// Runs `evict_expired` every `every` until the process exits.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = registry.evict_expired().await;
                debug!(evicted, "Retention sweep");
            }
        })
    }

    pub async fn progress(&self, batch_id: Uuid) -> Option<ProgressSnapshot> {
        let entries = self.entries.read().await;
        entries.get(&batch_id).map(|e| e.progress.snapshot())
    }

    /// Raises cancellation. Returns `None` for unknown batches.
    pub async fn cancel(&self, batch_id: Uuid) -> Option<BatchStatus> {
        let entries = self.entries.read().await;
        let entry = entries.get(&batch_id)?;
        entry.cancel.cancel();
        Some(status_of(entry))
    }

    pub async fn view(&self, batch_id: Uuid) -> Option<BatchView> {
        let entries = self.entries.read().await;
        let entry = entries.get(&batch_id)?;
        let (error, result) = match &entry.outcome {
            Some(BatchOutcome::Completed(result)) => (None, Some(result.clone())),
            Some(BatchOutcome::Aborted(message)) => (Some(message.clone()), None),
            None => (None, None),
        };
        Some(BatchView {
            batch_id,
            status: status_of(entry),
            submitted_at: entry.submitted_at,
            cancel_requested: entry.cancel.is_cancelled(),
            progress: entry.progress.snapshot(),
            error,
            result,
        })
    }

    pub async fn outcome(&self, batch_id: Uuid) -> Option<Option<BatchOutcome>> {
        let entries = self.entries.read().await;
        entries.get(&batch_id).map(|e| e.outcome.clone())
    }
}

fn status_of(entry: &BatchEntry) -> BatchStatus {
    match entry.outcome {
        None => BatchStatus::Running,
        Some(BatchOutcome::Completed(_)) => BatchStatus::Completed,
        Some(BatchOutcome::Aborted(_)) => BatchStatus::Aborted,
    }
}
