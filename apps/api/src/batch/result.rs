use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::batch::config::BatchConfig;
use crate::batch::job::{ErrorKind, Job, JobId, JobState};

/// Final accounting for one `BatchRequest`. Jobs are in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub config: BatchConfig,
    pub summary: BatchSummary,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Percentage of all submitted jobs that succeeded.
    pub success_rate: f64,
    /// Mean processing time of jobs that reached Succeeded or Failed. Skipped
    /// jobs are excluded even when an earlier attempt ran.
    pub average_latency_ms: f64,
    pub failures: Vec<FailureReason>,
    pub average_scores: ScoreAverages,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReason {
    pub job_id: JobId,
    pub file_name: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// Mean experience scores over succeeded jobs that reported one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreAverages {
    pub ai_ml_experience: Option<f64>,
    pub gen_ai_experience: Option<f64>,
    pub overall_experience: Option<f64>,
}

impl BatchResult {
    /// Orders jobs by submission index and derives the summary.
    pub fn assemble(
        batch_id: Uuid,
        submitted_at: DateTime<Utc>,
        config: BatchConfig,
        mut jobs: Vec<Job>,
    ) -> Self {
        jobs.sort_by_key(|job| job.id);
        let summary = BatchSummary::from_jobs(&jobs);
        Self {
            batch_id,
            submitted_at,
            completed_at: Utc::now(),
            config,
            summary,
            jobs,
        }
    }
}

impl BatchSummary {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let count = |state: JobState| jobs.iter().filter(|j| j.state == state).count();
        let total = jobs.len();
        let succeeded = count(JobState::Succeeded);

        let started: Vec<&Job> = jobs
            .iter()
            .filter(|j| j.state != JobState::Skipped && j.timestamps.started_at.is_some())
            .collect();
        let average_latency_ms = if started.is_empty() {
            0.0
        } else {
            started
                .iter()
                .map(|j| j.processing_time.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / started.len() as f64
        };

        let failures = jobs
            .iter()
            .filter(|j| j.state == JobState::Failed)
            .filter_map(|j| {
                j.error.as_ref().map(|e| FailureReason {
                    job_id: j.id,
                    file_name: j.source.name.clone(),
                    kind: e.kind,
                    message: e.message.clone(),
                    attempts: j.attempt,
                })
            })
            .collect();

        Self {
            total,
            succeeded,
            failed: count(JobState::Failed),
            skipped: count(JobState::Skipped),
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64 * 100.0
            },
            average_latency_ms,
            failures,
            average_scores: ScoreAverages::from_jobs(jobs),
        }
    }
}

impl ScoreAverages {
    fn from_jobs(jobs: &[Job]) -> Self {
        let records: Vec<_> = jobs.iter().filter_map(|j| j.result.as_ref()).collect();
        let mean = |pick: fn(&crate::models::record::ExperienceScores) -> Option<u8>| {
            let scores: Vec<f64> = records
                .iter()
                .filter_map(|r| pick(&r.experience_scores))
                .map(f64::from)
                .collect();
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64)
        };
        Self {
            ai_ml_experience: mean(|s| s.ai_ml_experience),
            gen_ai_experience: mean(|s| s.gen_ai_experience),
            overall_experience: mean(|s| s.overall_experience),
        }
    }
}

/// Human-readable outcome separating success, transient exhaustion and
/// permanent failure.
pub fn describe_outcome(job: &Job) -> String {
    match (job.state, job.error.as_ref()) {
        (JobState::Succeeded, _) if job.attempt > 1 => {
            format!("succeeded after {} attempts", job.attempt)
        }
        (JobState::Succeeded, _) => "succeeded".to_string(),
        (JobState::Failed, Some(e)) if e.kind == ErrorKind::Transient => format!(
            "failed after {} attempts due to transient errors: {}",
            job.attempt, e.message
        ),
        (JobState::Failed, Some(e)) if job.attempt == 0 => {
            format!("failed permanently, unsupported or invalid input: {}", e.message)
        }
        (JobState::Failed, Some(e)) => format!("failed permanently: {}", e.message),
        (JobState::Skipped, _) => "skipped: batch cancelled".to_string(),
        (state, _) => state.to_string(),
    }
}
