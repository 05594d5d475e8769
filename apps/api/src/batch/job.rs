//! Job — one file's journey through extraction and analysis.
//!
//! Lifecycle:
//!
//! ```text
//! Pending ──pickup──▶ Extracting ──text──▶ Analyzing ──ok──▶ Succeeded
//!    ▲  │                  │                  │
//!    │  └─cancel─▶ Skipped └─fail─▶ Failed ◀──┤ permanent / retries exhausted
//!    └───────────── transient, retries left ──┘
//! ```
//!
//! A per-job timeout that fires while still extracting also takes the
//! transient path (Extracting → Pending) and consumes an attempt.
//!
//! Terminal states (Succeeded, Failed, Skipped) are never left.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::record::ResumeRecord;

/// Position of the job in its `BatchRequest`. Stable for the lifetime of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Identity of an input file. Content is resolved on demand by the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSource {
    /// Name as uploaded, used in reports.
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl JobSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size_bytes,
        }
    }

    /// Lower-cased extension including the dot, e.g. `.pdf`.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Extracting,
    Analyzing,
    Succeeded,
    Failed,
    Skipped,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Edges of the lifecycle graph.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Extracting)
                | (Pending, Skipped)
                | (Extracting, Analyzing)
                | (Extracting, Failed)
                | (Extracting, Pending)
                | (Analyzing, Succeeded)
                | (Analyzing, Pending)
                | (Analyzing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Analyzing => "analyzing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a job failure. Drives retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network blip, remote rate limit or local timeout. Retried with backoff.
    Transient,
    /// Bad input or remote rejection. Never retried.
    Permanent,
    /// The collaborator could not classify the failure. Not retried.
    Unknown,
    /// The batch was cancelled before the job was picked up.
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTimestamps {
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{job}: illegal transition {from} -> {to}")]
pub struct InvalidTransition {
    pub job: JobId,
    pub from: JobState,
    pub to: JobState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub source: JobSource,
    pub state: JobState,
    /// Analysis attempts made so far.
    pub attempt: u32,
    pub result: Option<ResumeRecord>,
    pub error: Option<JobError>,
    pub timestamps: JobTimestamps,
    /// Time spent in Extracting/Analyzing across all attempts, excluding
    /// rate-limiter waits and backoff.
    #[serde(with = "duration_millis")]
    pub processing_time: Duration,
    /// Extracted text, kept so a re-queued job skips re-reading the file.
    #[serde(skip)]
    pub(crate) text: Option<Arc<str>>,
}

impl Job {
    pub fn new(id: JobId, source: JobSource) -> Self {
        Self {
            id,
            source,
            state: JobState::Pending,
            attempt: 0,
            result: None,
            error: None,
            timestamps: JobTimestamps {
                enqueued_at: Some(Utc::now()),
                ..Default::default()
            },
            processing_time: Duration::ZERO,
            text: None,
        }
    }

    /// Moves along one lifecycle edge and returns the previous state.
    pub fn advance(&mut self, to: JobState) -> Result<JobState, InvalidTransition> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(InvalidTransition {
                job: self.id,
                from,
                to,
            });
        }
        self.state = to;
        if from == JobState::Pending && to == JobState::Extracting {
            self.timestamps.started_at.get_or_insert_with(Utc::now);
        }
        if to.is_terminal() {
            self.timestamps.finished_at = Some(Utc::now());
            self.text = None;
        }
        Ok(from)
    }

    pub fn succeed(&mut self, record: ResumeRecord) -> Result<JobState, InvalidTransition> {
        let from = self.advance(JobState::Succeeded)?;
        self.result = Some(record);
        self.error = None;
        Ok(from)
    }

    pub fn fail(&mut self, error: JobError) -> Result<JobState, InvalidTransition> {
        let from = self.advance(JobState::Failed)?;
        self.error = Some(error);
        Ok(from)
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> Result<JobState, InvalidTransition> {
        let from = self.advance(JobState::Skipped)?;
        self.error = Some(JobError::new(ErrorKind::Cancelled, reason));
        Ok(from)
    }

    /// Sends the job back to Pending after a retryable failure. The last error is
    /// kept so an eventual exhaustion reports it.
    pub fn requeue(&mut self, error: JobError) -> Result<JobState, InvalidTransition> {
        let from = self.advance(JobState::Pending)?;
        self.error = Some(error);
        Ok(from)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobId(0), JobSource::new("cv.pdf", "/tmp/cv.pdf", 10))
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        assert_eq!(job.advance(JobState::Extracting), Ok(JobState::Pending));
        assert!(job.timestamps.started_at.is_some());
        job.advance(JobState::Analyzing).unwrap();
        job.succeed(ResumeRecord::default()).unwrap();
        assert!(job.is_terminal());
        assert!(job.result.is_some());
        assert!(job.error.is_none());
        assert!(job.timestamps.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.skip("cancelled").unwrap();
        for next in [
            JobState::Pending,
            JobState::Extracting,
            JobState::Analyzing,
            JobState::Succeeded,
            JobState::Failed,
        ] {
            assert!(job.advance(next).is_err(), "left Skipped for {next}");
        }
        assert_eq!(job.error.as_ref().map(|e| e.kind), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_cannot_skip_in_flight_job() {
        let mut job = job();
        job.advance(JobState::Extracting).unwrap();
        let err = job.skip("late cancel").unwrap_err();
        assert_eq!(err.from, JobState::Extracting);
        assert_eq!(err.to, JobState::Skipped);
    }

    #[test]
    fn test_requeue_then_succeed_clears_error() {
        let mut job = job();
        job.advance(JobState::Extracting).unwrap();
        job.advance(JobState::Analyzing).unwrap();
        job.requeue(JobError::new(ErrorKind::Transient, "503")).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.error.is_some());
        job.advance(JobState::Extracting).unwrap();
        job.advance(JobState::Analyzing).unwrap();
        job.succeed(ResumeRecord::default()).unwrap();
        assert!(job.error.is_none());
    }

    #[test]
    fn test_extension_is_lowercased() {
        assert_eq!(JobSource::new("CV.PDF", "/x", 1).extension(), ".pdf");
        assert_eq!(JobSource::new("README", "/x", 1).extension(), "");
    }
}
