//! Report serialization for completed batches.
//!
//! Two representations of the same `BatchResult`:
//! - tabular (CSV): one row per job, record fields flattened, list fields joined
//! - structured (JSON): batch metadata + nested per-job records

pub mod structured;
pub mod tabular;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to flush report buffer: {0}")]
    Flush(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Json,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ReportFormat::Csv => "text/csv; charset=utf-8",
            ReportFormat::Json => "application/json",
        }
    }
}

/// e.g. `resume_analysis_20261016_093000.csv`
pub fn report_filename(format: ReportFormat, at: DateTime<Utc>) -> String {
    format!(
        "resume_analysis_{}.{}",
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}
