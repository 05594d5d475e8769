use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::batch::result::describe_outcome;
use crate::batch::{BatchConfig, BatchResult, BatchSummary, JobError, JobState};
use crate::models::record::ResumeRecord;
use crate::report::ReportError;

pub const REPORT_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
pub struct StructuredReport<'a> {
    pub metadata: ReportMetadata<'a>,
    pub results: Vec<StructuredEntry<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ReportMetadata<'a> {
    pub batch_id: Uuid,
    pub total_resumes: usize,
    pub successful_analyses: usize,
    pub failed_analyses: usize,
    pub skipped: usize,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub version: &'static str,
    pub config: &'a BatchConfig,
    pub summary: &'a BatchSummary,
}

#[derive(Debug, Serialize)]
pub struct StructuredEntry<'a> {
    pub job_id: usize,
    pub file_name: &'a str,
    pub status: JobState,
    pub attempts: u32,
    pub outcome: String,
    pub processing_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<&'a ResumeRecord>,
}

pub fn build(result: &BatchResult) -> StructuredReport<'_> {
    let summary = &result.summary;
    StructuredReport {
        metadata: ReportMetadata {
            batch_id: result.batch_id,
            total_resumes: summary.total,
            successful_analyses: summary.succeeded,
            failed_analyses: summary.failed,
            skipped: summary.skipped,
            submitted_at: result.submitted_at,
            completed_at: result.completed_at,
            generated_at: Utc::now(),
            version: REPORT_VERSION,
            config: &result.config,
            summary,
        },
        results: result
            .jobs
            .iter()
            .map(|job| StructuredEntry {
                job_id: job.id.0,
                file_name: &job.source.name,
                status: job.state,
                attempts: job.attempt,
                outcome: describe_outcome(job),
                processing_ms: job.processing_time.as_millis() as u64,
                error: job.error.as_ref(),
                record: job.result.as_ref(),
            })
            .collect(),
    }
}

pub fn to_json(result: &BatchResult) -> Result<Vec<u8>, ReportError> {
    Ok(serde_json::to_vec_pretty(&build(result))?)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::report::fixtures::sample_result;

    #[test]
    fn test_metadata_counts() {
        let json: Value = serde_json::from_slice(&to_json(&sample_result()).unwrap()).unwrap();
        let meta = &json["metadata"];
        assert_eq!(meta["total_resumes"], 3);
        assert_eq!(meta["successful_analyses"], 1);
        assert_eq!(meta["failed_analyses"], 1);
        assert_eq!(meta["skipped"], 1);
        assert_eq!(meta["version"], "1.0");
        assert_eq!(meta["config"]["concurrency"], 5);
        assert_eq!(meta["summary"]["failures"][0]["kind"], "transient");
    }

    #[test]
    fn test_entries_nest_records_and_errors() {
        let json: Value = serde_json::from_slice(&to_json(&sample_result()).unwrap()).unwrap();
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["status"], "succeeded");
        assert_eq!(results[0]["record"]["education"]["institution"], "IIT Bombay");
        assert!(results[0].get("error").is_none());
        assert_eq!(results[1]["error"]["message"], "503 overloaded");
        assert!(results[1].get("record").is_none());
        assert_eq!(results[2]["status"], "skipped");
    }
}
