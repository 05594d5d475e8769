//! Analysis — the boundary between the batch core and the AI service.
//!
//! The core only sees `AnalysisClient::analyze` and the classification on
//! `AnalysisError`. Everything protocol-specific stays behind the trait.

pub mod prompts;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::batch::job::{ErrorKind, JobSource};
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{LlmClient, LlmError};
use crate::models::record::ResumeRecord;

use self::prompts::{build_analysis_prompt, RESUME_ANALYSIS_SYSTEM};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// Network failure, remote rate limit or overload. Worth another attempt.
    #[error("transient analysis failure: {0}")]
    Transient(String),

    /// Malformed input, rejected content or exhausted quota. Never retried.
    #[error("permanent analysis failure: {0}")]
    Permanent(String),

    #[error("unclassified analysis failure: {0}")]
    Unknown(String),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Transient(_) => ErrorKind::Transient,
            AnalysisError::Permanent(_) => ErrorKind::Permanent,
            AnalysisError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl From<LlmError> for AnalysisError {
    fn from(err: LlmError) -> Self {
        match err {
            e if e.is_transient() => AnalysisError::Transient(e.to_string()),
            e @ LlmError::Api { .. } => AnalysisError::Permanent(e.to_string()),
            e @ (LlmError::Parse(_) | LlmError::EmptyContent) => {
                AnalysisError::Unknown(e.to_string())
            }
            e => AnalysisError::Permanent(e.to_string()),
        }
    }
}

/// Maps resume text to a structured record. One call is one attempt.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, text: &str, source: &JobSource)
        -> Result<ResumeRecord, AnalysisError>;
}

/// `AnalysisClient` backed by the Claude Messages API.
pub struct LlmAnalysisClient {
    llm: LlmClient,
}

impl LlmAnalysisClient {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AnalysisClient for LlmAnalysisClient {
    async fn analyze(
        &self,
        text: &str,
        source: &JobSource,
    ) -> Result<ResumeRecord, AnalysisError> {
        if text.trim().is_empty() {
            return Err(AnalysisError::Permanent("resume text is empty".to_string()));
        }

        let prompt = build_analysis_prompt(text);
        let system = format!("{RESUME_ANALYSIS_SYSTEM}\n\n{JSON_ONLY_SYSTEM}");
        let mut record: ResumeRecord = self.llm.call_json(&prompt, &system).await?;

        stamp_metadata(&mut record, source);
        Ok(record)
    }
}

/// File name and timestamp come from us, not from the model.
fn stamp_metadata(record: &mut ResumeRecord, source: &JobSource) {
    record.metadata.file_name = source.name.clone();
    record.metadata.processing_timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
}
