//! Scripted collaborators for exercising the batch core without I/O.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::analysis::{AnalysisClient, AnalysisError};
use crate::batch::job::JobSource;
use crate::extraction::{ExtractionError, Extractor};
use crate::models::record::ResumeRecord;

pub fn sources(n: usize) -> Vec<JobSource> {
    (0..n)
        .map(|i| JobSource::new(format!("cv{i}.pdf"), format!("/staging/cv{i}.pdf"), 1024))
        .collect()
}

#[derive(Default)]
pub struct StubExtractor {
    failing: HashSet<String>,
    delay: Duration,
}

impl StubExtractor {
    pub fn failing_for(name: &str) -> Self {
        Self {
            failing: HashSet::from([name.to_string()]),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, source: &JobSource) -> Result<String, ExtractionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(&source.name) {
            return Err(ExtractionError::Decode("corrupt file".into()));
        }
        Ok(format!("resume text of {}", source.name))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Step {
    Succeed,
    Transient,
    Permanent,
    Unknown,
    /// Succeeds after holding the call open this long.
    Slow(Duration),
    /// A collaborator bug: the call panics.
    Panic,
}

#[derive(Default)]
struct ClientState {
    scripts: HashMap<String, VecDeque<Step>>,
    calls: HashMap<String, u32>,
    call_times: Vec<Instant>,
    call_order: Vec<String>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Replays a per-file script of outcomes; files without a script succeed.
#[derive(Default, Clone)]
pub struct ScriptedClient {
    state: Arc<Mutex<ClientState>>,
    default_step: Option<Step>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(step: Step) -> Self {
        Self {
            default_step: Some(step),
            ..Default::default()
        }
    }

    pub fn script(self, file: &str, steps: &[Step]) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(file.to_string(), steps.iter().copied().collect());
        self
    }

    /// Raises `token` once `calls` analyze calls have completed.
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn calls_for(&self, file: &str) -> u32 {
        self.state.lock().unwrap().calls.get(file).copied().unwrap_or(0)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().call_times.clone()
    }

    /// File names in the order their analyze calls started.
    pub fn call_order(&self) -> Vec<String> {
        self.state.lock().unwrap().call_order.clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }
}

#[async_trait]
impl AnalysisClient for ScriptedClient {
    async fn analyze(
        &self,
        _text: &str,
        source: &JobSource,
    ) -> Result<ResumeRecord, AnalysisError> {
        let step = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(source.name.clone()).or_default() += 1;
            state.call_times.push(Instant::now());
            state.call_order.push(source.name.clone());
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            state
                .scripts
                .get_mut(&source.name)
                .and_then(|script| script.pop_front())
                .or(self.default_step)
                .unwrap_or(Step::Succeed)
        };

        if let Step::Slow(delay) = step {
            tokio::time::sleep(delay).await;
        }

        let total_calls = {
            let mut state = self.state.lock().unwrap();
            state.in_flight -= 1;
            state.call_times.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if total_calls >= *after {
                token.cancel();
            }
        }

        match step {
            Step::Succeed | Step::Slow(_) => {
                let mut record = ResumeRecord::default();
                record.name = format!("Candidate from {}", source.name);
                record.metadata.file_name = source.name.clone();
                record.experience_scores.overall_experience = Some(7);
                Ok(record)
            }
            Step::Transient => Err(AnalysisError::Transient("503 overloaded".into())),
            Step::Permanent => Err(AnalysisError::Permanent("content rejected".into())),
            Step::Unknown => Err(AnalysisError::Unknown("unparseable output".into())),
            Step::Panic => panic!("client bug on {}", source.name),
        }
    }
}
