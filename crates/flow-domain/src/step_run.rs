use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RunId, StepId, StepRunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// A single execution attempt of a step within a run.
/// Retries and loop iterations each produce a new `StepRun` with a fresh id
/// and an incremented `attempt`; `sequence_number` orders all step-runs
/// within the owning run regardless of which step they belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub id: StepRunId,
    pub run_id: RunId,
    pub step_id: StepId,
    pub sequence_number: u64,
    pub attempt: u32,
    pub status: StepRunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Replay override: short-circuits input assembly for this attempt.
    pub pinned_input: Option<Value>,
    /// Append-only until the step-run reaches a terminal status.
    pub streaming_chunks: Vec<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl StepRun {
    pub fn new(run_id: RunId, step_id: StepId, sequence_number: u64, attempt: u32, input: Value) -> Self {
        Self {
            id: StepRunId::new(),
            run_id,
            step_id,
            sequence_number,
            attempt,
            status: StepRunStatus::Pending,
            input,
            output: None,
            error: None,
            pinned_input: None,
            streaming_chunks: Vec::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn with_pinned_input(mut self, pinned_input: Value) -> Self {
        self.pinned_input = Some(pinned_input);
        self
    }

    pub fn mark_running(&mut self) {
        self.status = StepRunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, output: Value) {
        self.status = StepRunStatus::Completed;
        self.output = Some(output);
        self.finish();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StepRunStatus::Failed;
        self.error = Some(error.into());
        self.finish();
    }

    pub fn mark_skipped(&mut self) {
        self.status = StepRunStatus::Skipped;
        self.finish();
    }

    pub fn push_chunk(&mut self, chunk: Value) {
        self.streaming_chunks.push(chunk);
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
        }
    }
}
