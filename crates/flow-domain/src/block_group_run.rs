use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{BlockGroupId, BlockGroupRunId, RunId};
use crate::step_run::StepRunStatus;

/// Mirror record for group lifecycle: one per group
/// activation; a loop group produces one per iteration when the group
/// executor tracks iterations individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockGroupRun {
    pub id: BlockGroupRunId,
    pub run_id: RunId,
    pub block_group_id: BlockGroupId,
    pub iteration: Option<u64>,
    pub status: StepRunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BlockGroupRun {
    pub fn new(run_id: RunId, block_group_id: BlockGroupId, iteration: Option<u64>, input: Value) -> Self {
        Self {
            id: BlockGroupRunId::new(),
            run_id,
            block_group_id,
            iteration,
            status: StepRunStatus::Pending,
            input,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = StepRunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, output: Value) {
        self.status = StepRunStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StepRunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}
