use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RunId, StepId, TenantId, WorkflowVersionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Schedule,
    Webhook,
    Test,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// Context handed to a child run spawned by the Error Workflow Binder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorTriggerSource {
    pub original_run_id: RunId,
    pub original_project: WorkflowVersionId,
    pub error_step_id: StepId,
    pub error_step_name: String,
    pub error_message: String,
    pub triggered_at: DateTime<Utc>,
}

/// An execution instance of a pinned WorkflowVersion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub tenant_id: TenantId,
    pub workflow_version: WorkflowVersionId,
    pub start_step_id: Option<StepId>,
    pub trigger_type: TriggerType,
    pub status: RunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub parent_run_id: Option<RunId>,
    pub error_trigger_source: Option<ErrorTriggerSource>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        tenant_id: TenantId,
        workflow_version: WorkflowVersionId,
        trigger_type: TriggerType,
        input: Value,
    ) -> Self {
        Self {
            id: RunId::new(),
            tenant_id,
            workflow_version,
            start_step_id: None,
            trigger_type,
            status: RunStatus::Pending,
            input,
            output: None,
            error: None,
            parent_run_id: None,
            error_trigger_source: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn child_for_error_workflow(
        tenant_id: TenantId,
        workflow_version: WorkflowVersionId,
        error_trigger_source: ErrorTriggerSource,
    ) -> Self {
        let input = serde_json::to_value(&error_trigger_source).unwrap_or(Value::Null);
        let mut run = Self::new(tenant_id, workflow_version, TriggerType::Internal, input);
        run.parent_run_id = Some(error_trigger_source.original_run_id);
        run.error_trigger_source = Some(error_trigger_source);
        run
    }

    /// pending -> running, recorded once on first dispatch.
    pub fn mark_running(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self, output: Value) {
        self.status = RunStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}
