//! Error Workflow Binder: on terminal run failure, spawns a child run bound
//! to the WorkflowVersion's `error_workflow_id`, carrying the parent run id
//! and failing-step context as `error_trigger_source`. Failures of the
//! child do not cascade back to the parent.

use chrono::Utc;
use flow_domain::{ErrorTriggerSource, Run, RunStatus, StepId, WorkflowVersion};

use crate::errors::CoreEngineError;
use crate::graph::GraphModel;
use crate::scheduler::{Collaborators, Scheduler};

/// Binds and runs the error workflow for a terminally-failed parent run, if
/// its pinned WorkflowVersion declares one. No-op (returns `Ok(None)`) if the
/// run didn't fail, or the version has no `error_workflow_id`. The
/// `parent_run_id` chain depth is left unbounded; a workflow whose own
/// error handler fails into another error handler is not guarded against.
pub async fn bind_and_run(
    collaborators: &Collaborators,
    parent_version: &WorkflowVersion,
    parent_run: &Run,
    error_step_id: StepId,
    error_step_name: String,
) -> Result<Option<Run>, CoreEngineError> {
    if parent_run.status != RunStatus::Failed {
        return Ok(None);
    }
    let Some(error_workflow_id) = parent_version.error_workflow_id else {
        return Ok(None);
    };

    let trigger = ErrorTriggerSource {
        original_run_id: parent_run.id,
        original_project: parent_version.id,
        error_step_id,
        error_step_name,
        error_message: parent_run.error.clone().unwrap_or_default(),
        triggered_at: Utc::now(),
    };

    let child_version = collaborators
        .store
        .find_workflow_version(error_workflow_id)
        .await?
        .ok_or_else(|| CoreEngineError::ConfigInvalid(format!("unknown error_workflow_id {error_workflow_id}")))?;

    let mut child_run = Run::child_for_error_workflow(parent_run.tenant_id, child_version.id, trigger);

    let definitions = collaborators.store.block_definitions_for(&child_version).await?;
    let graph = std::sync::Arc::new(GraphModel::build(child_version, &definitions)?);
    let scheduler = Scheduler::new(graph, collaborators.clone());

    if let Err(e) = scheduler.run(&mut child_run).await {
        log::warn!("error workflow run {} failed to execute: {e}", child_run.id);
    }
    Ok(Some(child_run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::{RunStatus, TenantId, WorkflowVersionId};

    #[test]
    fn no_binder_when_version_has_no_error_workflow() {
        let version = WorkflowVersion::new(TenantId::new(), 1);
        let mut run = Run::new(version.tenant_id, version.id, flow_domain::TriggerType::Manual, serde_json::json!({}));
        run.mark_failed("boom");
        assert_eq!(run.status, RunStatus::Failed);
        assert!(version.error_workflow_id.is_none());
    }
}
