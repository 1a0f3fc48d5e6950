//! `InMemoryRunStore`: a `dashmap`-backed `RunStore` with no durability,
//! used by tests and the CLI demo. `flow-persistence` provides the
//! Postgres-backed equivalent for production.

use async_trait::async_trait;
use dashmap::DashMap;

use flow_core::errors::CoreEngineError;
use flow_core::RunStore;
use flow_domain::{
    BlockDefinition, BlockDefinitionSet, BlockGroupRun, BlockGroupRunId, Run, RunId, StepRun, StepRunId, TenantId,
    WorkflowVersion, WorkflowVersionId,
};

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: DashMap<RunId, Run>,
    step_runs: DashMap<StepRunId, StepRun>,
    step_runs_by_run: DashMap<RunId, Vec<StepRunId>>,
    group_runs: DashMap<BlockGroupRunId, BlockGroupRun>,
    group_runs_by_run: DashMap<RunId, Vec<BlockGroupRunId>>,
    versions: DashMap<WorkflowVersionId, WorkflowVersion>,
    definitions: DashMap<(TenantId, String), BlockDefinition>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a version so `find_workflow_version`/`block_definitions_for`
    /// can resolve it; the production adapter would instead read from its
    /// backing table.
    pub fn put_workflow_version(&self, version: WorkflowVersion) {
        self.versions.insert(version.id, version);
    }

    pub fn put_block_definition(&self, tenant_id: TenantId, definition: BlockDefinition) {
        self.definitions.insert((tenant_id, definition.slug.clone()), definition);
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn upsert_run(&self, run: &Run) -> Result<(), CoreEngineError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, CoreEngineError> {
        Ok(self.runs.get(&id).map(|r| r.clone()))
    }

    async fn append_step_run(&self, step_run: &StepRun) -> Result<(), CoreEngineError> {
        self.step_runs.insert(step_run.id, step_run.clone());
        self.step_runs_by_run.entry(step_run.run_id).or_default().push(step_run.id);
        Ok(())
    }

    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), CoreEngineError> {
        self.step_runs.insert(step_run.id, step_run.clone());
        Ok(())
    }

    async fn list_step_runs(&self, run_id: RunId) -> Result<Vec<StepRun>, CoreEngineError> {
        let ids = self.step_runs_by_run.get(&run_id).map(|v| v.clone()).unwrap_or_default();
        Ok(ids.into_iter().filter_map(|id| self.step_runs.get(&id).map(|r| r.clone())).collect())
    }

    async fn get_step_run(&self, id: StepRunId) -> Result<Option<StepRun>, CoreEngineError> {
        Ok(self.step_runs.get(&id).map(|r| r.clone()))
    }

    async fn upsert_block_group_run(&self, group_run: &BlockGroupRun) -> Result<(), CoreEngineError> {
        let is_new = !self.group_runs.contains_key(&group_run.id);
        self.group_runs.insert(group_run.id, group_run.clone());
        if is_new {
            self.group_runs_by_run.entry(group_run.run_id).or_default().push(group_run.id);
        }
        Ok(())
    }

    async fn list_block_group_runs(&self, run_id: RunId) -> Result<Vec<BlockGroupRun>, CoreEngineError> {
        let ids = self.group_runs_by_run.get(&run_id).map(|v| v.clone()).unwrap_or_default();
        Ok(ids.into_iter().filter_map(|id| self.group_runs.get(&id).map(|r| r.clone())).collect())
    }

    async fn find_workflow_version(&self, id: WorkflowVersionId) -> Result<Option<WorkflowVersion>, CoreEngineError> {
        Ok(self.versions.get(&id).map(|v| v.clone()))
    }

    async fn find_block_definition(
        &self,
        tenant_id: TenantId,
        slug: &str,
    ) -> Result<Option<BlockDefinition>, CoreEngineError> {
        Ok(self.definitions.get(&(tenant_id, slug.to_string())).map(|d| d.clone()))
    }

    async fn block_definitions_for(&self, version: &WorkflowVersion) -> Result<BlockDefinitionSet, CoreEngineError> {
        let mut seen = std::collections::HashSet::new();
        let mut definitions = Vec::new();
        for step in &version.steps {
            let Some(def_id) = step.block_definition_id else { continue };
            let mut current = self
                .definitions
                .iter()
                .find(|e| e.value().id == def_id)
                .map(|e| e.value().clone());
            while let Some(def) = current {
                if !seen.insert(def.id) {
                    break;
                }
                let parent_id = def.parent_block_id;
                definitions.push(def);
                current = parent_id.and_then(|pid| {
                    self.definitions.iter().find(|e| e.value().id == pid).map(|e| e.value().clone())
                });
            }
        }
        Ok(BlockDefinitionSet { definitions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::{TriggerType, WorkflowVersionId};
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_a_run() {
        let store = InMemoryRunStore::new();
        let run = Run::new(TenantId::new(), WorkflowVersionId::new(), TriggerType::Manual, json!({}));
        store.upsert_run(&run).await.unwrap();
        let fetched = store.get_run(run.id).await.unwrap().expect("run present");
        assert_eq!(fetched.id, run.id);
    }

    #[tokio::test]
    async fn lists_step_runs_in_append_order() {
        let store = InMemoryRunStore::new();
        let run_id = RunId::new();
        let step_id = flow_domain::StepId::new();
        for seq in 0..3 {
            let sr = StepRun::new(run_id, step_id, seq, 1, json!({}));
            store.append_step_run(&sr).await.unwrap();
        }
        let listed = store.list_step_runs(run_id).await.unwrap();
        assert_eq!(listed.len(), 3);
    }
}
