use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block_definition::BlockDefinition;
use crate::block_group::BlockGroup;
use crate::edge::Edge;
use crate::ids::{TenantId, WorkflowVersionId};
use crate::step::Step;

/// An immutable snapshot of a workflow. Created on
/// publish, never mutated afterward; a `Run` pins exactly one version for its
/// whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: WorkflowVersionId,
    pub version: u32,
    pub tenant_id: TenantId,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    pub block_groups: Vec<BlockGroup>,
    pub error_workflow_id: Option<WorkflowVersionId>,
}

impl WorkflowVersion {
    pub fn new(tenant_id: TenantId, version: u32) -> Self {
        Self {
            id: WorkflowVersionId::new(),
            version,
            tenant_id,
            input_schema: None,
            output_schema: None,
            steps: Vec::new(),
            edges: Vec::new(),
            block_groups: Vec::new(),
            error_workflow_id: None,
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_edges(mut self, edges: Vec<Edge>) -> Self {
        self.edges = edges;
        self
    }

    pub fn with_block_groups(mut self, block_groups: Vec<BlockGroup>) -> Self {
        self.block_groups = block_groups;
        self
    }

    pub fn with_error_workflow(mut self, error_workflow_id: WorkflowVersionId) -> Self {
        self.error_workflow_id = Some(error_workflow_id);
        self
    }
}

/// A resolvable library of block definitions a WorkflowVersion's steps refer
/// to by id. Kept separate from WorkflowVersion itself since definitions are
/// shared (tenant- or system-scoped) rather than owned by one version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockDefinitionSet {
    pub definitions: Vec<BlockDefinition>,
}

impl BlockDefinitionSet {
    pub fn find_by_slug(&self, slug: &str) -> Option<&BlockDefinition> {
        self.definitions.iter().find(|d| d.slug == slug)
    }

    pub fn find_by_id(&self, id: crate::ids::BlockDefinitionId) -> Option<&BlockDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }
}
