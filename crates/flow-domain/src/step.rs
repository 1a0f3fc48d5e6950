use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::DomainError;
use crate::ids::{BlockDefinitionId, BlockGroupId, CredentialId, StepId};
use crate::retry::RetryConfig;

/// One of the fixed step kinds a `BlockDefinition` may be dispatched for.
/// Branching kinds (`Condition`, `Switch`) are the only ones the Validator
/// requires to live inside a group when they carry more than one outgoing
/// port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Start,
    Llm,
    Tool,
    Condition,
    Switch,
    Map,
    Join,
    Subflow,
    Wait,
    Function,
    Router,
    HumanInLoop,
    Filter,
    Split,
    Aggregate,
    Error,
    Note,
    Log,
}

impl StepType {
    /// Branching kinds may require group membership depending on their
    /// resolved port count; that count is only known once edges are loaded,
    /// so this flags the *kind*, not the final verdict.
    pub fn is_branching_kind(self) -> bool {
        matches!(self, StepType::Condition | StepType::Switch)
    }
}

/// A vertex in a WorkflowVersion's graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub name: String,
    pub step_type: StepType,
    pub block_definition_id: Option<BlockDefinitionId>,
    pub config: Value,
    pub block_group_id: Option<BlockGroupId>,
    /// Free-form role the owning group assigns (e.g. "body", "catch",
    /// "branch"); interpretation belongs to the group executor.
    pub group_role: Option<String>,
    /// Binding name -> credential id. Weak reference; the Vault owns the
    /// decrypted material.
    pub credential_bindings: HashMap<String, CredentialId>,
    pub retry_config: Option<RetryConfig>,
}

impl Step {
    pub fn new(name: impl Into<String>, step_type: StepType) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::ValidationError("step name must not be empty".into()));
        }
        Ok(Self {
            id: StepId::new(),
            name,
            step_type,
            block_definition_id: None,
            config: Value::Null,
            block_group_id: None,
            group_role: None,
            credential_bindings: HashMap::new(),
            retry_config: None,
        })
    }

    pub fn with_block_group(mut self, group_id: BlockGroupId, role: impl Into<String>) -> Self {
        self.block_group_id = Some(group_id);
        self.group_role = Some(role.into());
        self
    }

    pub fn with_block_definition(mut self, block_definition_id: BlockDefinitionId) -> Self {
        self.block_definition_id = Some(block_definition_id);
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = Some(retry_config);
        self
    }
}
