use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::ids::BlockGroupId;

/// Control-flow semantics a `BlockGroup` imposes over its contained steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    Parallel,
    TryCatch,
    Foreach,
    While,
    Agent,
}

/// A container imposing control-flow semantics over its contained steps.
/// Groups nest arbitrarily deep via `parent_group_id`; a cycle through that
/// chain is forbidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockGroup {
    pub id: BlockGroupId,
    pub group_type: GroupType,
    pub config: Value,
    pub parent_group_id: Option<BlockGroupId>,
    /// Slug of a block applied to the group's external input before the body
    /// runs, symmetric with `BlockDefinition::pre_process`.
    pub pre_process: Option<String>,
    pub post_process: Option<String>,
}

impl BlockGroup {
    pub fn new(group_type: GroupType) -> Self {
        Self {
            id: BlockGroupId::new(),
            group_type,
            config: Value::Null,
            parent_group_id: None,
            pre_process: None,
            post_process: None,
        }
    }

    pub fn with_parent(mut self, parent_group_id: BlockGroupId) -> Result<Self, DomainError> {
        if parent_group_id == self.id {
            return Err(DomainError::ValidationError(format!(
                "block group {} cannot be its own parent",
                self.id
            )));
        }
        self.parent_group_id = Some(parent_group_id);
        Ok(self)
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}
