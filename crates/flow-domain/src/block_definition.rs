use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block_group::GroupType;
use crate::error::DomainError;
use crate::ids::BlockDefinitionId;

/// A named input or output channel on a step or group. `is_default` marks
/// the port selected when a step doesn't name one explicitly: the unique
/// `is_default=true` entry, or else the port literally named `output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub schema: Option<Value>,
    pub is_default: bool,
}

impl Port {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), schema: None, is_default: false }
    }

    pub fn default_port(name: impl Into<String>) -> Self {
        Self { name: name.into(), schema: None, is_default: true }
    }
}

/// A user- or system-authored executable block.
/// This is the *raw*, unresolved form as stored; the inheritance-resolved
/// form (pre/post-process chains, resolved code, merged defaults) is
/// produced by the Graph Model, not stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub id: BlockDefinitionId,
    pub slug: String,
    pub category: String,
    pub config_schema: Option<Value>,
    pub config_defaults: Value,
    /// Empty string means "no code at this level" — inheritance resolution
    /// walks to the nearest ancestor where this isn't empty.
    pub code: String,
    pub pre_process: Option<String>,
    pub post_process: Option<String>,
    pub internal_steps: Option<Value>,
    pub input_ports: Vec<Port>,
    pub output_ports: Vec<Port>,
    pub required_credentials: Vec<String>,
    pub parent_block_id: Option<BlockDefinitionId>,
    pub group_kind: Option<GroupType>,
}

impl BlockDefinition {
    pub fn new(slug: impl Into<String>, category: impl Into<String>) -> Result<Self, DomainError> {
        let slug = slug.into();
        if slug.trim().is_empty() {
            return Err(DomainError::ValidationError("block slug must not be empty".into()));
        }
        Ok(Self {
            id: BlockDefinitionId::new(),
            slug,
            category: category.into(),
            config_schema: None,
            config_defaults: Value::Null,
            code: String::new(),
            pre_process: None,
            post_process: None,
            internal_steps: None,
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            required_credentials: Vec::new(),
            parent_block_id: None,
            group_kind: None,
        })
    }

    /// A block with empty code can still be a parent (it contributes
    /// defaults/ports); it just isn't itself inheritable as code source.
    /// A block may not be a parent at all once marked non-inheritable — the
    /// spec calls this "a non-inheritable block (empty code) may not be a
    /// parent" for the *code* portion of resolution, enforced by the Graph
    /// Model walking past it rather than here.
    pub fn with_parent(mut self, parent_block_id: BlockDefinitionId) -> Result<Self, DomainError> {
        if parent_block_id == self.id {
            return Err(DomainError::ValidationError(format!(
                "block {} cannot be its own parent",
                self.id
            )));
        }
        self.parent_block_id = Some(parent_block_id);
        Ok(self)
    }

    pub fn default_output_port(&self) -> Option<&Port> {
        self.output_ports
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.output_ports.iter().find(|p| p.name == "output"))
    }
}
