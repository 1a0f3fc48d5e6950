use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{BlockGroupId, EdgeId, StepId};

/// An edge endpoint is either a step or a block group, never both — modeling
/// this as an enum instead of two nullable id fields makes "exactly one
/// endpoint kind is set" true by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeEndpoint {
    Step(StepId),
    Group(BlockGroupId),
}

impl EdgeEndpoint {
    pub fn as_step(&self) -> Option<StepId> {
        match self {
            EdgeEndpoint::Step(id) => Some(*id),
            EdgeEndpoint::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<BlockGroupId> {
        match self {
            EdgeEndpoint::Group(id) => Some(*id),
            EdgeEndpoint::Step(_) => None,
        }
    }
}

/// A directed connection between two ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: EdgeEndpoint,
    pub source_port: String,
    pub target: EdgeEndpoint,
    pub target_port: String,
    /// Expression evaluated against the run context; empty/absent means
    /// unconditional.
    pub condition: Option<String>,
}

impl Edge {
    pub fn new(
        source: EdgeEndpoint,
        source_port: impl Into<String>,
        target: EdgeEndpoint,
        target_port: impl Into<String>,
    ) -> Result<Self, DomainError> {
        if let (EdgeEndpoint::Step(s), EdgeEndpoint::Step(t)) = (source, target) {
            if s == t {
                return Err(DomainError::ValidationError(format!(
                    "self-loop on step {s} is forbidden"
                )));
            }
        }
        Ok(Self {
            id: EdgeId::new(),
            source,
            source_port: source_port.into(),
            target,
            target_port: target_port.into(),
            condition: None,
        })
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}
