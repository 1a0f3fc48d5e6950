//! Entities of the DAG execution core's data model: no execution logic,
//! only the typed shapes the rest of the workspace builds, validates, and
//! replays.

pub mod block_definition;
pub mod block_group;
pub mod block_group_run;
pub mod credential;
pub mod edge;
pub mod error;
pub mod ids;
pub mod retry;
pub mod run;
pub mod step;
pub mod step_run;
pub mod workflow_version;

pub use block_definition::{BlockDefinition, Port};
pub use block_group::{BlockGroup, GroupType};
pub use block_group_run::BlockGroupRun;
pub use credential::{CredentialVaultErrorKind, ResolvedCredential};
pub use edge::{Edge, EdgeEndpoint};
pub use error::DomainError;
pub use ids::{
    BlockDefinitionId, BlockGroupId, BlockGroupRunId, CredentialId, EdgeId, RunId, StepId,
    StepRunId, TenantId, WorkflowVersionId,
};
pub use retry::RetryConfig;
pub use run::{ErrorTriggerSource, Run, RunStatus, TriggerType};
pub use step::{Step, StepType};
pub use step_run::{StepRun, StepRunStatus};
pub use workflow_version::{BlockDefinitionSet, WorkflowVersion};
