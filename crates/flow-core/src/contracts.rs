//! External-collaborator contracts. The core depends only on
//! these traits; concrete implementations live in `flow-adapters` (in-memory,
//! for tests/CLI) and `flow-persistence`/`flow-providers` (production).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flow_domain::{
    BlockDefinition, BlockDefinitionSet, BlockGroupRun, CredentialId, CredentialVaultErrorKind, ResolvedCredential,
    Run, RunId, StepRun, StepRunId, TenantId, WorkflowVersion, WorkflowVersionId,
};

use crate::errors::CoreEngineError;

/// Persistence contract. All write
/// operations are atomic per record; the adapter may batch internally but
/// must not partially apply a single call.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn upsert_run(&self, run: &Run) -> Result<(), CoreEngineError>;
    async fn get_run(&self, id: RunId) -> Result<Option<Run>, CoreEngineError>;

    async fn append_step_run(&self, step_run: &StepRun) -> Result<(), CoreEngineError>;
    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), CoreEngineError>;
    async fn list_step_runs(&self, run_id: RunId) -> Result<Vec<StepRun>, CoreEngineError>;
    async fn get_step_run(&self, id: StepRunId) -> Result<Option<StepRun>, CoreEngineError>;

    async fn upsert_block_group_run(&self, group_run: &BlockGroupRun) -> Result<(), CoreEngineError>;
    async fn list_block_group_runs(&self, run_id: RunId) -> Result<Vec<BlockGroupRun>, CoreEngineError>;

    async fn find_workflow_version(&self, id: WorkflowVersionId) -> Result<Option<WorkflowVersion>, CoreEngineError>;
    async fn find_block_definition(
        &self,
        tenant_id: TenantId,
        slug: &str,
    ) -> Result<Option<BlockDefinition>, CoreEngineError>;
    async fn block_definitions_for(&self, version: &WorkflowVersion) -> Result<BlockDefinitionSet, CoreEngineError>;
}

/// Credential Vault contract.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn resolve(&self, tenant_id: TenantId, credential_id: CredentialId) -> Result<ResolvedCredential, VaultError>;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("credential not found")]
    NotFound,
    #[error("credential expired")]
    Expired,
    #[error("credential revoked")]
    Revoked,
    #[error("credential scope invalid for this binding")]
    InvalidScope,
}

impl VaultError {
    pub fn kind(&self) -> CredentialVaultErrorKind {
        match self {
            VaultError::NotFound => CredentialVaultErrorKind::NotFound,
            VaultError::Expired => CredentialVaultErrorKind::Expired,
            VaultError::Revoked => CredentialVaultErrorKind::Revoked,
            VaultError::InvalidScope => CredentialVaultErrorKind::InvalidScope,
        }
    }
}

impl From<VaultError> for CoreEngineError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::NotFound | VaultError::InvalidScope => CoreEngineError::AuthFailed(e.to_string()),
            VaultError::Expired | VaultError::Revoked => CoreEngineError::AuthExpired,
        }
    }
}

/// Sandbox contract: executes user-authored step code against a
/// capability object with a timeout. The capability object's exact shape is
/// assembled by the Step Executor; the sandbox only sees
/// `input` + `capability` as opaque JSON plus a typed streaming callback.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxResponse, CoreEngineError>;
}

pub struct SandboxRequest {
    pub code: String,
    /// Child-first pre-process slugs applied before `code` runs; the
    /// sandbox runtime (external) is responsible for resolving and running
    /// each slug's own code.
    pub pre_process_chain: Vec<String>,
    /// Root-first post-process slugs applied after `code` runs.
    pub post_process_chain: Vec<String>,
    pub input: Value,
    pub capability: Value,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxResponse {
    pub output: Value,
    pub chunks: Vec<Value>,
    pub error: Option<crate::errors::BlockError>,
}

/// LLM provider contract, used by `llm` steps, `router`, and
/// `agent` groups.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, CoreEngineError>;
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub options: Value,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub message: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A registry of built-in step handlers (`wait`, `log`, `note`, `filter`,
/// `split`, `aggregate`, `human_in_loop`, `error`) that don't call out to the
/// sandbox. Implemented in `flow-adapters`.
#[async_trait]
pub trait BuiltinRegistry: Send + Sync {
    /// Returns `None` if `step_type` has no built-in handler (i.e. it must go
    /// through the sandbox instead).
    async fn dispatch(
        &self,
        step_type: flow_domain::StepType,
        config: &Value,
        input: &Value,
        ctx_root: &Value,
    ) -> Option<Result<Value, crate::errors::BlockError>>;
}

/// Audit sink contract. The scheduler and retry loop
/// emit one `AuditEvent` per state transition; the concrete sink (a log
/// stream, an append-only table, a message bus — all external) decides what
/// to do with it. Never consulted for control flow: a sink failure is
/// swallowed, not propagated, so audit emission can't fail a run.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum AuditEvent {
    RunStarted { run_id: RunId, tenant_id: TenantId },
    RunCompleted { run_id: RunId },
    RunFailed { run_id: RunId, message: String },
    RunCancelled { run_id: RunId },
    StepStarted { run_id: RunId, step_name: String, attempt: u32 },
    StepCompleted { run_id: RunId, step_name: String, attempt: u32 },
    StepFailed { run_id: RunId, step_name: String, attempt: u32, error_code: String },
    RetryDecided { run_id: RunId, step_name: String, attempt: u32, should_retry: bool, delay_ms: u64 },
}

/// An `AuditSink` that discards every event — the default when no audit
/// backend is wired up.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) {}
}
