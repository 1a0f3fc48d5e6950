//! flow-core: the DAG execution core.
//!
//! Fuses graph topology validation, an event-driven scheduler that
//! propagates readiness across step and group boundaries, per-step
//! execution against a capability API, retry/backoff, cancellation,
//! structured failure propagation via typed ports, nested control-flow
//! (loops, try/catch, parallel, agent ReAct), and the Error Workflow Binder.
//!
//! Components:
//! - `graph`: Graph Model (§4.1) — indexed `WorkflowVersion` + block
//!   inheritance resolution.
//! - `validator`: Validator (§4.2) — structural rejection rules.
//! - `expression`: Expression Engine (§4.3) — path resolution and condition
//!   evaluation.
//! - `context`: the `$`-rooted run context the Expression Engine reads.
//! - `executor`: Step Executor (§4.5).
//! - `groups`: Group Executors (§4.6) — parallel, try_catch, foreach, while,
//!   agent.
//! - `scheduler`: Scheduler (§4.7) — the event loop driving a run or a
//!   group's sub-DAG to completion.
//! - `error_workflow`: Error Workflow Binder (§4.9).
//! - `contracts`: external-collaborator traits (§6): `RunStore`,
//!   `CredentialVault`, `Sandbox`, `LlmProvider`, `BuiltinRegistry`,
//!   `AuditSink` (§1: the core defines the sink interface; the sink itself —
//!   a log stream, an append-only table — is out of scope).
//! - `errors`: the core error taxonomy (§7) and typed `BlockError`.
//! - `hashing`: canonical JSON + hashing, used by `flow-policies` to produce
//!   auditable retry decisions.
//! - `injection`: deterministic JSON merge, used for context/config overlay.
//! - `constants`: fixed bounds (inheritance depth, default loop caps).

pub mod constants;
pub mod context;
pub mod contracts;
pub mod error_workflow;
pub mod errors;
pub mod executor;
pub mod expression;
pub mod graph;
pub mod groups;
pub mod hashing;
pub mod injection;
pub mod scheduler;
pub mod validator;

pub use contracts::{
    AuditEvent, AuditSink, BuiltinRegistry, ChatMessage, ChatRequest, ChatResponse, CredentialVault, LlmProvider,
    NoopAuditSink, RunStore, Sandbox, SandboxRequest, SandboxResponse, ToolCall, ToolSpec, Usage, VaultError,
};
pub use context::RunContext;
pub use errors::{BlockError, CoreEngineError};
pub use executor::{StepExecutor, StepOutcome};
pub use graph::{GraphModel, ResolvedBlock};
pub use injection::merge_json;
pub use scheduler::{Collaborators, DriveOutcome, Scheduler};
