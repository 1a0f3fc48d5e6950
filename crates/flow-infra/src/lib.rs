//! flow-infra: the composition root. Assembles a `Scheduler` over a chosen
//! `RunStore`/`CredentialVault`/`LlmProvider` and drives runs through it
//! under two policies the core itself stays agnostic to: a run-wide
//! deadline and a bounded worker pool. The DAG engine hands those concerns
//! to its caller instead of baking them into the scheduler.
//!
//! `Engine::submit` is the single entry point: build the `GraphModel`,
//! validate it, acquire a worker-pool permit, then drive the run under
//! `tokio::time::timeout`.

use std::sync::Arc;
use std::time::Duration;

use flow_core::errors::CoreEngineError;
use flow_core::graph::GraphModel;
use flow_core::scheduler::{Collaborators, DriveOutcome, Scheduler};
use flow_core::validator;
use flow_domain::{BlockDefinitionSet, Run, WorkflowVersion};
use log::warn;
use tokio::sync::Semaphore;

/// Bounds applied uniformly to every run this `Engine` drives, independent
/// of anything a workflow's own steps configure.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of runs admitted into `Scheduler::run` concurrently;
    /// further `submit` calls queue on the admission semaphore.
    pub max_concurrent_runs: usize,
    /// Wall-clock budget for an entire run, independent of any individual
    /// step's own `timeout_ms`, which bounds a single attempt rather than
    /// the whole run.
    pub run_deadline_ms: u64,
}

impl EngineConfig {
    /// Reads `FLOW_MAX_CONCURRENT_RUNS` (default 16) and `FLOW_RUN_DEADLINE_MS`
    /// (default 30 minutes) from the environment.
    pub fn from_env() -> Self {
        let max_concurrent_runs = std::env::var("FLOW_MAX_CONCURRENT_RUNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);
        let run_deadline_ms = std::env::var("FLOW_RUN_DEADLINE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30 * 60 * 1000);
        Self { max_concurrent_runs, run_deadline_ms }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_concurrent_runs: 16, run_deadline_ms: 30 * 60 * 1000 }
    }
}

/// Wires the external collaborators to the scheduler and enforces
/// the run-wide bounds `EngineConfig` describes. One `Engine` is shared
/// across every run a process drives; `Collaborators` is already `Clone`
/// (cheap `Arc` clones) so cloning it per run is free.
#[derive(Clone)]
pub struct Engine {
    collaborators: Collaborators,
    config: EngineConfig,
    admission: Arc<Semaphore>,
}

impl Engine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
        Self { collaborators, config, admission }
    }

    /// The `RunStore` this engine drives runs against, so a caller (e.g. the
    /// CLI) can read back the `StepRun` trace after `submit` returns.
    pub fn store(&self) -> Arc<dyn flow_core::contracts::RunStore> {
        self.collaborators.store.clone()
    }

    /// Builds and validates the `GraphModel`, then drives `run` to
    /// completion or the configured deadline, whichever comes first.
    /// Blocks (async) on the admission semaphore if `max_concurrent_runs`
    /// runs are already in flight.
    pub async fn submit(
        &self,
        version: WorkflowVersion,
        definitions: &BlockDefinitionSet,
        run: &mut Run,
    ) -> Result<DriveOutcome, CoreEngineError> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| CoreEngineError::Internal("admission semaphore closed".into()))?;

        let graph = Arc::new(GraphModel::build(version, definitions)?);
        validator::validate(&graph)?;
        let scheduler = Scheduler::new(graph, self.collaborators.clone());

        let deadline = Duration::from_millis(self.config.run_deadline_ms);
        match tokio::time::timeout(deadline, scheduler.run(run)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("run {} exceeded its {}ms deadline", run.id, self.config.run_deadline_ms);
                run.mark_failed(format!("run exceeded {}ms deadline", self.config.run_deadline_ms));
                self.collaborators.store.upsert_run(run).await?;
                Err(CoreEngineError::SystemTimeout)
            }
        }
    }
}

/// Assembles an `Engine` whose `RunStore` is `flow-adapters`' in-memory
/// store and whose `LlmProvider`/`CredentialVault` are the HTTP clients in
/// `flow-providers`, configured from the environment. Intended for the CLI
/// demo and local development; production deployments swap in
/// `flow-persistence::PgRunStore` (see `pg_engine` below, gated behind the
/// `pg_demo` root-package feature since it requires a live database).
pub fn dev_engine() -> Result<Engine, CoreEngineError> {
    let store = Arc::new(flow_adapters::InMemoryRunStore::new());
    let vault = Arc::new(flow_adapters::StaticCredentialVault::new());
    let sandbox = Arc::new(flow_adapters::EchoSandbox);
    let builtins = Arc::new(flow_adapters::StandardBuiltinRegistry);
    let llm: Arc<dyn flow_core::contracts::LlmProvider> =
        match flow_providers::HttpLlmProvider::from_env() {
            Ok(p) => Arc::new(p),
            Err(_) => Arc::new(flow_providers::HttpLlmProvider::new()),
        };
    let collaborators = Collaborators::new(sandbox, vault, builtins, llm, store)
        .with_audit(Arc::new(flow_adapters::LogAuditSink::new()));
    Ok(Engine::new(collaborators, EngineConfig::from_env()))
}

/// Assembles an `Engine` backed by `flow-persistence::PgRunStore` against
/// `DATABASE_URL`, and `flow-providers::HttpCredentialVault` against
/// `VAULT_BASE_URL`. Requires a live Postgres instance; only exercised by
/// the root package's `pg_demo` feature, never by `flow-infra`'s own tests.
pub fn pg_engine() -> Result<Engine, CoreEngineError> {
    let pool = flow_persistence::build_dev_pool_from_env()?;
    let store = Arc::new(flow_persistence::PgRunStore::new(flow_persistence::PoolProvider { pool }));
    let vault: Arc<dyn flow_core::contracts::CredentialVault> = match flow_providers::HttpCredentialVault::from_env() {
        Ok(v) => Arc::new(v),
        Err(_) => Arc::new(flow_adapters::StaticCredentialVault::new()),
    };
    let sandbox = Arc::new(flow_adapters::EchoSandbox);
    let builtins = Arc::new(flow_adapters::StandardBuiltinRegistry);
    let llm = Arc::new(flow_providers::HttpLlmProvider::from_env()?);
    let collaborators = Collaborators::new(sandbox, vault, builtins, llm, store)
        .with_audit(Arc::new(flow_adapters::LogAuditSink::new()));
    Ok(Engine::new(collaborators, EngineConfig::from_env()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::{Run, Step, StepType, TenantId, TriggerType, WorkflowVersion};
    use serde_json::json;

    fn trivial_version() -> (WorkflowVersion, BlockDefinitionSet) {
        let step = Step::new("log_it", StepType::Log).unwrap().with_config(json!({"message": "hi"}));
        let version = WorkflowVersion::new(TenantId::new(), 1).with_steps(vec![step]);
        (version, BlockDefinitionSet { definitions: vec![] })
    }

    #[tokio::test]
    async fn submit_drives_a_trivial_run_to_completion() {
        let engine = dev_engine().expect("dev engine");
        let (version, defs) = trivial_version();
        let mut run = Run::new(TenantId::new(), version.id, TriggerType::Test, json!({}));
        let outcome = engine.submit(version, &defs, &mut run).await.expect("submit");
        assert!(matches!(outcome, DriveOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn admission_semaphore_serializes_over_capacity_submissions() {
        let config = EngineConfig { max_concurrent_runs: 1, ..EngineConfig::default() };
        let engine = Engine::new(dev_engine().unwrap().collaborators, config);
        let (version, defs) = trivial_version();
        let mut run_a = Run::new(TenantId::new(), version.id, TriggerType::Test, json!({}));
        let outcome = engine.submit(version.clone(), &defs, &mut run_a).await.expect("submit a");
        assert!(matches!(outcome, DriveOutcome::Completed(_)));
        let mut run_b = Run::new(TenantId::new(), version.id, TriggerType::Test, json!({}));
        let outcome_b = engine.submit(version, &defs, &mut run_b).await.expect("submit b");
        assert!(matches!(outcome_b, DriveOutcome::Completed(_)));
    }
}
