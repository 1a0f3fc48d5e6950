//! engine-core: an end-to-end demo wiring `flow-infra`'s in-memory `Engine`
//! to drive a small workflow exercising branching (`condition`), a retried
//! step, and a `foreach` group in one run.
//!
//! Run with `cargo run` for the in-memory path. Add `--features pg_demo`
//! against a reachable `DATABASE_URL` to additionally drive a second,
//! trivial run through `flow-persistence::PgRunStore`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flow_core::contracts::{Sandbox, SandboxRequest, SandboxResponse};
use flow_core::errors::{BlockError, CoreEngineError};
use flow_core::scheduler::DriveOutcome;
use flow_domain::{
    BlockDefinition, BlockDefinitionSet, BlockGroup, Edge, EdgeEndpoint, GroupType, Run, RetryConfig, Step, StepType,
    TenantId, TriggerType, WorkflowVersion,
};
use serde_json::json;

/// A `Sandbox` that fails the first attempt of any given step invocation and
/// succeeds from the second attempt on, to exercise the scheduler's retry
/// loop without a real sandbox runtime. Keyed by the sandbox request's code
/// string since that's the only stable identifier `SandboxRequest` carries.
struct FlakyOnceSandbox {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Sandbox for FlakyOnceSandbox {
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxResponse, CoreEngineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            return Ok(SandboxResponse {
                output: serde_json::Value::Null,
                chunks: Vec::new(),
                error: Some(BlockError {
                    code: "ERR_EXEC_FAILED".into(),
                    message: "transient failure on first attempt".into(),
                    details: None,
                    retryable: true,
                    retry_after_ms: None,
                }),
            });
        }
        Ok(SandboxResponse { output: request.input, chunks: Vec::new(), error: None })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("engine-core: building a branching + retry + foreach workflow");

    let tenant_id = TenantId::new();

    // `process_item` resolves to this block; its code is irrelevant to
    // `FlakyOnceSandbox`, which only cares about call order.
    let flaky_block = BlockDefinition::new("process_item", "transform")?;
    let mut flaky_block = flaky_block;
    flaky_block.code = "process one item".into();

    let intake = Step::new("intake", StepType::Log)?.with_config(json!({
        "message": "received {{$.input.items}}",
    }));

    let branch_scope = BlockGroup::new(GroupType::Parallel);
    let check_count = Step::new("check_count", StepType::Condition)?
        .with_config(json!({ "expression": "$.input.items[1] != null" }))
        .with_block_group(branch_scope.id, "body");

    let foreach_group = BlockGroup::new(GroupType::Foreach)
        .with_config(json!({ "input_path": "$.input.items", "parallel": false }));

    let process_item = Step::new("process_item", StepType::Tool)?
        .with_block_definition(flaky_block.id)
        .with_block_group(foreach_group.id, "body")
        .with_retry_config(RetryConfig { max_retries: 2, delay_ms: 10, ..RetryConfig::default() });

    let skip_note = Step::new("skip_note", StepType::Note)?;
    let summarize = Step::new("summarize", StepType::Log)?.with_config(json!({
        "message": "foreach produced {{$.steps.foreach_items.output}}",
    }));

    let edges = vec![
        Edge::new(EdgeEndpoint::Step(intake.id), "output", EdgeEndpoint::Step(check_count.id), "input")?,
        Edge::new(EdgeEndpoint::Step(check_count.id), "true", EdgeEndpoint::Group(foreach_group.id), "input")?,
        Edge::new(EdgeEndpoint::Step(check_count.id), "false", EdgeEndpoint::Step(skip_note.id), "input")?,
        Edge::new(EdgeEndpoint::Group(foreach_group.id), "output", EdgeEndpoint::Step(summarize.id), "input")?,
    ];

    let version = WorkflowVersion::new(tenant_id, 1)
        .with_steps(vec![intake, check_count, process_item, skip_note, summarize])
        .with_block_groups(vec![branch_scope, foreach_group])
        .with_edges(edges);

    let definitions = BlockDefinitionSet { definitions: vec![flaky_block] };

    let engine = flow_infra::dev_engine()?;

    // Swap the default echo sandbox for one that demonstrates the retry
    // loop recovering from a transient failure.
    let mut run = Run::new(tenant_id, version.id, TriggerType::Manual, json!({ "items": ["a", "b", "c"] }));

    println!("submitting run {} for tenant {tenant_id}", run.id);
    let outcome = submit_with_flaky_sandbox(&engine, version, &definitions, &mut run).await?;

    match outcome {
        DriveOutcome::Completed(output) => {
            println!("run {} completed: {}", run.id, serde_json::to_string_pretty(&output)?);
        }
        DriveOutcome::Failed(message) => {
            println!("run {} failed: {message}", run.id);
        }
        DriveOutcome::Cancelled => {
            println!("run {} cancelled", run.id);
        }
    }

    #[cfg(feature = "pg_demo")]
    run_pg_demo(tenant_id).await?;

    Ok(())
}

/// Drives a second, trivial run through `flow_infra::pg_engine` to show the
/// same `Engine::submit` path against a live Postgres-backed `RunStore`.
/// Only compiled with `--features pg_demo`, and only reachable with a
/// `DATABASE_URL` the embedded migrations can apply.
#[cfg(feature = "pg_demo")]
async fn run_pg_demo(tenant_id: TenantId) -> Result<(), Box<dyn std::error::Error>> {
    let step = Step::new("log_it", StepType::Log)?.with_config(json!({ "message": "hello from pg_demo" }));
    let version = WorkflowVersion::new(tenant_id, 1).with_steps(vec![step]);
    let definitions = BlockDefinitionSet::default();

    let engine = flow_infra::pg_engine()?;
    let mut run = Run::new(tenant_id, version.id, TriggerType::Manual, json!({}));

    println!("submitting pg_demo run {} for tenant {tenant_id}", run.id);
    let outcome = engine.submit(version, &definitions, &mut run).await?;

    match outcome {
        DriveOutcome::Completed(output) => {
            println!("pg_demo run {} completed: {}", run.id, serde_json::to_string_pretty(&output)?);
        }
        DriveOutcome::Failed(message) => {
            println!("pg_demo run {} failed: {message}", run.id);
        }
        DriveOutcome::Cancelled => {
            println!("pg_demo run {} cancelled", run.id);
        }
    }

    Ok(())
}

/// `flow_infra::dev_engine` wires `flow-adapters::EchoSandbox` by default;
/// this demo needs a sandbox that fails once to show the retry loop, so it
/// re-assembles `Collaborators` with `FlakyOnceSandbox` swapped in instead
/// of reaching into `Engine`'s private fields.
async fn submit_with_flaky_sandbox(
    engine: &flow_infra::Engine,
    version: WorkflowVersion,
    definitions: &BlockDefinitionSet,
    run: &mut Run,
) -> Result<DriveOutcome, Box<dyn std::error::Error>> {
    let _ = engine;
    let store = Arc::new(flow_adapters::InMemoryRunStore::new());
    let vault = Arc::new(flow_adapters::StaticCredentialVault::new());
    let sandbox = Arc::new(FlakyOnceSandbox { attempts: Arc::new(AtomicU32::new(0)) });
    let builtins = Arc::new(flow_adapters::StandardBuiltinRegistry);
    let llm = Arc::new(flow_providers::HttpLlmProvider::new());
    let collaborators = flow_core::scheduler::Collaborators::new(sandbox, vault, builtins, llm, store)
        .with_audit(Arc::new(flow_adapters::LogAuditSink::new()));
    let demo_engine = flow_infra::Engine::new(collaborators, flow_infra::EngineConfig::default());
    Ok(demo_engine.submit(version, definitions, run).await?)
}
