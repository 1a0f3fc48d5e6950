//! Group Executors: `parallel`, `try_catch`, `foreach`, `while`,
//! and `agent` each drive a recursive `Scheduler::drive` over the group's
//! body, spawning sub-schedulers that report upward through a single
//! result channel.

pub mod agent;
pub mod foreach;
pub mod parallel;
pub mod try_catch;
pub mod while_loop;

use std::collections::HashMap;

use flow_domain::{BlockGroup, BlockGroupId, BlockGroupRun, EdgeEndpoint, GroupType, RunId, StepId, TenantId};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::errors::BlockError;
use crate::graph::GraphModel;
use crate::scheduler::{DriveOutcome, RunState, Scheduler, StepOutcomeLike};

/// Entry point the scheduler calls for any `EdgeEndpoint::Group` node.
/// Owns the `BlockGroupRun` for this activation: creates it running before
/// dispatching to the group-type-specific executor, then transitions it to
/// completed/failed from that executor's result and persists it through
/// the `RunStore` — the group-lifecycle mirror of what
/// `run_step_with_retries` does for a `StepRun`.
pub async fn run_group(
    scheduler: &Scheduler,
    tenant_id: TenantId,
    run_id: RunId,
    group: &BlockGroup,
    input: Value,
    ctx_root: &Value,
    cancel: CancellationToken,
) -> Result<StepOutcomeLike, BlockError> {
    let _ = ctx_root;
    let mut group_run = start_group_run(scheduler, run_id, group.id, None, input.clone()).await;

    let result = match group.group_type {
        GroupType::Parallel => parallel::execute(scheduler, tenant_id, run_id, group, input, cancel).await,
        GroupType::TryCatch => try_catch::execute(scheduler, tenant_id, run_id, group, input, cancel).await,
        GroupType::Foreach => foreach::execute(scheduler, tenant_id, run_id, group, input, cancel).await,
        GroupType::While => while_loop::execute(scheduler, tenant_id, run_id, group, input, cancel).await,
        GroupType::Agent => agent::execute(scheduler, tenant_id, run_id, group, input, cancel).await,
    };

    finish_group_run(scheduler, &mut group_run, &result).await;
    result
}

/// Creates a `BlockGroupRun` for one group activation (or, for `foreach`/
/// `while`, one iteration when `iteration` is `Some`), marks it running,
/// and persists it. Returned so the caller can transition it once the body
/// finishes.
pub(crate) async fn start_group_run(
    scheduler: &Scheduler,
    run_id: RunId,
    block_group_id: BlockGroupId,
    iteration: Option<u64>,
    input: Value,
) -> BlockGroupRun {
    let mut group_run = BlockGroupRun::new(run_id, block_group_id, iteration, input);
    group_run.mark_running();
    if let Err(e) = scheduler.collaborators.store.upsert_block_group_run(&group_run).await {
        log::warn!("failed to persist block_group_run {} (running): {e}", group_run.id);
    }
    group_run
}

/// Transitions a `BlockGroupRun` to completed/failed from the body's
/// result and persists the update. A cancellation is left `running` on the
/// record the same way a cancelled run leaves in-flight `StepRun`s — the
/// scheduler's own cancellation handling (not this record) is what marks
/// the run terminal.
pub(crate) async fn finish_group_run(
    scheduler: &Scheduler,
    group_run: &mut BlockGroupRun,
    result: &Result<StepOutcomeLike, BlockError>,
) {
    match result {
        Ok(outcome) => group_run.mark_completed(outcome.output.clone()),
        Err(err) if err.code == "ERR_EXEC_CANCELLED" => return,
        Err(err) => group_run.mark_failed(err.message.clone()),
    }
    if let Err(e) = scheduler.collaborators.store.upsert_block_group_run(group_run).await {
        log::warn!("failed to persist block_group_run {} (terminal): {e}", group_run.id);
    }
}

pub(crate) fn full_step_names(graph: &GraphModel) -> HashMap<StepId, String> {
    graph.version.steps.iter().map(|s| (s.id, s.name.clone())).collect()
}

pub(crate) fn scope_and_entry(
    graph: &GraphModel,
    group_id: flow_domain::BlockGroupId,
) -> (Vec<EdgeEndpoint>, Vec<EdgeEndpoint>) {
    let scope = graph.nodes_in_scope(group_id);
    let entry = graph.entry_nodes(&scope);
    (scope, entry)
}

/// Runs one pass over a group's body from a seeded context, returning the
/// sub-drive's `DriveOutcome` plus the context it produced (so callers can
/// read individual body-step outputs, e.g. `try_catch`'s catch detection or
/// `agent`'s tool dispatch).
pub(crate) async fn drive_body(
    scheduler: &Scheduler,
    tenant_id: TenantId,
    run_id: RunId,
    group_id: flow_domain::BlockGroupId,
    seed_ctx: RunContext,
    cancel: CancellationToken,
    fail_fast: bool,
) -> Result<(DriveOutcome, RunContext), crate::errors::CoreEngineError> {
    let (scope, entry) = scope_and_entry(&scheduler.graph, group_id);
    let step_names = full_step_names(&scheduler.graph);
    let state = Mutex::new(RunState::from_context(seed_ctx, step_names));
    let outcome = scheduler.drive(&state, tenant_id, run_id, &scope, &entry, cancel, fail_fast).await?;
    let ctx = state.into_inner().ctx;
    Ok((outcome, ctx))
}

pub(crate) fn exec_failed(message: impl Into<String>) -> BlockError {
    BlockError { code: "ERR_EXEC_FAILED".into(), message: message.into(), details: None, retryable: true, retry_after_ms: None }
}

pub(crate) fn cancelled() -> BlockError {
    BlockError {
        code: "ERR_EXEC_CANCELLED".into(),
        message: "group execution cancelled".into(),
        details: None,
        retryable: false,
        retry_after_ms: None,
    }
}

pub(crate) fn input_context(input: Value) -> RunContext {
    RunContext::new(input)
}
