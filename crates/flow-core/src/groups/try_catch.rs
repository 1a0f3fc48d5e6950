//! `try_catch` group: runs the body's "try" branch; on an
//! unhandled failure, optionally retries it (`retry_count`/`retry_delay_ms`
//! from `BlockGroup.config`) before falling back to the "catch" branch,
//! identified by `Step::group_role == "catch"`. Emits on the group's
//! `error` port if the catch branch itself runs, so a downstream edge can
//! distinguish a clean pass from a recovered one.

use std::time::Duration;

use flow_domain::{BlockGroup, EdgeEndpoint, RunId, TenantId};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::BlockError;
use crate::scheduler::{DriveOutcome, Scheduler, StepOutcomeLike};

use super::{cancelled, exec_failed, input_context};

pub async fn execute(
    scheduler: &Scheduler,
    tenant_id: TenantId,
    run_id: RunId,
    group: &BlockGroup,
    input: Value,
    cancel: CancellationToken,
) -> Result<StepOutcomeLike, BlockError> {
    let retry_count = group.config.get("retry_count").and_then(Value::as_u64).unwrap_or(0);
    let retry_delay_ms = group.config.get("retry_delay_ms").and_then(Value::as_u64).unwrap_or(0);

    let try_scope: Vec<EdgeEndpoint> = scheduler
        .graph
        .nodes_in_scope(group.id)
        .into_iter()
        .filter(|node| !is_catch_node(scheduler, *node))
        .collect();
    let try_entry = scheduler.graph.entry_nodes(&try_scope);

    let mut attempt = 0u64;
    let (outcome, ctx) = loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let seed_ctx = input_context(input.clone());
        let state = tokio::sync::Mutex::new(crate::scheduler::RunState::from_context(
            seed_ctx,
            super::full_step_names(&scheduler.graph),
        ));
        let result = scheduler
            .drive(&state, tenant_id, run_id, &try_scope, &try_entry, cancel.clone(), true)
            .await
            .map_err(|e| exec_failed(e.to_string()))?;
        let ctx = state.into_inner().ctx;
        if matches!(result, DriveOutcome::Failed(_)) && attempt < retry_count {
            attempt += 1;
            if retry_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
            }
            continue;
        }
        break (result, ctx);
    };

    match outcome {
        DriveOutcome::Completed(output) => Ok(StepOutcomeLike { port: "output".into(), output }),
        DriveOutcome::Cancelled => Err(cancelled()),
        DriveOutcome::Failed(msg) => {
            let catch_scope = scheduler.graph.nodes_in_scope(group.id);
            let catch_nodes: Vec<EdgeEndpoint> =
                catch_scope.into_iter().filter(|node| is_catch_node(scheduler, *node)).collect();
            if catch_nodes.is_empty() {
                return Err(exec_failed(msg));
            }
            let catch_entry = scheduler.graph.entry_nodes(&catch_nodes);
            let mut seed_ctx = ctx;
            seed_ctx.vars = crate::injection::merge_json(&seed_ctx.vars, &json!({ "error": { "message": msg } }));
            let state = tokio::sync::Mutex::new(crate::scheduler::RunState::from_context(
                seed_ctx,
                super::full_step_names(&scheduler.graph),
            ));
            let catch_outcome = scheduler
                .drive(&state, tenant_id, run_id, &catch_nodes, &catch_entry, cancel, true)
                .await
                .map_err(|e| exec_failed(e.to_string()))?;
            match catch_outcome {
                DriveOutcome::Completed(output) => Ok(StepOutcomeLike { port: "error".into(), output }),
                DriveOutcome::Failed(catch_msg) => Err(exec_failed(format!("try failed ({msg}); catch failed ({catch_msg})"))),
                DriveOutcome::Cancelled => Err(cancelled()),
            }
        }
    }
}

fn is_catch_node(scheduler: &Scheduler, node: EdgeEndpoint) -> bool {
    match node {
        EdgeEndpoint::Step(id) => scheduler.graph.step(id).and_then(|s| s.group_role.as_deref()) == Some("catch"),
        EdgeEndpoint::Group(_) => false,
    }
}
