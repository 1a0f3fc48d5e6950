//! `while` group: evaluates `config.condition` before each
//! iteration, or after when `config.do_while=true`, bounded by
//! `config.max_iterations` (default 100). Iteration
//! context exposes `$iteration`. Group output is the last body output.

use flow_domain::{BlockGroup, RunId, TenantId};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::BlockError;
use crate::expression;
use crate::scheduler::{DriveOutcome, Scheduler, StepOutcomeLike};

use super::{cancelled, drive_body, exec_failed, input_context};

pub async fn execute(
    scheduler: &Scheduler,
    tenant_id: TenantId,
    run_id: RunId,
    group: &BlockGroup,
    input: Value,
    cancel: CancellationToken,
) -> Result<StepOutcomeLike, BlockError> {
    let condition = group.config.get("condition").and_then(Value::as_str).unwrap_or("true").to_string();
    let do_while = group.config.get("do_while").and_then(Value::as_bool).unwrap_or(false);
    let max_iterations = group
        .config
        .get("max_iterations")
        .and_then(Value::as_u64)
        .unwrap_or(crate::constants::DEFAULT_WHILE_MAX_ITERATIONS as u64);

    let mut ctx = input_context(input);
    let mut last_output = Value::Null;
    let mut iteration: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        if !do_while {
            let ctx_root = ctx.as_value();
            if !expression::evaluate_condition(&condition, &ctx_root) {
                break;
            }
        }

        if iteration >= max_iterations {
            return Err(BlockError {
                code: "ERR_SYSTEM_TIMEOUT".into(),
                message: format!("while group exceeded max_iterations ({max_iterations})"),
                details: None,
                retryable: false,
                retry_after_ms: None,
            });
        }

        ctx = ctx.with_iteration_root(json!({ "iteration": iteration }));
        let mut group_run = super::start_group_run(scheduler, run_id, group.id, Some(iteration), ctx.as_value()).await;
        let body_result = drive_body(scheduler, tenant_id, run_id, group.id, ctx.clone(), cancel.clone(), true)
            .await
            .map_err(|e| exec_failed(e.to_string()));

        let iteration_result = body_result.and_then(|(outcome, next_ctx)| {
            ctx = next_ctx;
            match outcome {
                DriveOutcome::Completed(output) => Ok(output),
                DriveOutcome::Failed(msg) => Err(exec_failed(format!("iteration {iteration} failed: {msg}"))),
                DriveOutcome::Cancelled => Err(cancelled()),
            }
        });

        let as_outcome = iteration_result
            .as_ref()
            .map(|output| StepOutcomeLike { port: "output".into(), output: output.clone() })
            .map_err(Clone::clone);
        super::finish_group_run(scheduler, &mut group_run, &as_outcome).await;

        last_output = iteration_result?;
        iteration += 1;

        if do_while {
            let ctx_root = ctx.as_value();
            if !expression::evaluate_condition(&condition, &ctx_root) {
                break;
            }
        }
    }

    Ok(StepOutcomeLike { port: "output".into(), output: last_output })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediately_false_condition_runs_zero_iterations() {
        // Pure boundary check on the guard, independent of the scheduler:
        // a `false` literal condition never evaluates truthy.
        let ctx_root = json!({ "input": {}, "steps": {}, "vars": {}, "secret": null });
        assert!(!expression::evaluate_condition("false", &ctx_root));
    }
}
