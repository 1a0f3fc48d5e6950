//! `foreach` group: iterates an array resolved from
//! `BlockGroup.config.input_path`, running the body once per item with
//! `$item`/`$index` folded into the iteration context's root. Runs
//! sequentially unless `config.parallel` is set, bounded by
//! `config.max_workers`.

use std::sync::Arc;

use flow_domain::{BlockGroup, RunId, TenantId};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
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
    let input_path = group.config.get("input_path").and_then(Value::as_str).unwrap_or("$.input");
    let items = expression::resolve_path(&json!({ "input": input.clone() }), input_path);
    let items = match items {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };

    let parallel = group.config.get("parallel").and_then(Value::as_bool).unwrap_or(false);
    let max_workers = group.config.get("max_workers").and_then(Value::as_u64).unwrap_or(u64::MAX).max(1);

    if !parallel {
        let mut outputs = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            outputs.push(run_iteration(scheduler, tenant_id, run_id, group, &input, item, index, cancel.clone()).await?);
        }
        return Ok(StepOutcomeLike { port: "output".into(), output: Value::Array(outputs) });
    }

    let semaphore = Arc::new(Semaphore::new(max_workers.min(usize::MAX as u64) as usize));
    let total = items.len();
    let mut joinset: JoinSet<Result<(usize, Value), BlockError>> = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let scheduler = scheduler.clone();
        let group = group.clone();
        let input = input.clone();
        let cancel = cancel.clone();
        let permit = Arc::clone(&semaphore);
        joinset.spawn(async move {
            let _permit = permit.acquire_owned().await.map_err(|_| exec_failed("semaphore closed"))?;
            let output = run_iteration(&scheduler, tenant_id, run_id, &group, &input, item, index, cancel).await?;
            Ok((index, output))
        });
    }

    let mut slots: Vec<Option<Value>> = vec![None; joinset.len()];
    while let Some(joined) = joinset.join_next().await {
        let (index, output) = joined.map_err(|e| exec_failed(format!("foreach task join error: {e}")))??;
        slots[index] = Some(output);
    }
    let outputs: Vec<Value> = slots.into_iter().map(|v| v.unwrap_or(Value::Null)).collect();
    Ok(StepOutcomeLike { port: "output".into(), output: Value::Array(outputs) })
}

async fn run_iteration(
    scheduler: &Scheduler,
    tenant_id: TenantId,
    run_id: RunId,
    group: &BlockGroup,
    input: &Value,
    item: Value,
    index: usize,
    cancel: CancellationToken,
) -> Result<Value, BlockError> {
    let mut group_run = super::start_group_run(scheduler, run_id, group.id, Some(index as u64), item.clone()).await;

    let seed_ctx = input_context(input.clone())
        .with_iteration_root(json!({ "item": item, "index": index, "iteration": index }));
    let result = drive_body(scheduler, tenant_id, run_id, group.id, seed_ctx, cancel, true)
        .await
        .map_err(|e| exec_failed(e.to_string()))
        .and_then(|(outcome, _)| match outcome {
            DriveOutcome::Completed(output) => Ok(output),
            DriveOutcome::Failed(msg) => Err(exec_failed(format!("iteration {index} failed: {msg}"))),
            DriveOutcome::Cancelled => Err(cancelled()),
        });

    let as_outcome = result
        .as_ref()
        .map(|output| StepOutcomeLike { port: "output".into(), output: output.clone() })
        .map_err(Clone::clone);
    super::finish_group_run(scheduler, &mut group_run, &as_outcome).await;

    result
}
