//! `StandardBuiltinRegistry`: handlers for the step kinds the Step Executor
//! dispatches without going through the sandbox: `wait`, `log`, `note`,
//! `filter`, `split`, `aggregate`, `human_in_loop`, `error`.

use async_trait::async_trait;
use serde_json::{json, Value};

use flow_core::errors::BlockError;
use flow_core::expression;
use flow_core::contracts::BuiltinRegistry;
use flow_domain::StepType;

#[derive(Default)]
pub struct StandardBuiltinRegistry;

impl StandardBuiltinRegistry {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuiltinRegistry for StandardBuiltinRegistry {
    async fn dispatch(
        &self,
        step_type: StepType,
        config: &Value,
        input: &Value,
        ctx_root: &Value,
    ) -> Option<Result<Value, BlockError>> {
        let result = match step_type {
            StepType::Wait => wait(config).await,
            StepType::Log => log_step(config, input, ctx_root),
            StepType::Note => Ok(input.clone()),
            StepType::Filter => filter(config, input, ctx_root),
            StepType::Split => split(config, input),
            StepType::Aggregate => aggregate(config, input),
            StepType::HumanInLoop => human_in_loop(config, input),
            StepType::Error => Err(error_step(config)),
            _ => return None,
        };
        Some(result)
    }
}

async fn wait(config: &Value) -> Result<Value, BlockError> {
    let duration_ms = config.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
    tokio::time::sleep(std::time::Duration::from_millis(duration_ms)).await;
    Ok(json!({ "waited_ms": duration_ms }))
}

fn log_step(config: &Value, input: &Value, ctx_root: &Value) -> Result<Value, BlockError> {
    let template = config.get("message").and_then(Value::as_str).unwrap_or("");
    let message = expression::render_template(template, ctx_root);
    let level = config.get("level").and_then(Value::as_str).unwrap_or("info");
    match level {
        "warn" => log::warn!("{message}"),
        "error" => log::error!("{message}"),
        "debug" => log::debug!("{message}"),
        _ => log::info!("{message}"),
    }
    Ok(input.clone())
}

fn filter(config: &Value, input: &Value, ctx_root: &Value) -> Result<Value, BlockError> {
    let condition = config.get("condition").and_then(Value::as_str).unwrap_or("true");
    let items = input.as_array().ok_or_else(|| BlockError {
        code: "ERR_INPUT_INVALID".into(),
        message: "filter requires array input".into(),
        details: None,
        retryable: false,
        retry_after_ms: None,
    })?;

    let mut base = ctx_root.clone();
    let kept: Vec<Value> = items
        .iter()
        .filter(|item| {
            if let Some(obj) = base.as_object_mut() {
                obj.insert("item".into(), (*item).clone());
            }
            expression::evaluate_condition(condition, &base)
        })
        .cloned()
        .collect();
    Ok(Value::Array(kept))
}

fn split(config: &Value, input: &Value) -> Result<Value, BlockError> {
    let size = config.get("size").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
    let items = input.as_array().ok_or_else(|| BlockError {
        code: "ERR_INPUT_INVALID".into(),
        message: "split requires array input".into(),
        details: None,
        retryable: false,
        retry_after_ms: None,
    })?;
    let chunks: Vec<Value> = items.chunks(size).map(|c| Value::Array(c.to_vec())).collect();
    Ok(json!({ "chunks": chunks }))
}

fn aggregate(config: &Value, input: &Value) -> Result<Value, BlockError> {
    let operation = config.get("operation").and_then(Value::as_str).unwrap_or("concat");
    let items = input.as_array().ok_or_else(|| BlockError {
        code: "ERR_INPUT_INVALID".into(),
        message: "aggregate requires array input".into(),
        details: None,
        retryable: false,
        retry_after_ms: None,
    })?;
    let result = match operation {
        "count" => json!(items.len()),
        "sum" => json!(items.iter().filter_map(Value::as_f64).sum::<f64>()),
        _ => Value::Array(items.clone()),
    };
    Ok(result)
}

fn human_in_loop(config: &Value, input: &Value) -> Result<Value, BlockError> {
    let auto_approve = config.get("auto_approve").and_then(Value::as_bool).unwrap_or(false);
    if auto_approve {
        return Ok(input.clone());
    }
    Err(BlockError {
        code: "ERR_EXEC_FAILED".into(),
        message: "human_in_loop requires an external approval signal".into(),
        details: Some(json!({ "requires_approval": true, "input": input })),
        retryable: true,
        retry_after_ms: None,
    })
}

fn error_step(config: &Value) -> BlockError {
    let code = config.get("code").and_then(Value::as_str).unwrap_or("ERR_EXEC_FAILED").to_string();
    let message = config.get("message").and_then(Value::as_str).unwrap_or("explicit error step").to_string();
    BlockError { code, message, details: None, retryable: false, retry_after_ms: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_ctx() -> Value {
        json!({ "input": {}, "steps": {}, "vars": {}, "secret": null })
    }

    #[tokio::test]
    async fn note_passes_input_through() {
        let registry = StandardBuiltinRegistry::new();
        let input = json!({ "a": 1 });
        let out = registry.dispatch(StepType::Note, &json!({}), &input, &empty_ctx()).await.unwrap().unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn filter_keeps_matching_items() {
        let registry = StandardBuiltinRegistry::new();
        let input = json!([1, 2, 3]);
        let config = json!({ "condition": "$item > 1" });
        let out = registry.dispatch(StepType::Filter, &config, &input, &empty_ctx()).await.unwrap().unwrap();
        assert_eq!(out, json!([2, 3]));
    }

    #[tokio::test]
    async fn error_step_always_fails() {
        let registry = StandardBuiltinRegistry::new();
        let config = json!({ "code": "ERR_CUSTOM", "message": "stop" });
        let out = registry.dispatch(StepType::Error, &config, &Value::Null, &empty_ctx()).await.unwrap();
        let err = out.unwrap_err();
        assert_eq!(err.code, "ERR_CUSTOM");
    }

    #[tokio::test]
    async fn unknown_step_type_returns_none() {
        let registry = StandardBuiltinRegistry::new();
        let out = registry.dispatch(StepType::Llm, &json!({}), &Value::Null, &empty_ctx()).await;
        assert!(out.is_none());
    }
}
