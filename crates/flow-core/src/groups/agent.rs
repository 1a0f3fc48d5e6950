//! `agent` group: an LLM ReAct loop whose *tools* are the
//! group's own child steps — each exposed to the provider as a callable tool
//! named by its resolved block slug, with the tool's input JSON schema taken
//! from that block's first declared input port. On each iteration the LLM
//! either returns a final answer (terminating the group) or emits tool
//! calls, each dispatched directly through the `Step Executor` (bypassing
//! edge-driven fan-in — the children are callable leaves here, not a
//! sub-DAG); step outputs fold back into the conversation as `tool` messages.
//! Bounded by `config.max_iterations` (default 30) and `config.memory_window`
//! (default 20 messages); `config.tool_choice` in
//! {auto, none, required}.

use flow_domain::{BlockGroup, EdgeEndpoint, RunId, Step, StepId, TenantId};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::contracts::{ChatMessage, ChatRequest, ToolSpec};
use crate::errors::BlockError;
use crate::executor::StepExecutor;
use crate::scheduler::{Scheduler, StepOutcomeLike, DEFAULT_STEP_TIMEOUT_MS};

use super::cancelled;

pub async fn execute(
    scheduler: &Scheduler,
    tenant_id: TenantId,
    _run_id: RunId,
    group: &BlockGroup,
    input: Value,
    cancel: CancellationToken,
) -> Result<StepOutcomeLike, BlockError> {
    let provider = group.config.get("provider").and_then(Value::as_str).unwrap_or("openai").to_string();
    let model = group.config.get("model").and_then(Value::as_str).unwrap_or("gpt-4o").to_string();
    let system_prompt = group.config.get("system_prompt").and_then(Value::as_str).unwrap_or("").to_string();
    let max_iterations = group
        .config
        .get("max_iterations")
        .and_then(Value::as_u64)
        .unwrap_or(crate::constants::DEFAULT_AGENT_MAX_ITERATIONS as u64);
    let memory_window = group
        .config
        .get("memory_window")
        .and_then(Value::as_u64)
        .unwrap_or(crate::constants::DEFAULT_AGENT_MEMORY_WINDOW as u64) as usize;
    let tool_choice = group.config.get("tool_choice").and_then(Value::as_str).unwrap_or("auto").to_string();

    let tool_steps: Vec<(StepId, Step)> = scheduler
        .graph
        .nodes_in_scope(group.id)
        .into_iter()
        .filter_map(|node| match node {
            EdgeEndpoint::Step(id) => scheduler.graph.step(id).map(|s| (id, s.clone())),
            EdgeEndpoint::Group(_) => None,
        })
        .collect();

    let tools: Vec<ToolSpec> = tool_steps.iter().map(|(id, step)| tool_spec_for(scheduler, *id, step)).collect();

    let mut messages = vec![
        ChatMessage { role: "system".into(), content: system_prompt, tool_call_id: None },
        ChatMessage { role: "user".into(), content: input.to_string(), tool_call_id: None },
    ];

    let mut iteration: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if iteration >= max_iterations {
            return Err(BlockError {
                code: "ERR_SYSTEM_TIMEOUT".into(),
                message: format!("agent group exceeded max_iterations ({max_iterations})"),
                details: None,
                retryable: false,
                retry_after_ms: None,
            });
        }
        iteration += 1;
        trim_to_window(&mut messages, memory_window);

        let response = scheduler
            .collaborators
            .llm
            .chat(ChatRequest {
                provider: provider.clone(),
                model: model.clone(),
                messages: messages.clone(),
                tools: if tool_choice == "none" { Vec::new() } else { tools.clone() },
                options: json!({ "tool_choice": tool_choice }),
            })
            .await
            .map_err(|e| BlockError {
                code: e.code().to_string(),
                message: e.to_string(),
                details: None,
                retryable: !e.forces_non_retryable(),
                retry_after_ms: None,
            })?;

        if response.tool_calls.is_empty() {
            let answer = response.message.unwrap_or_default();
            return Ok(StepOutcomeLike {
                port: "output".into(),
                output: json!({ "answer": answer, "iterations": iteration }),
            });
        }

        messages.push(ChatMessage {
            role: "assistant".into(),
            content: response.message.clone().unwrap_or_default(),
            tool_call_id: None,
        });

        for call in &response.tool_calls {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            let Some((id, step)) = tool_steps.iter().find(|(id, s)| tool_name(scheduler, *id, s) == call.name) else {
                messages.push(ChatMessage {
                    role: "tool".into(),
                    content: format!("unknown tool: {}", call.name),
                    tool_call_id: Some(call.id.clone()),
                });
                continue;
            };

            let executor = StepExecutor::new(&scheduler.graph);
            let ctx_root = Value::Object(serde_json::Map::new());
            let outcome = executor
                .execute(
                    step,
                    tenant_id,
                    call.arguments.clone(),
                    &ctx_root,
                    scheduler.collaborators.vault.as_ref(),
                    scheduler.collaborators.sandbox.as_ref(),
                    scheduler.collaborators.builtins.as_ref(),
                    DEFAULT_STEP_TIMEOUT_MS,
                )
                .await;
            let _ = id;

            let content = match outcome {
                Ok(step_outcome) => step_outcome.output.to_string(),
                Err(block_error) => format!("error: {}", block_error.message),
            };
            messages.push(ChatMessage { role: "tool".into(), content, tool_call_id: Some(call.id.clone()) });
        }
    }
}

fn tool_name(scheduler: &Scheduler, id: StepId, step: &Step) -> String {
    scheduler.graph.resolved_block(id).map(|rb| rb.slug.clone()).unwrap_or_else(|| step.name.clone())
}

fn tool_spec_for(scheduler: &Scheduler, id: StepId, step: &Step) -> ToolSpec {
    let schema = scheduler
        .graph
        .resolved_block(id)
        .and_then(|rb| rb.input_ports.first().and_then(|p| p.schema.clone()))
        .unwrap_or_else(|| json!({ "type": "object" }));
    ToolSpec { name: tool_name(scheduler, id, step), description: step.name.clone(), input_schema: schema }
}

/// Keeps only the system message plus the most recent `window - 1` messages
/// (`config.memory_window`), so a long-running agent doesn't grow its
/// context unboundedly.
fn trim_to_window(messages: &mut Vec<ChatMessage>, window: usize) {
    if window == 0 || messages.len() <= window {
        return;
    }
    let excess = messages.len() - window;
    messages.drain(1..1 + excess);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_keeps_system_message_and_caps_length() {
        let mut messages: Vec<ChatMessage> = (0..25)
            .map(|i| ChatMessage { role: "user".into(), content: i.to_string(), tool_call_id: None })
            .collect();
        messages[0].role = "system".into();
        trim_to_window(&mut messages, 20);
        assert_eq!(messages.len(), 20);
        assert_eq!(messages[0].role, "system");
    }
}
