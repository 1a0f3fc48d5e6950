//! Step Executor: assembles a step's input, resolves credential
//! bindings, builds the capability object, dispatches to a built-in handler
//! or the sandbox, and selects the output port.

use std::collections::HashMap;

use async_trait::async_trait;
use flow_domain::{CredentialId, Step, StepType, TenantId};
use serde_json::{json, Value};

use crate::contracts::{BuiltinRegistry, CredentialVault, Sandbox, SandboxRequest, VaultError};
use crate::errors::BlockError;
use crate::expression;
use crate::graph::GraphModel;

/// Everything the scheduler needs to know about a step's completed
/// execution: the port it emitted on and its payload.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub port: String,
    pub output: Value,
    pub chunks: Vec<Value>,
}

pub struct StepExecutor<'g> {
    graph: &'g GraphModel,
}

impl<'g> StepExecutor<'g> {
    pub fn new(graph: &'g GraphModel) -> Self {
        Self { graph }
    }

    /// Executes `step` with already-assembled `input` (fan-in / pinned-input
    /// resolution is the scheduler's job) against the
    /// external collaborators.
    pub async fn execute(
        &self,
        step: &Step,
        tenant_id: TenantId,
        input: Value,
        ctx_root: &Value,
        vault: &dyn CredentialVault,
        sandbox: &dyn Sandbox,
        builtins: &dyn BuiltinRegistry,
        timeout_ms: u64,
    ) -> Result<StepOutcome, BlockError> {
        let resolved = self.graph.resolved_block(step.id);

        // Step 2: resolve credential bindings.
        let mut secret_map: HashMap<String, String> = HashMap::new();
        let mut auth_header: Option<String> = None;
        if let Some(rb) = resolved {
            for binding_name in &rb.required_credentials {
                let credential_id: CredentialId = *step
                    .credential_bindings
                    .get(binding_name)
                    .ok_or_else(|| BlockError {
                        code: "ERR_CREDENTIAL_BINDING_MISSING".into(),
                        message: format!("step {} has no binding for '{binding_name}'", step.name),
                        details: None,
                        retryable: false,
                        retry_after_ms: None,
                    })?;
                let resolved_cred = vault
                    .resolve(tenant_id, credential_id)
                    .await
                    .map_err(|e: VaultError| BlockError {
                        code: e.kind_code().to_string(),
                        message: e.to_string(),
                        details: None,
                        retryable: false,
                        retry_after_ms: None,
                    })?;
                if let Some(header) = resolved_cred.auth_header {
                    auth_header = Some(header);
                }
                secret_map.extend(resolved_cred.secret_map);
            }
        }

        // Step 3: build the capability object. `http`,
        // `blocks`, `workflows`, `runs`, `logger`, `streaming` are sandbox-
        // side concerns; the core only supplies the already-resolved data.
        let capability = json!({
            "credentials": { "auth_header": auth_header, "secret_map": secret_map },
            "vars": ctx_root.get("vars").cloned().unwrap_or(Value::Null),
        });

        // Step 4: dispatch. Built-ins are tried first — a step of a built-in
        // type never has sandbox code to run.
        if let Some(result) = builtins.dispatch(step.step_type, &step.config, &input, ctx_root).await {
            let output = result?;
            let port = self.select_port(step, &output, ctx_root);
            return Ok(StepOutcome { port, output, chunks: Vec::new() });
        }

        let Some(rb) = resolved else {
            return Err(BlockError {
                code: "ERR_CONFIG_INVALID".into(),
                message: format!("step {} has neither a built-in handler nor a bound block definition", step.name),
                details: None,
                retryable: false,
                retry_after_ms: None,
            });
        };

        if rb.resolved_code.is_empty() {
            return Err(BlockError {
                code: "ERR_CONFIG_INVALID".into(),
                message: format!("step {} resolves to empty code", step.name),
                details: None,
                retryable: false,
                retry_after_ms: None,
            });
        }

        let request = SandboxRequest {
            code: rb.resolved_code.clone(),
            pre_process_chain: rb.pre_process_chain.clone(),
            post_process_chain: rb.post_process_chain.clone(),
            input,
            capability,
            timeout_ms,
        };

        let response = sandbox.execute(request).await.map_err(|e| BlockError {
            code: e.code().to_string(),
            message: e.to_string(),
            details: None,
            retryable: !e.forces_non_retryable(),
            retry_after_ms: None,
        })?;

        if let Some(err) = response.error {
            return Err(err);
        }

        let port = self.select_port(step, &response.output, ctx_root);
        Ok(StepOutcome { port, output: response.output, chunks: response.chunks })
    }

    /// Replay-determinism entry point: skips credential resolution, the
    /// built-in registry, and the sandbox entirely, returning `pinned_input`
    /// unchanged on the step's default port. Lets a test assert that
    /// replaying a `StepRun` with its recorded `pinned_input` reproduces the
    /// same downstream fan-out without re-invoking any external
    /// collaborator.
    pub fn execute_dry_run(&self, step: &Step, pinned_input: Value, ctx_root: &Value) -> StepOutcome {
        let port = self.select_port(step, &pinned_input, ctx_root);
        StepOutcome { port, output: pinned_input, chunks: Vec::new() }
    }

    /// Step 5: ordinary steps use the default port; branching steps resolve
    /// a named port from their configured expression/case.
    fn select_port(&self, step: &Step, _output: &Value, ctx_root: &Value) -> String {
        match step.step_type {
            StepType::Condition => {
                let expr = step.config.get("expression").and_then(Value::as_str).unwrap_or("");
                if expression::evaluate_condition(expr, ctx_root) { "true".into() } else { "false".into() }
            }
            StepType::Switch => {
                let cases = step.config.get("cases").and_then(Value::as_array);
                if let Some(cases) = cases {
                    for case in cases {
                        let expr = case.get("when").and_then(Value::as_str).unwrap_or("");
                        if expression::evaluate_condition(expr, ctx_root) {
                            if let Some(port) = case.get("port").and_then(Value::as_str) {
                                return port.to_string();
                            }
                        }
                    }
                }
                step.config
                    .get("default_port")
                    .and_then(Value::as_str)
                    .unwrap_or("default")
                    .to_string()
            }
            _ => self
                .graph
                .resolved_block(step.id)
                .and_then(|rb| rb.default_output_port())
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "output".to_string()),
        }
    }
}

impl VaultError {
    fn kind_code(&self) -> &'static str {
        match self {
            VaultError::NotFound => "ERR_AUTH_FAILED",
            VaultError::Expired => "ERR_AUTH_EXPIRED",
            VaultError::Revoked => "ERR_AUTH_EXPIRED",
            VaultError::InvalidScope => "ERR_AUTH_FAILED",
        }
    }
}

#[async_trait]
impl crate::contracts::BuiltinRegistry for () {
    async fn dispatch(
        &self,
        _step_type: StepType,
        _config: &Value,
        _input: &Value,
        _ctx_root: &Value,
    ) -> Option<Result<Value, BlockError>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::{BlockDefinitionSet, TenantId, WorkflowVersion};

    fn graph_with(step: Step) -> GraphModel {
        let version = WorkflowVersion::new(TenantId::new(), 1).with_steps(vec![step]);
        GraphModel::build(version, &BlockDefinitionSet::default()).expect("valid graph")
    }

    #[test]
    fn dry_run_returns_pinned_input_unchanged_without_dispatch() {
        let step = Step::new("echo", StepType::Log).unwrap();
        let graph = graph_with(step.clone());
        let executor = StepExecutor::new(&graph);
        let pinned = json!({ "replayed": true });
        let ctx_root = json!({});
        let outcome = executor.execute_dry_run(&step, pinned.clone(), &ctx_root);
        assert_eq!(outcome.output, pinned);
        assert!(outcome.chunks.is_empty());
    }

    #[test]
    fn dry_run_still_resolves_condition_port_from_config() {
        let step = Step::new("gate", StepType::Condition)
            .unwrap()
            .with_config(json!({ "expression": "$.input.ok == true" }));
        let graph = graph_with(step.clone());
        let executor = StepExecutor::new(&graph);
        let ctx_root = json!({ "input": { "ok": true } });
        let outcome = executor.execute_dry_run(&step, Value::Null, &ctx_root);
        assert_eq!(outcome.port, "true");
    }
}
