//! `EchoSandbox`: a `Sandbox` that doesn't actually run user code — it
//! echoes `input` back as `output`, for tests and the CLI demo where no real
//! sandbox runtime is wired up. A production deployment swaps this for a
//! process- or container-isolated executor; the sandbox runtime is always
//! an external system from the core's point of view.

use async_trait::async_trait;

use flow_core::contracts::{Sandbox, SandboxRequest, SandboxResponse};
use flow_core::errors::CoreEngineError;

#[derive(Default)]
pub struct EchoSandbox;

impl EchoSandbox {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sandbox for EchoSandbox {
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxResponse, CoreEngineError> {
        Ok(SandboxResponse { output: request.input, chunks: Vec::new(), error: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn echoes_input_as_output() {
        let sandbox = EchoSandbox::new();
        let request = SandboxRequest {
            code: "noop".into(),
            pre_process_chain: Vec::new(),
            post_process_chain: Vec::new(),
            input: json!({ "a": 1 }),
            capability: json!({}),
            timeout_ms: 1_000,
        };
        let response = sandbox.execute(request).await.unwrap();
        assert_eq!(response.output, json!({ "a": 1 }));
    }
}
