//! `HttpLlmProvider`: an `LlmProvider` against any OpenAI-compatible chat
//! completions endpoint (OpenAI itself, and the many self-hosted gateways
//! that mirror its wire format). `ChatRequest.provider` only affects which
//! base URL/API key pair is selected when a caller wires up more than one
//! via [`HttpLlmProvider::with_route`]; the wire format is shared.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flow_core::contracts::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, ToolCall, ToolSpec, Usage};
use flow_core::errors::CoreEngineError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct Route {
    base_url: String,
    api_key: String,
}

/// Routes `ChatRequest.provider` names to a base URL + API key, so one
/// `HttpLlmProvider` can serve `openai`, a self-hosted gateway, and a test
/// double simultaneously without the core knowing the difference.
pub struct HttpLlmProvider {
    client: Client,
    routes: HashMap<String, Route>,
    default_route: Option<Route>,
}

impl HttpLlmProvider {
    pub fn new() -> Self {
        Self {
            client: Client::builder().timeout(DEFAULT_TIMEOUT).build().expect("build http client"),
            routes: HashMap::new(),
            default_route: None,
        }
    }

    /// Registers the base URL + API key used for `ChatRequest.provider ==
    /// name`. The first route registered also becomes the fallback for
    /// unknown provider names.
    pub fn with_route(mut self, name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let route = Route { base_url: base_url.into(), api_key: api_key.into() };
        if self.default_route.is_none() {
            self.default_route = Some(route.clone());
        }
        self.routes.insert(name.into(), route);
        self
    }

    /// Builds a provider from `OPENAI_API_KEY` (and optional
    /// `OPENAI_BASE_URL`, defaulting to `https://api.openai.com/v1`),
    /// registered under the `"openai"` route name.
    pub fn from_env() -> Result<Self, CoreEngineError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| CoreEngineError::ConfigMissing("OPENAI_API_KEY".into()))?;
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Ok(Self::new().with_route("openai", base_url, api_key))
    }

    fn route_for(&self, provider: &str) -> Result<&Route, CoreEngineError> {
        self.routes
            .get(provider)
            .or(self.default_route.as_ref())
            .ok_or_else(|| CoreEngineError::ConfigMissing(format!("no route registered for llm provider '{provider}'")))
    }
}

impl Default for HttpLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(m: &ChatMessage) -> Self {
        Self { role: m.role.clone(), content: m.content.clone(), tool_call_id: m.tool_call_id.clone() }
    }
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

impl From<&ToolSpec> for WireTool {
    fn from(t: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunction { name: t.name.clone(), description: t.description.clone(), parameters: t.input_schema.clone() },
        }
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireToolCallFunction,
}

#[derive(Deserialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, CoreEngineError> {
        let route = self.route_for(&request.provider)?;
        let body = WireRequest {
            model: request.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request.tools.iter().map(WireTool::from).collect(),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", route.base_url))
            .bearer_auth(&route.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreEngineError::SystemTimeout
                } else {
                    CoreEngineError::ExecFailed(format!("llm request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CoreEngineError::AuthFailed(text),
                StatusCode::TOO_MANY_REQUESTS => CoreEngineError::RateLimit { retry_after_ms: None },
                _ => CoreEngineError::ExecFailed(format!("llm provider returned {status}: {text}")),
            });
        }

        let parsed: WireResponse =
            response.json().await.map_err(|e| CoreEngineError::ExecFailed(format!("llm response decode: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreEngineError::ExecFailed("llm response had no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null),
            })
            .collect();

        Ok(ChatResponse {
            message: choice.message.content,
            tool_calls,
            usage: parsed.usage.map(|u| Usage { input_tokens: u.prompt_tokens, output_tokens: u.completion_tokens }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_provider_falls_back_to_default_route() {
        let provider = HttpLlmProvider::new().with_route("openai", "https://api.openai.com/v1", "sk-test");
        let route = provider.route_for("some-other-provider").expect("fallback route");
        assert_eq!(route.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn no_routes_registered_is_config_missing() {
        let provider = HttpLlmProvider::new();
        let err = provider.route_for("openai").unwrap_err();
        assert!(matches!(err, CoreEngineError::ConfigMissing(_)));
    }
}
