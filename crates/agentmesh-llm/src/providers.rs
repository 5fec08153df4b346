//! Language-model provider implementations

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::*;

// ============================================================================
// OpenAI-compatible provider
// ============================================================================

/// Configuration for any OpenAI-compatible chat endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: None,
            model: "default".to_string(),
        }
    }
}

/// OpenAI-compatible API provider (hosted APIs, vLLM, llama.cpp, etc.)
pub struct OpenAiCompatModel {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn new(config: OpenAiCompatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatToolSpec>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Clone)]
struct ChatToolSpec {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatToolFunctionSpec,
}

#[derive(Serialize, Clone)]
struct ChatToolFunctionSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ChatToolCallFunction,
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatToolCallFunction {
    name: String,
    /// JSON-encoded arguments, per the OpenAI wire format
    arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl OpenAiCompatModel {
    async fn post_chat(&self, request: &ChatRequest) -> LlmResult<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut req = self.client.post(&url).json(request);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(LlmError::RequestFailed {
                message: format!("status {}", response.status()),
            });
        }
        response.json().await.map_err(|e| LlmError::InvalidResponse {
            message: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatModel {
    fn name(&self) -> &'static str {
        "openai-compat"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.base_url);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        req.send().await.is_ok()
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let mut messages = vec![
            ChatMessage {
                role: "system".into(),
                content: Some(request.system.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            ChatMessage {
                role: "user".into(),
                content: Some(request.prompt.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
        ];
        let tool_specs: Vec<ChatToolSpec> = request
            .tools
            .iter()
            .map(|tool| ChatToolSpec {
                kind: "function",
                function: ChatToolFunctionSpec {
                    name: tool.spec.name.clone(),
                    description: tool.spec.description.clone(),
                    parameters: tool.spec.parameters.clone(),
                },
            })
            .collect();

        let mut steps = Vec::new();
        let mut all_calls = Vec::new();
        let mut all_results = Vec::new();
        let mut usage = TokenUsage::default();
        let mut finish_reason = FinishReason::MaxSteps;
        let mut final_text = String::new();
        let mut finished = false;

        for step_index in 0..request.max_steps.max(1) {
            let chat_request = ChatRequest {
                model: request
                    .model
                    .clone()
                    .unwrap_or_else(|| self.config.model.clone()),
                messages: messages.clone(),
                temperature: request.temperature,
                max_tokens: request.max_tokens,
                tools: tool_specs.clone(),
                stream: false,
            };
            let response = self.post_chat(&chat_request).await?;
            if let Some(u) = &response.usage {
                usage.add(TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::InvalidResponse {
                    message: "no choices in response".into(),
                })?;

            let mut step = CompletionStep {
                text: choice.message.content.clone().unwrap_or_default(),
                ..Default::default()
            };

            if choice.message.tool_calls.is_empty() {
                final_text = step.text.clone();
                finish_reason = match choice.finish_reason.as_deref() {
                    Some("length") => FinishReason::Length,
                    _ => FinishReason::Stop,
                };
                finished = true;
                steps.push(step);
                break;
            }

            messages.push(choice.message.clone());
            for call in &choice.message.tool_calls {
                let arguments: serde_json::Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or_default();
                let tool_call = ToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: arguments.clone(),
                };
                debug!(step = step_index, tool = %tool_call.name, "executing tool call");

                let result = match request
                    .tools
                    .iter()
                    .find(|tool| tool.spec.name == call.function.name)
                {
                    Some(tool) => (tool.execute)(arguments).await,
                    None => {
                        warn!(tool = %call.function.name, "model called unknown tool");
                        serde_json::json!({
                            "success": false,
                            "error": format!("unknown tool: {}", call.function.name),
                        })
                    }
                };
                let tool_result = ToolResult {
                    tool_call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    result: result.clone(),
                };
                messages.push(ChatMessage {
                    role: "tool".into(),
                    content: Some(result.to_string()),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(call.id.clone()),
                });
                step.tool_calls.push(tool_call.clone());
                step.tool_results.push(tool_result.clone());
                all_calls.push(tool_call);
                all_results.push(tool_result);
            }
            finish_reason = FinishReason::ToolCalls;
            steps.push(step);
        }
        if !finished && steps.len() as u32 >= request.max_steps.max(1) {
            finish_reason = FinishReason::MaxSteps;
        }

        Ok(CompletionResponse {
            text: final_text,
            steps,
            tool_calls: all_calls,
            tool_results: all_results,
            usage,
            finish_reason,
        })
    }
}

// ============================================================================
// Deterministic provider (no model behind it)
// ============================================================================

/// Refusal-only provider for deployments without an API key.
///
/// Always answers with a reasoned refusal and zero usage, which sends the
/// dispatcher down its direct path.
pub struct DeterministicModel;

#[async_trait::async_trait]
impl LanguageModel for DeterministicModel {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn complete(&self, _request: CompletionRequest) -> LlmResult<CompletionResponse> {
        Ok(CompletionResponse::text_only(
            "No model is configured; deferring to direct dispatch",
            TokenUsage::default(),
        ))
    }
}

// ============================================================================
// Scripted provider (tests)
// ============================================================================

/// One scripted model turn
pub struct ScriptedTurn {
    pub behavior: ScriptedBehavior,
    pub usage: TokenUsage,
}

/// What the scripted model does when asked to complete
pub enum ScriptedBehavior {
    /// Return plain text with no tool call
    Text(String),
    /// Call the named tool with the given arguments and return its result
    CallTool {
        name: String,
        arguments: serde_json::Value,
    },
    /// Fail the request
    Fail(String),
    /// Never resolve (exercises the dispatcher timeout)
    Hang,
}

/// Deterministic scripted model for tests.
pub struct ScriptedModel {
    script: Mutex<VecDeque<ScriptedTurn>>,
    calls: AtomicU32,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Convenience: a model that always calls one tool with fixed usage
    pub fn always_calls(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::new(vec![ScriptedTurn {
            behavior: ScriptedBehavior::CallTool {
                name: name.into(),
                arguments,
            },
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        }])
    }

    /// Number of completed `complete` invocations
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let turn = self.script.lock().pop_front().unwrap_or(ScriptedTurn {
            behavior: ScriptedBehavior::Text(String::new()),
            usage: TokenUsage::default(),
        });
        match turn.behavior {
            ScriptedBehavior::Text(text) => {
                Ok(CompletionResponse::text_only(text, turn.usage))
            }
            ScriptedBehavior::Fail(message) => Err(LlmError::RequestFailed { message }),
            ScriptedBehavior::Hang => {
                futures::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
            ScriptedBehavior::CallTool { name, arguments } => {
                let call = ToolCall {
                    id: "call_0".into(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                };
                let result = match request.tools.iter().find(|t| t.spec.name == name) {
                    Some(tool) => (tool.execute)(arguments).await,
                    None => serde_json::json!({
                        "success": false,
                        "error": format!("unknown tool: {name}"),
                    }),
                };
                let tool_result = ToolResult {
                    tool_call_id: "call_0".into(),
                    name,
                    result,
                };
                Ok(CompletionResponse {
                    text: String::new(),
                    steps: vec![CompletionStep {
                        text: String::new(),
                        tool_calls: vec![call.clone()],
                        tool_results: vec![tool_result.clone()],
                    }],
                    tool_calls: vec![call],
                    tool_results: vec![tool_result],
                    usage: turn.usage,
                    finish_reason: FinishReason::ToolCalls,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn echo_tool(name: &str) -> Tool {
        Tool {
            spec: ToolSpec {
                name: name.into(),
                description: "echo".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            execute: Arc::new(|args| {
                Box::pin(async move { serde_json::json!({"success": true, "echo": args}) })
            }),
        }
    }

    #[tokio::test]
    async fn test_scripted_tool_call_executes_tool() {
        let model = ScriptedModel::always_calls("echo", serde_json::json!({"x": 1}));
        let request = CompletionRequest::new("sys", "user").with_tools(vec![echo_tool("echo")]);
        let response = model.complete(request).await.unwrap();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_results.len(), 1);
        assert_eq!(response.tool_results[0].success_flag(), Some(true));
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_unknown_tool_reports_failure() {
        let model = ScriptedModel::always_calls("missing", serde_json::json!({}));
        let request = CompletionRequest::new("sys", "user").with_tools(vec![echo_tool("echo")]);
        let response = model.complete(request).await.unwrap();
        assert_eq!(response.tool_results[0].success_flag(), Some(false));
    }

    #[tokio::test]
    async fn test_deterministic_model_refuses() {
        let model = DeterministicModel;
        let response = model
            .complete(CompletionRequest::new("sys", "user"))
            .await
            .unwrap();
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }
}
