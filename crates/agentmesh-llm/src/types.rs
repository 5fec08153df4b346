//! Common types for language-model interactions

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during model operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("provider not available: {provider}")]
    ProviderNotAvailable { provider: String },

    #[error("request failed: {message}")]
    RequestFailed { message: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("network error: {message}")]
    NetworkError { message: String },
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Specification of a tool the model can call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's parameters
    pub parameters: serde_json::Value,
}

/// A tool call made by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of executing one tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub result: serde_json::Value,
}

impl ToolResult {
    /// The `success` flag a handler result carries, if present
    pub fn success_flag(&self) -> Option<bool> {
        self.result.get("success").and_then(|v| v.as_bool())
    }
}

/// Executable hook attached to a tool spec.
///
/// The provider's agentic loop invokes this with the model's arguments and
/// feeds the returned value back as the tool message.
pub type ToolExecutor =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, serde_json::Value> + Send + Sync>;

/// A callable tool: spec plus executor.
#[derive(Clone)]
pub struct Tool {
    pub spec: ToolSpec,
    pub execute: ToolExecutor,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.spec.name)
            .finish_non_exhaustive()
    }
}

/// One round of the provider's agentic loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionStep {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
}

/// Token usage triple
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why the model stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    MaxSteps,
    Error,
}

/// Request to the model client
#[derive(Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub tools: Vec<Tool>,
    /// Upper bound on agentic-loop rounds
    pub max_steps: u32,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            tools: Vec::new(),
            max_steps: 5,
            max_tokens: None,
            model: None,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from the model client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Final text, empty when the run ended on a tool call
    pub text: String,
    pub steps: Vec<CompletionStep>,
    /// All tool calls across steps, in order
    pub tool_calls: Vec<ToolCall>,
    /// All tool results across steps, in order
    pub tool_results: Vec<ToolResult>,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

impl CompletionResponse {
    pub fn text_only(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            steps: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage,
            finish_reason: FinishReason::Stop,
        }
    }
}

/// The model-client capability.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Whether the provider can serve requests right now
    async fn is_available(&self) -> bool {
        true
    }

    /// Run one completion, including the bounded tool loop
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;
}
