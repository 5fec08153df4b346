//! Model-mediated dispatch with budget, timeout, and fallback ladder

use std::sync::Arc;

use tracing::{debug, warn};

use agentmesh_llm::{CompletionRequest, CompletionResponse, LanguageModel};
use agentmesh_retry::with_timeout;
use agentmesh_skills::{DispatchContext, HandlerResult, SkillRegistry};
use agentmesh_types::{WireCode, WireError};

use crate::budget::TokenBudget;
use crate::direct::DirectDispatcher;
use crate::prompt::PromptBuilder;

/// Default model-call timeout
pub const DEFAULT_TIMEOUT_MS: i64 = 10_000;
/// Default per-request step cap
pub const DEFAULT_MAX_STEPS: u32 = 5;

/// Configuration for the AI dispatcher.
#[derive(Debug, Clone)]
pub struct AiDispatcherConfig {
    pub enabled: bool,
    /// When the budget is exhausted: fall back instead of failing with T03
    pub fallback_on_exhaustion: bool,
    pub timeout_ms: i64,
    pub max_steps: u32,
    pub max_tokens_per_request: Option<u32>,
    pub model: Option<String>,
}

impl Default for AiDispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_on_exhaustion: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_steps: DEFAULT_MAX_STEPS,
            max_tokens_per_request: None,
            model: None,
        }
    }
}

/// Chooses and invokes a skill via the model, with a direct fallback.
///
/// Invariants:
/// - at most one model call per invocation
/// - the budget is updated iff a model response was received
/// - the fallback path never calls the model
pub struct AiDispatcher {
    registry: Arc<SkillRegistry>,
    prompts: PromptBuilder,
    budget: Arc<TokenBudget>,
    model: Arc<dyn LanguageModel>,
    fallback: DirectDispatcher,
    config: AiDispatcherConfig,
}

impl AiDispatcher {
    pub fn new(
        registry: Arc<SkillRegistry>,
        prompts: PromptBuilder,
        budget: Arc<TokenBudget>,
        model: Arc<dyn LanguageModel>,
        config: AiDispatcherConfig,
    ) -> Self {
        let fallback = DirectDispatcher::new(registry.clone());
        Self {
            registry,
            prompts,
            budget,
            model,
            fallback,
            config,
        }
    }

    pub fn budget(&self) -> &Arc<TokenBudget> {
        &self.budget
    }

    pub async fn handle_event(&self, ctx: &DispatchContext) -> HandlerResult {
        if !self.config.enabled {
            return self.fallback.handle_event(ctx).await;
        }
        if !self.budget.can_spend(0) {
            if self.config.fallback_on_exhaustion {
                debug!("budget exhausted, taking the direct path");
                return self.fallback.handle_event(ctx).await;
            }
            return HandlerResult {
                success: false,
                error: Some(WireError::new(WireCode::T03, "AI agent budget exhausted")),
                response_events: Vec::new(),
            };
        }

        let prompt = self.prompts.build_for_event(&self.registry, ctx);
        let tools = self.registry.to_tools(ctx);
        let mut request = CompletionRequest::new(prompt, "Handle the incoming event.")
            .with_tools(tools)
            .with_max_steps(self.config.max_steps);
        request.model = self.config.model.clone();
        if let Some(max_tokens) = self.config.max_tokens_per_request {
            request = request.with_max_tokens(max_tokens);
        }

        let response = match with_timeout(self.config.timeout_ms, self.model.complete(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                warn!(%error, "model call failed, taking the direct path");
                return self.fallback.handle_event(ctx).await;
            }
            Err(error) => {
                warn!(%error, "model call timed out, taking the direct path");
                return self.fallback.handle_event(ctx).await;
            }
        };

        self.budget.record_usage(
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
            response.usage.total_tokens,
        );

        self.extract_result(&response, ctx)
    }

    /// Result extraction order: top-level tool results, then a last-to-first
    /// scan of steps, then the model's refusal text.
    fn extract_result(&self, response: &CompletionResponse, ctx: &DispatchContext) -> HandlerResult {
        if let Some(last) = response.tool_results.last() {
            if last.success_flag().is_some() {
                return handler_result_from_value(&last.result);
            }
        }
        for step in response.steps.iter().rev() {
            if let Some(last) = step.tool_results.last() {
                if last.success_flag().is_some() {
                    return handler_result_from_value(&last.result);
                }
            }
        }
        let message = if response.text.is_empty() {
            format!("No matching skill for this event kind {}", ctx.event.kind)
        } else {
            response.text.clone()
        };
        HandlerResult {
            success: false,
            error: Some(WireError::new(WireCode::F99, message)),
            response_events: Vec::new(),
        }
    }
}

fn handler_result_from_value(value: &serde_json::Value) -> HandlerResult {
    if let Ok(result) = serde_json::from_value::<HandlerResult>(value.clone()) {
        return result;
    }
    // tolerate partial shapes as long as the success flag is there
    let success = value
        .get("success")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if success {
        HandlerResult::ok()
    } else {
        let message = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("skill reported failure");
        HandlerResult::fail(WireCode::F99, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_eventdb::EventStore;
    use agentmesh_llm::{ScriptedBehavior, ScriptedModel, ScriptedTurn, TokenUsage};
    use agentmesh_skills::{AgentIdentity, Skill};
    use agentmesh_types::{AgentKeypair, EventBuilder};

    async fn ctx_for_kind(kind: u32) -> DispatchContext {
        let keypair = Arc::new(AgentKeypair::generate());
        DispatchContext {
            event: EventBuilder::new(kind).content("hi").sign(&keypair).unwrap(),
            peer_id: "peer-b".into(),
            amount: 10,
            destination: "g.agent.me".into(),
            expires_at: chrono::Utc::now(),
            db: EventStore::in_memory().await.unwrap(),
            identity: AgentIdentity {
                agent_id: "node-a".into(),
                address: "g.agent.me".into(),
                keypair,
            },
        }
    }

    fn registry_with_store_note() -> Arc<SkillRegistry> {
        let mut registry = SkillRegistry::new();
        registry
            .register(
                Skill::new(
                    "store_note",
                    "store a note",
                    serde_json::json!({"type": "object"}),
                    Arc::new(|_, _| Box::pin(async { HandlerResult::ok() })),
                )
                .for_kinds(vec![1]),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn dispatcher_with(
        model: Arc<dyn LanguageModel>,
        budget: Arc<TokenBudget>,
        config: AiDispatcherConfig,
    ) -> AiDispatcher {
        let registry = registry_with_store_note();
        AiDispatcher::new(
            registry,
            PromptBuilder::new("node-a", "g.agent.me", "pubkey"),
            budget,
            model,
            config,
        )
    }

    #[tokio::test]
    async fn test_tool_call_result_is_used() {
        let model = Arc::new(ScriptedModel::always_calls(
            "store_note",
            serde_json::json!({}),
        ));
        let budget = Arc::new(TokenBudget::new(1_000));
        let dispatcher = dispatcher_with(model.clone(), budget.clone(), Default::default());
        let result = dispatcher.handle_event(&ctx_for_kind(1).await).await;
        assert!(result.success);
        assert_eq!(model.call_count(), 1);
        // budget updated because a response was received
        assert_eq!(budget.status().used_in_window, 15);
    }

    #[tokio::test]
    async fn test_no_tool_call_is_f99_with_model_text() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedTurn {
            behavior: ScriptedBehavior::Text("this event is spam".into()),
            usage: TokenUsage {
                prompt_tokens: 4,
                completion_tokens: 4,
                total_tokens: 8,
            },
        }]));
        let budget = Arc::new(TokenBudget::new(1_000));
        let dispatcher = dispatcher_with(model, budget, Default::default());
        let result = dispatcher.handle_event(&ctx_for_kind(42).await).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.code, WireCode::F99);
        assert_eq!(error.message, "this event is spam");
    }

    #[tokio::test]
    async fn test_budget_exhausted_without_fallback_is_t03() {
        let model = Arc::new(ScriptedModel::always_calls(
            "store_note",
            serde_json::json!({}),
        ));
        let budget = Arc::new(TokenBudget::new(100));
        budget.record_usage(0, 0, 100);
        let config = AiDispatcherConfig {
            fallback_on_exhaustion: false,
            ..Default::default()
        };
        let dispatcher = dispatcher_with(model.clone(), budget, config);
        let result = dispatcher.handle_event(&ctx_for_kind(1).await).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, WireCode::T03);
        // the model was never called
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_budget_exhausted_with_fallback_takes_direct_path() {
        let model = Arc::new(ScriptedModel::always_calls(
            "store_note",
            serde_json::json!({}),
        ));
        let budget = Arc::new(TokenBudget::new(100));
        budget.record_usage(0, 0, 100);
        let dispatcher = dispatcher_with(model.clone(), budget, Default::default());
        let result = dispatcher.handle_event(&ctx_for_kind(1).await).await;
        assert!(result.success);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_model_error_falls_back() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedTurn {
            behavior: ScriptedBehavior::Fail("provider down".into()),
            usage: TokenUsage::default(),
        }]));
        let budget = Arc::new(TokenBudget::new(1_000));
        let dispatcher = dispatcher_with(model, budget.clone(), Default::default());
        let result = dispatcher.handle_event(&ctx_for_kind(1).await).await;
        // direct fallback handles kind 1
        assert!(result.success);
        // no usage recorded: no response was received
        assert_eq!(budget.status().used_in_window, 0);
    }

    #[tokio::test]
    async fn test_model_timeout_falls_back() {
        let ctx = ctx_for_kind(1).await;
        tokio::time::pause();
        let model = Arc::new(ScriptedModel::new(vec![ScriptedTurn {
            behavior: ScriptedBehavior::Hang,
            usage: TokenUsage::default(),
        }]));
        let budget = Arc::new(TokenBudget::new(1_000));
        let dispatcher = dispatcher_with(model, budget.clone(), Default::default());
        let result = dispatcher.handle_event(&ctx).await;
        assert!(result.success);
        assert_eq!(budget.status().used_in_window, 0);
    }

    #[tokio::test]
    async fn test_disabled_ai_never_builds_prompts() {
        let model = Arc::new(ScriptedModel::always_calls(
            "store_note",
            serde_json::json!({}),
        ));
        let config = AiDispatcherConfig {
            enabled: false,
            ..Default::default()
        };
        let dispatcher = dispatcher_with(
            model.clone(),
            Arc::new(TokenBudget::new(1_000)),
            config,
        );
        let result = dispatcher.handle_event(&ctx_for_kind(1).await).await;
        assert!(result.success);
        assert_eq!(model.call_count(), 0);
    }
}
