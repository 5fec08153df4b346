//! Skill descriptors and the boot-time registry

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use agentmesh_llm::{Tool, ToolSpec};

use crate::context::{DispatchContext, HandlerResult};

/// Registry failures
#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill already exists: {name}")]
    AlreadyExists { name: String },
}

/// Async execute hook: parsed parameters plus context.
pub type SkillHandler = Arc<
    dyn Fn(serde_json::Value, DispatchContext) -> BoxFuture<'static, HandlerResult> + Send + Sync,
>;

/// A named capability.
#[derive(Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// JSON schema for the skill's parameters
    pub parameters: serde_json::Value,
    /// Event kinds this skill claims; `None` claims every kind
    pub kinds: Option<Vec<u32>>,
    /// Minimum prepare amount the packet handler enforces before dispatch
    pub required_payment: u64,
    pub handler: SkillHandler,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        handler: SkillHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            kinds: None,
            required_payment: 0,
            handler,
        }
    }

    pub fn for_kinds(mut self, kinds: Vec<u32>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn with_required_payment(mut self, amount: u64) -> Self {
        self.required_payment = amount;
        self
    }

    /// Whether this skill claims the given kind
    pub fn claims_kind(&self, kind: u32) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.name)
            .field("kinds", &self.kinds)
            .field("required_payment", &self.required_payment)
            .finish_non_exhaustive()
    }
}

/// Listing entry for prompts and the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
}

/// Mapping from skill name to descriptor. Registration happens at boot;
/// lookups afterwards are lock-free through an `Arc<SkillRegistry>`.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill; duplicate names fail.
    pub fn register(&mut self, skill: Skill) -> Result<(), SkillError> {
        if self.skills.contains_key(&skill.name) {
            return Err(SkillError::AlreadyExists { name: skill.name });
        }
        debug!(name = %skill.name, "skill registered");
        self.skills.insert(skill.name.clone(), Arc::new(skill));
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.skills.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Skills claiming the given kind, sorted by name for determinism
    pub fn skills_for_kind(&self, kind: u32) -> Vec<Arc<Skill>> {
        let mut matched: Vec<_> = self
            .skills
            .values()
            .filter(|skill| skill.claims_kind(kind))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        matched
    }

    /// Name + description + kinds for every skill, sorted by name
    pub fn summary(&self) -> Vec<SkillSummary> {
        let mut summaries: Vec<_> = self
            .skills
            .values()
            .map(|skill| SkillSummary {
                name: skill.name.clone(),
                description: skill.description.clone(),
                kinds: skill.kinds.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Bind every skill to `ctx` as a callable tool.
    ///
    /// The callable validates raw parameters against the skill's schema and
    /// yields the serialized [`HandlerResult`].
    pub fn to_tools(&self, ctx: &DispatchContext) -> Vec<Tool> {
        let mut skills: Vec<_> = self.skills.values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
            .into_iter()
            .map(|skill| {
                let ctx = ctx.clone();
                let spec = ToolSpec {
                    name: skill.name.clone(),
                    description: skill.description.clone(),
                    parameters: skill.parameters.clone(),
                };
                Tool {
                    spec,
                    execute: Arc::new(move |params: serde_json::Value| {
                        let skill = skill.clone();
                        let ctx = ctx.clone();
                        Box::pin(async move {
                            let result = match validate_params(&skill.parameters, &params) {
                                Ok(()) => (skill.handler)(params, ctx).await,
                                Err(message) => HandlerResult::fail(
                                    agentmesh_types::WireCode::F01,
                                    format!("invalid parameters: {message}"),
                                ),
                            };
                            serde_json::to_value(&result)
                                .unwrap_or_else(|_| serde_json::json!({"success": false}))
                        })
                    }),
                }
            })
            .collect()
    }
}

/// Shallow JSON-schema validation: required fields must be present and
/// top-level property types must match.
pub fn validate_params(
    schema: &serde_json::Value,
    params: &serde_json::Value,
) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };
    if schema_obj.get("type").and_then(|t| t.as_str()) == Some("object") && !params.is_object() {
        return Err("expected an object".into());
    }
    if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if params.get(field).is_none() {
                return Err(format!("missing required field: {field}"));
            }
        }
    }
    if let Some(properties) = schema_obj.get("properties").and_then(|p| p.as_object()) {
        for (field, property) in properties {
            let Some(value) = params.get(field) else {
                continue;
            };
            let Some(expected) = property.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!("field {field} is not a {expected}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AgentIdentity;
    use agentmesh_eventdb::EventStore;
    use agentmesh_types::{AgentKeypair, EventBuilder};
    use chrono::Utc;

    fn noop_skill(name: &str) -> Skill {
        Skill::new(
            name,
            "does nothing",
            serde_json::json!({"type": "object"}),
            Arc::new(|_, _| Box::pin(async { HandlerResult::ok() })),
        )
    }

    async fn test_context() -> DispatchContext {
        let keypair = Arc::new(AgentKeypair::generate());
        let event = EventBuilder::new(1).content("hi").sign(&keypair).unwrap();
        DispatchContext {
            event,
            peer_id: "peer-b".into(),
            amount: 100,
            destination: "g.agent.test".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
            db: EventStore::in_memory().await.unwrap(),
            identity: AgentIdentity {
                agent_id: "node-a".into(),
                address: "g.agent.test".into(),
                keypair,
            },
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = SkillRegistry::new();
        registry.register(noop_skill("store_note")).unwrap();
        let err = registry.register(noop_skill("store_note")).unwrap_err();
        assert!(matches!(err, SkillError::AlreadyExists { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_kind_matching_includes_undeclared() {
        let mut registry = SkillRegistry::new();
        registry
            .register(noop_skill("notes").for_kinds(vec![1, 30023]))
            .unwrap();
        registry.register(noop_skill("catch_all")).unwrap();

        let for_notes = registry.skills_for_kind(1);
        assert_eq!(for_notes.len(), 2);
        let for_other = registry.skills_for_kind(42);
        assert_eq!(for_other.len(), 1);
        assert_eq!(for_other[0].name, "catch_all");
    }

    #[test]
    fn test_validate_params() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["content"]
        });
        assert!(validate_params(&schema, &serde_json::json!({"content": "x"})).is_ok());
        assert!(validate_params(&schema, &serde_json::json!({})).is_err());
        assert!(
            validate_params(&schema, &serde_json::json!({"content": "x", "limit": "ten"}))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_tools_validate_before_invoking() {
        let mut registry = SkillRegistry::new();
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"content": {"type": "string"}},
            "required": ["content"]
        });
        registry
            .register(Skill::new(
                "store_note",
                "store a note",
                schema,
                Arc::new(|params, _| {
                    Box::pin(async move {
                        assert_eq!(params["content"], "hello");
                        HandlerResult::ok()
                    })
                }),
            ))
            .unwrap();

        let ctx = test_context().await;
        let tools = registry.to_tools(&ctx);
        assert_eq!(tools.len(), 1);

        let good = (tools[0].execute)(serde_json::json!({"content": "hello"})).await;
        assert_eq!(good["success"], true);

        let bad = (tools[0].execute)(serde_json::json!({})).await;
        assert_eq!(bad["success"], false);
        assert_eq!(bad["error"]["code"], "F01");
    }
}
