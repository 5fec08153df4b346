//! System-prompt builder for the AI dispatcher
//!
//! Produces the text contract handed to the model: identity, the
//! enumerated skills with their parameter schemas, the decision rule, and
//! (per event) a bounded description of the incoming event. Transport
//! mechanics are deliberately absent.

use agentmesh_skills::{DispatchContext, SkillRegistry};

/// Upper bound on the event-content excerpt included in a prompt
pub const MAX_CONTENT_EXCERPT: usize = 500;

/// Render a kind list compactly, collapsing consecutive runs
/// (`5000-5999` instead of a thousand entries).
fn format_kinds(kinds: &[u32]) -> String {
    let mut sorted = kinds.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut parts = Vec::new();
    let mut index = 0;
    while index < sorted.len() {
        let start = sorted[index];
        let mut end = start;
        while index + 1 < sorted.len() && sorted[index + 1] == end + 1 {
            index += 1;
            end = sorted[index];
        }
        if end > start {
            parts.push(format!("{start}-{end}"));
        } else {
            parts.push(start.to_string());
        }
        index += 1;
    }
    parts.join(", ")
}

/// Assembles the static and per-event prompt forms.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    agent_id: String,
    address: String,
    pubkey: String,
    personality: Option<String>,
}

impl PromptBuilder {
    pub fn new(
        agent_id: impl Into<String>,
        address: impl Into<String>,
        pubkey: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            address: address.into(),
            pubkey: pubkey.into(),
            personality: None,
        }
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    /// Static form: identity, skills, decision framework, personality.
    pub fn build_static(&self, registry: &SkillRegistry) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "You are agent {} at address {} (public key {}).\n\n",
            self.agent_id, self.address, self.pubkey
        ));
        prompt.push_str("Available skills:\n");
        for skill in registry.summary() {
            let schema = registry
                .get(&skill.name)
                .map(|s| s.parameters.to_string())
                .unwrap_or_else(|| "{}".to_string());
            let kinds = match &skill.kinds {
                Some(kinds) => format!(" (kinds: {})", format_kinds(kinds)),
                None => String::new(),
            };
            prompt.push_str(&format!(
                "- {}{}: {}\n  parameters: {}\n",
                skill.name, kinds, skill.description, schema
            ));
        }
        prompt.push_str(
            "\nDecision rule: examine the incoming event, choose exactly one skill, \
             and call it with the event's context. If no skill applies, return a \
             reasoned refusal instead of calling a skill.\n",
        );
        if let Some(personality) = &self.personality {
            prompt.push_str(&format!("\nPersonality: {personality}\n"));
        }
        prompt
    }

    /// Per-event form: the static form plus a bounded event description.
    pub fn build_for_event(&self, registry: &SkillRegistry, ctx: &DispatchContext) -> String {
        let mut prompt = self.build_static(registry);
        let excerpt: String = ctx.event.content.chars().take(MAX_CONTENT_EXCERPT).collect();
        let truncated = ctx.event.content.chars().count() > MAX_CONTENT_EXCERPT;
        prompt.push_str(&format!(
            "\nIncoming event:\n\
             - kind: {}\n\
             - from peer: {}\n\
             - amount: {}\n\
             - destination: {}\n\
             - tags: {} entries\n\
             - content: {}{}\n",
            ctx.event.kind,
            ctx.peer_id,
            ctx.amount,
            ctx.destination,
            ctx.event.tags.len(),
            excerpt,
            if truncated { "…" } else { "" },
        ));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_eventdb::EventStore;
    use agentmesh_skills::{AgentIdentity, HandlerResult, Skill};
    use agentmesh_types::{AgentKeypair, EventBuilder};
    use std::sync::Arc;

    fn registry_with(names: &[&str]) -> SkillRegistry {
        let mut registry = SkillRegistry::new();
        for name in names {
            registry
                .register(Skill::new(
                    *name,
                    format!("{name} skill"),
                    serde_json::json!({"type": "object"}),
                    Arc::new(|_, _| Box::pin(async { HandlerResult::ok() })),
                ))
                .unwrap();
        }
        registry
    }

    async fn ctx_with_content(content: String) -> DispatchContext {
        let keypair = Arc::new(AgentKeypair::generate());
        DispatchContext {
            event: EventBuilder::new(1).content(content).sign(&keypair).unwrap(),
            peer_id: "peer-b".into(),
            amount: 42,
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

    #[test]
    fn test_kind_runs_collapse() {
        assert_eq!(format_kinds(&[1, 30023]), "1, 30023");
        let range: Vec<u32> = (5000..=5999).collect();
        assert_eq!(format_kinds(&range), "5000-5999");
        assert_eq!(format_kinds(&[3, 1, 2, 7]), "1-3, 7");
    }

    #[test]
    fn test_static_prompt_names_every_skill() {
        let registry = registry_with(&["store_note", "query_events", "agent_info"]);
        let builder = PromptBuilder::new("node-a", "g.agent.me", "pubkey");
        let prompt = builder.build_static(&registry);
        for name in ["store_note", "query_events", "agent_info"] {
            assert!(prompt.contains(name), "missing {name}");
        }
        assert!(prompt.contains("exactly one skill"));
        assert!(prompt.contains("node-a"));
    }

    #[tokio::test]
    async fn test_event_prompt_truncates_content() {
        let registry = registry_with(&["store_note"]);
        let builder = PromptBuilder::new("node-a", "g.agent.me", "pubkey");
        let ctx = ctx_with_content("x".repeat(2_000)).await;
        let prompt = builder.build_for_event(&registry, &ctx);
        assert!(prompt.contains(&"x".repeat(MAX_CONTENT_EXCERPT)));
        assert!(!prompt.contains(&"x".repeat(MAX_CONTENT_EXCERPT + 1)));
        assert!(prompt.contains("…"));
        // transport mechanics never leak into the contract
        assert!(!prompt.to_lowercase().contains("websocket"));
        assert!(!prompt.to_lowercase().contains("packet"));
    }
}
