//! Kind-to-skill routing without a model

use std::sync::Arc;

use tracing::debug;

use agentmesh_skills::{DispatchContext, HandlerResult, SkillRegistry};

/// Routes events by kind to the first skill that explicitly claims it.
///
/// The kind map is fixed at boot; there is no model in this path. An
/// unclaimed kind yields `F99`.
pub struct DirectDispatcher {
    registry: Arc<SkillRegistry>,
}

impl DirectDispatcher {
    pub fn new(registry: Arc<SkillRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub async fn handle_event(&self, ctx: &DispatchContext) -> HandlerResult {
        let kind = ctx.event.kind;
        let skill = self
            .registry
            .skills_for_kind(kind)
            .into_iter()
            .find(|skill| skill.kinds.is_some());
        match skill {
            Some(skill) => {
                debug!(kind, skill = %skill.name, "direct dispatch");
                (skill.handler)(serde_json::json!({}), ctx.clone()).await
            }
            None => HandlerResult::unhandled_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_eventdb::EventStore;
    use agentmesh_skills::{AgentIdentity, Skill};
    use agentmesh_types::{AgentKeypair, EventBuilder, WireCode};

    async fn ctx_for_kind(kind: u32) -> DispatchContext {
        let keypair = Arc::new(AgentKeypair::generate());
        DispatchContext {
            event: EventBuilder::new(kind).content("hi").sign(&keypair).unwrap(),
            peer_id: "peer-b".into(),
            amount: 0,
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

    #[tokio::test]
    async fn test_routes_to_claiming_skill() {
        let mut registry = SkillRegistry::new();
        registry
            .register(
                Skill::new(
                    "store_note",
                    "store notes",
                    serde_json::json!({"type": "object"}),
                    Arc::new(|_, _| Box::pin(async { HandlerResult::ok() })),
                )
                .for_kinds(vec![1]),
            )
            .unwrap();
        let dispatcher = DirectDispatcher::new(Arc::new(registry));
        let result = dispatcher.handle_event(&ctx_for_kind(1).await).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_unhandled_kind_is_f99() {
        let dispatcher = DirectDispatcher::new(Arc::new(SkillRegistry::new()));
        let result = dispatcher.handle_event(&ctx_for_kind(42).await).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, WireCode::F99);
    }
}
