//! Built-in skills
//!
//! Each skill is a tagged record registered at boot; a new capability is
//! an additional registration call, not a subclass.

use std::sync::Arc;

use tracing::{debug, info};

use agentmesh_dvm::{
    format_dvm_error_result, format_dvm_job_result, parse_dvm_job_request,
    parse_task_delegation_request, resolve_dependencies, DvmError, DvmJobStatus, ResultContent,
    TaskState, TaskTracker,
};
use agentmesh_eventdb::StoreError;
use agentmesh_router::Router;
use agentmesh_skills::{HandlerResult, Skill, SkillError, SkillRegistry};
use agentmesh_types::{kinds, EventBuilder, EventFilter, WireCode};

/// Kind claimed by the query skill: a filter request addressed to a node
pub const QUERY_REQUEST_KIND: u32 = 10_000;

/// Register every built-in skill.
pub fn register_builtin_skills(
    registry: &mut SkillRegistry,
    router: Arc<Router>,
    tracker: Arc<TaskTracker>,
    dvm_required_payment: u64,
) -> Result<(), SkillError> {
    registry.register(agent_info_skill())?;
    registry.register(store_note_skill())?;
    registry.register(update_follow_list_skill(router))?;
    registry.register(delete_events_skill())?;
    registry.register(query_events_skill())?;
    registry.register(dvm_job_skill(tracker).with_required_payment(dvm_required_payment))?;
    info!(count = registry.len(), "built-in skills registered");
    Ok(())
}

fn agent_info_skill() -> Skill {
    Skill::new(
        "agent_info",
        "Answer a metadata request with this agent's profile",
        serde_json::json!({"type": "object", "properties": {}}),
        Arc::new(|_, ctx| {
            Box::pin(async move {
                let content = serde_json::json!({
                    "name": ctx.identity.agent_id,
                    "address": ctx.identity.address,
                    "pubkey": ctx.identity.pubkey(),
                })
                .to_string();
                match EventBuilder::new(kinds::METADATA)
                    .content(content)
                    .sign(&ctx.identity.keypair)
                {
                    Ok(event) => HandlerResult::ok_with_events(vec![event]),
                    Err(error) => HandlerResult::fail(WireCode::F99, error.to_string()),
                }
            })
        }),
    )
    .for_kinds(vec![kinds::METADATA])
}

fn store_note_skill() -> Skill {
    Skill::new(
        "store_note",
        "Persist the incoming note event in the local event database",
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "Optional note content override"}
            }
        }),
        Arc::new(|_, ctx| {
            Box::pin(async move {
                if !ctx.event.verify() {
                    return HandlerResult::fail(WireCode::F01, "event failed verification");
                }
                match ctx.db.insert(&ctx.event).await {
                    Ok(inserted) => {
                        debug!(id = %ctx.event.id, inserted, "note stored");
                        HandlerResult::ok()
                    }
                    Err(StoreError::StorageLimit { limit }) => HandlerResult::fail(
                        WireCode::T00,
                        format!("storage limit exceeded: {limit}"),
                    ),
                    Err(error) => HandlerResult::fail(WireCode::F99, error.to_string()),
                }
            })
        }),
    )
    .for_kinds(vec![kinds::NOTE, kinds::LONG_FORM])
}

fn update_follow_list_skill(router: Arc<Router>) -> Skill {
    Skill::new(
        "update_follow_list",
        "Replace the follow directory from a follow-list event",
        serde_json::json!({"type": "object", "properties": {}}),
        Arc::new(move |_, ctx| {
            let router = router.clone();
            Box::pin(async move {
                let applied = router.apply_follow_list(&ctx.event).await;
                let _ = ctx.db.insert(&ctx.event).await;
                debug!(applied, "follow list updated");
                HandlerResult::ok()
            })
        }),
    )
    .for_kinds(vec![kinds::FOLLOW_LIST])
}

fn delete_events_skill() -> Skill {
    Skill::new(
        "delete_events",
        "Delete the requester's events referenced by the deletion request",
        serde_json::json!({"type": "object", "properties": {}}),
        Arc::new(|_, ctx| {
            Box::pin(async move {
                let mut deleted = 0usize;
                for tag in ctx.event.tags_named("e") {
                    let Some(target_id) = tag.get(1) else { continue };
                    match ctx.db.get(target_id).await {
                        // only the author may delete an event
                        Ok(Some(target)) if target.pubkey == ctx.event.pubkey => {
                            if ctx.db.delete(target_id).await.unwrap_or(false) {
                                deleted += 1;
                            }
                        }
                        Ok(_) => {}
                        Err(error) => {
                            return HandlerResult::fail(WireCode::F99, error.to_string())
                        }
                    }
                }
                debug!(deleted, "deletion request processed");
                HandlerResult::ok()
            })
        }),
    )
    .for_kinds(vec![kinds::DELETE])
}

fn query_events_skill() -> Skill {
    Skill::new(
        "query_events",
        "Query the event database and return the matching events",
        serde_json::json!({
            "type": "object",
            "properties": {
                "kinds": {"type": "array", "items": {"type": "integer"}},
                "authors": {"type": "array", "items": {"type": "string"}},
                "limit": {"type": "integer"}
            }
        }),
        Arc::new(|params, ctx| {
            Box::pin(async move {
                // parameters win; otherwise the event content carries the filter
                let filter: EventFilter = if params.as_object().map_or(true, |o| o.is_empty()) {
                    serde_json::from_str(&ctx.event.content).unwrap_or_default()
                } else {
                    match serde_json::from_value(params) {
                        Ok(filter) => filter,
                        Err(error) => {
                            return HandlerResult::fail(
                                WireCode::F01,
                                format!("malformed filter: {error}"),
                            )
                        }
                    }
                };
                match ctx.db.query(&filter).await {
                    Ok(events) => HandlerResult::ok_with_events(events),
                    Err(error) => HandlerResult::fail(WireCode::F01, error.to_string()),
                }
            })
        }),
    )
    .for_kinds(vec![QUERY_REQUEST_KIND])
}

fn dvm_job_skill(tracker: Arc<TaskTracker>) -> Skill {
    let dvm_kinds: Vec<u32> = (kinds::DVM_REQUEST_MIN..=kinds::DVM_REQUEST_MAX).collect();
    Skill::new(
        "dvm_job",
        "Run a DVM job request and return the result event",
        serde_json::json!({"type": "object", "properties": {}}),
        Arc::new(move |_, ctx| {
            let tracker = tracker.clone();
            Box::pin(async move {
                let request = match parse_dvm_job_request(&ctx.event) {
                    Ok(request) => request,
                    Err(error) => {
                        return HandlerResult::fail(WireCode::F01, error.to_string());
                    }
                };
                let our_pubkey = ctx.identity.pubkey();
                let requester = ctx.event.pubkey.clone();

                let delegated = ctx.event.kind == kinds::TASK_DELEGATION;
                if delegated {
                    if parse_task_delegation_request(&ctx.event).is_err() {
                        return HandlerResult::fail(WireCode::F01, "malformed task delegation");
                    }
                    tracker.track_task(ctx.event.id.clone(), requester.clone());
                    let _ = tracker.transition_state(&ctx.event.id, TaskState::Processing);
                }

                let outcome = match resolve_dependencies(&request, &ctx.db).await {
                    Ok(resolved) => {
                        let content = serde_json::json!({
                            "inputs": request.inputs,
                            "params": request.params,
                            "resolvedDependencies": resolved.len(),
                        });
                        format_dvm_job_result(
                            &ctx.event,
                            ResultContent::Json(content),
                            ctx.amount,
                            DvmJobStatus::Success,
                            &our_pubkey,
                        )
                    }
                    Err(error @ (DvmError::MaxDepthExceeded { .. }
                    | DvmError::CircularDependency { .. }
                    | DvmError::MissingDependency { .. }
                    | DvmError::InvalidDependencyTimestamp { .. })) => format_dvm_error_result(
                        &ctx.event,
                        "F01",
                        &error.to_string(),
                        ctx.amount,
                        &our_pubkey,
                    ),
                    Err(error) => {
                        if delegated {
                            let _ = tracker.transition_state(&ctx.event.id, TaskState::Failed);
                        }
                        return HandlerResult::fail(WireCode::F99, error.to_string());
                    }
                };

                match outcome {
                    Ok(result_event) => {
                        let failed = result_event.first_tag_value("status") == Some("error");
                        if delegated {
                            let final_state = if failed {
                                TaskState::Failed
                            } else {
                                TaskState::Completed
                            };
                            let _ = tracker.transition_state(&ctx.event.id, final_state);
                        }
                        let _ = ctx.db.insert(&result_event).await;
                        HandlerResult::ok_with_events(vec![result_event])
                    }
                    Err(error) => {
                        if delegated {
                            let _ = tracker.transition_state(&ctx.event.id, TaskState::Failed);
                        }
                        HandlerResult::fail(WireCode::F99, error.to_string())
                    }
                }
            })
        }),
    )
    .for_kinds(dvm_kinds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_dvm::TrackerConfig;
    use agentmesh_eventdb::EventStore;
    use agentmesh_skills::{AgentIdentity, DispatchContext};
    use agentmesh_types::{AgentKeypair, Event, EventBuilder};

    async fn context_for(event: Event) -> DispatchContext {
        let keypair = Arc::new(AgentKeypair::generate());
        DispatchContext {
            event,
            peer_id: "peer-b".into(),
            amount: 100,
            destination: "g.agent.me".into(),
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(30),
            db: EventStore::in_memory().await.unwrap(),
            identity: AgentIdentity {
                agent_id: "node-a".into(),
                address: "g.agent.me".into(),
                keypair,
            },
        }
    }

    fn registry() -> SkillRegistry {
        let mut registry = SkillRegistry::new();
        let router = Arc::new(Router::new("g.agent.me"));
        let tracker = Arc::new(TaskTracker::new(
            TrackerConfig::default(),
            "ourkey",
            Box::new(|_| {}),
        ));
        register_builtin_skills(&mut registry, router, tracker, 0).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_all_builtins_register_once() {
        let registry = registry();
        assert_eq!(registry.len(), 6);
        for name in [
            "agent_info",
            "store_note",
            "update_follow_list",
            "delete_events",
            "query_events",
            "dvm_job",
        ] {
            assert!(registry.has(name), "missing {name}");
        }
        assert_eq!(registry.skills_for_kind(5123).len(), 1);
        assert_eq!(registry.skills_for_kind(1).len(), 1);
    }

    #[tokio::test]
    async fn test_store_note_persists_event() {
        let registry = registry();
        let keypair = AgentKeypair::generate();
        let note = EventBuilder::new(1).content("hello").sign(&keypair).unwrap();
        let ctx = context_for(note.clone()).await;
        let skill = registry.get("store_note").unwrap();
        let result = (skill.handler)(serde_json::json!({}), ctx.clone()).await;
        assert!(result.success);
        assert!(ctx.db.get(&note.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_note_rejects_forged_event() {
        let registry = registry();
        let keypair = AgentKeypair::generate();
        let mut note = EventBuilder::new(1).content("hello").sign(&keypair).unwrap();
        note.content = "forged".into();
        let ctx = context_for(note).await;
        let skill = registry.get("store_note").unwrap();
        let result = (skill.handler)(serde_json::json!({}), ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, WireCode::F01);
    }

    #[tokio::test]
    async fn test_delete_only_removes_own_events() {
        let registry = registry();
        let author = AgentKeypair::generate();
        let stranger = AgentKeypair::generate();
        let own = EventBuilder::new(1).content("mine").sign(&author).unwrap();
        let other = EventBuilder::new(1).content("theirs").sign(&stranger).unwrap();

        let deletion = EventBuilder::new(5)
            .tag(vec!["e".into(), own.id.clone()])
            .tag(vec!["e".into(), other.id.clone()])
            .sign(&author)
            .unwrap();
        let ctx = context_for(deletion).await;
        ctx.db.insert(&own).await.unwrap();
        ctx.db.insert(&other).await.unwrap();

        let skill = registry.get("delete_events").unwrap();
        let result = (skill.handler)(serde_json::json!({}), ctx.clone()).await;
        assert!(result.success);
        assert!(ctx.db.get(&own.id).await.unwrap().is_none());
        assert!(ctx.db.get(&other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dvm_job_produces_result_event() {
        let registry = registry();
        let requester = AgentKeypair::generate();
        let job = EventBuilder::new(5100)
            .tag(vec!["i".into(), "analyze".into(), "text".into()])
            .content("job")
            .sign(&requester)
            .unwrap();
        let ctx = context_for(job.clone()).await;
        let skill = registry.get("dvm_job").unwrap();
        let result = (skill.handler)(serde_json::json!({}), ctx.clone()).await;
        assert!(result.success);
        assert_eq!(result.response_events.len(), 1);
        let response = &result.response_events[0];
        assert_eq!(response.kind, 6100);
        assert_eq!(response.first_tag_value("e"), Some(job.id.as_str()));
        assert_eq!(response.first_tag_value("status"), Some("success"));
        // the result is persisted for future dependency resolution
        assert!(ctx.db.get(&response.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dvm_job_missing_dependency_becomes_error_result() {
        let registry = registry();
        let requester = AgentKeypair::generate();
        let job = EventBuilder::new(5100)
            .tag(vec![
                "e".into(),
                "missing".into(),
                String::new(),
                "dependency".into(),
            ])
            .sign(&requester)
            .unwrap();
        let ctx = context_for(job).await;
        let skill = registry.get("dvm_job").unwrap();
        let result = (skill.handler)(serde_json::json!({}), ctx).await;
        assert!(result.success);
        let response = &result.response_events[0];
        assert_eq!(response.first_tag_value("status"), Some("error"));
        let content: serde_json::Value = serde_json::from_str(&response.content).unwrap();
        assert_eq!(content["error"], true);
    }
}
