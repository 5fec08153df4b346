//! Parsing of DVM job requests and task delegation requests

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use agentmesh_types::{kinds, Event};

use crate::error::DvmError;

/// The declared type of a job input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Url,
    Event,
    Job,
}

impl InputType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "url" => Some(Self::Url),
            "event" => Some(Self::Event),
            "job" => Some(Self::Job),
            _ => None,
        }
    }
}

/// One ordered input of a job request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    pub data: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

/// A parsed job request (kinds 5000-5999)
#[derive(Debug, Clone)]
pub struct DvmJobRequest {
    pub event: Event,
    pub inputs: Vec<JobInput>,
    pub output_type: Option<String>,
    pub params: HashMap<String, String>,
    pub bid: Option<u128>,
    pub relays: Vec<String>,
    /// Event ids of prior results this request chains on
    pub dependencies: Vec<String>,
}

/// Parse a kind 5000-5999 event into a job request.
pub fn parse_dvm_job_request(event: &Event) -> Result<DvmJobRequest, DvmError> {
    if !(kinds::DVM_REQUEST_MIN..=kinds::DVM_REQUEST_MAX).contains(&event.kind) {
        return Err(DvmError::InvalidKind { kind: event.kind });
    }

    let mut inputs = Vec::new();
    for tag in event.tags_named("i") {
        if tag.len() < 3 {
            continue;
        }
        let value = &tag[2];
        let input_type = InputType::parse(value).ok_or_else(|| DvmError::InvalidInputType {
            value: value.clone(),
        })?;
        inputs.push(JobInput {
            data: tag[1].clone(),
            input_type,
            relay: tag.get(3).filter(|r| !r.is_empty()).cloned(),
            marker: tag.get(4).filter(|m| !m.is_empty()).cloned(),
        });
    }

    let output_type = event.first_tag_value("output").map(str::to_string);

    let mut params = HashMap::new();
    for tag in event.tags_named("param") {
        if tag.len() >= 3 {
            // duplicate keys: last wins
            params.insert(tag[1].clone(), tag[2].clone());
        }
    }

    let bid = match event.first_tag_value("bid") {
        Some(value) => Some(value.parse::<u128>().map_err(|_| DvmError::InvalidBid {
            value: value.to_string(),
        })?),
        None => None,
    };

    let relays = event
        .tags_named("relays")
        .next()
        .map(|tag| tag[1..].to_vec())
        .unwrap_or_default();

    let dependencies = event
        .tags_named("e")
        .filter(|tag| tag.get(3).map(String::as_str) == Some("dependency"))
        .filter_map(|tag| tag.get(1).cloned())
        .collect();

    Ok(DvmJobRequest {
        event: event.clone(),
        inputs,
        output_type,
        params,
        bid,
        relays,
        dependencies,
    })
}

/// Priority of a delegated task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Normal,
    Low,
}

impl TaskPriority {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// A parsed kind-5900 task delegation request
#[derive(Debug, Clone)]
pub struct TaskDelegationRequest {
    pub job: DvmJobRequest,
    /// Requested timeout in seconds; invalid values are ignored
    pub timeout_seconds: Option<u64>,
    /// Public keys from `p` tags
    pub preferred_agents: Vec<String>,
    pub priority: TaskPriority,
    /// Result schema URL
    pub schema: Option<String>,
}

/// Parse a kind-5900 event into a task delegation request.
pub fn parse_task_delegation_request(event: &Event) -> Result<TaskDelegationRequest, DvmError> {
    if event.kind != kinds::TASK_DELEGATION {
        return Err(DvmError::InvalidKind { kind: event.kind });
    }
    let job = parse_dvm_job_request(event)?;

    let timeout_seconds = job
        .params
        .get("timeout")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|seconds| *seconds > 0);

    let preferred_agents = event
        .tags_named("p")
        .filter_map(|tag| tag.get(1).cloned())
        .collect();

    let priority = job
        .params
        .get("priority")
        .and_then(|value| TaskPriority::parse(value))
        .unwrap_or(TaskPriority::Normal);

    let schema = job.params.get("schema").cloned();

    Ok(TaskDelegationRequest {
        job,
        timeout_seconds,
        preferred_agents,
        priority,
        schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_types::{AgentKeypair, EventBuilder};

    fn request_event(kind: u32, tags: Vec<Vec<String>>) -> Event {
        let mut builder = EventBuilder::new(kind).content("job");
        for tag in tags {
            builder = builder.tag(tag);
        }
        builder.sign(&AgentKeypair::generate()).unwrap()
    }

    #[test]
    fn test_rejects_non_dvm_kind() {
        let event = request_event(1, vec![]);
        assert!(matches!(
            parse_dvm_job_request(&event),
            Err(DvmError::InvalidKind { kind: 1 })
        ));
    }

    #[test]
    fn test_parses_inputs_params_bid_relays() {
        let event = request_event(
            5100,
            vec![
                vec!["i".into(), "hello".into(), "text".into()],
                vec![
                    "i".into(),
                    "https://example.com".into(),
                    "url".into(),
                    "wss://relay".into(),
                    "source".into(),
                ],
                // too short, skipped
                vec!["i".into(), "orphan".into()],
                vec!["output".into(), "text/plain".into()],
                vec!["param".into(), "lang".into(), "en".into()],
                vec!["param".into(), "lang".into(), "fr".into()],
                vec!["bid".into(), "100000".into()],
                vec!["relays".into(), "wss://a".into(), "wss://b".into()],
                vec!["e".into(), "dep1".into(), String::new(), "dependency".into()],
                vec!["e".into(), "reply".into()],
            ],
        );
        let request = parse_dvm_job_request(&event).unwrap();
        assert_eq!(request.inputs.len(), 2);
        assert_eq!(request.inputs[0].input_type, InputType::Text);
        assert_eq!(request.inputs[1].relay.as_deref(), Some("wss://relay"));
        assert_eq!(request.inputs[1].marker.as_deref(), Some("source"));
        assert_eq!(request.output_type.as_deref(), Some("text/plain"));
        // last wins on duplicate params
        assert_eq!(request.params.get("lang").map(String::as_str), Some("fr"));
        assert_eq!(request.bid, Some(100_000));
        assert_eq!(request.relays, vec!["wss://a", "wss://b"]);
        assert_eq!(request.dependencies, vec!["dep1"]);
    }

    #[test]
    fn test_unknown_input_type_fails_whole_parse() {
        let event = request_event(
            5100,
            vec![
                vec!["i".into(), "ok".into(), "text".into()],
                vec!["i".into(), "bad".into(), "hologram".into()],
            ],
        );
        assert!(matches!(
            parse_dvm_job_request(&event),
            Err(DvmError::InvalidInputType { .. })
        ));
    }

    #[test]
    fn test_unparseable_bid_fails() {
        let event = request_event(5100, vec![vec!["bid".into(), "lots".into()]]);
        assert!(matches!(
            parse_dvm_job_request(&event),
            Err(DvmError::InvalidBid { .. })
        ));
    }

    #[test]
    fn test_task_delegation_fields() {
        let event = request_event(
            5900,
            vec![
                vec!["i".into(), "analyze this".into(), "text".into()],
                vec!["param".into(), "timeout".into(), "120".into()],
                vec!["param".into(), "priority".into(), "high".into()],
                vec!["param".into(), "schema".into(), "https://schema".into()],
                vec!["p".into(), "agent1".into()],
                vec!["p".into(), "agent2".into()],
            ],
        );
        let request = parse_task_delegation_request(&event).unwrap();
        assert_eq!(request.timeout_seconds, Some(120));
        assert_eq!(request.priority, TaskPriority::High);
        assert_eq!(request.schema.as_deref(), Some("https://schema"));
        assert_eq!(request.preferred_agents, vec!["agent1", "agent2"]);
    }

    #[test]
    fn test_task_delegation_ignores_invalid_timeout() {
        let event = request_event(
            5900,
            vec![vec!["param".into(), "timeout".into(), "-3".into()]],
        );
        let request = parse_task_delegation_request(&event).unwrap();
        assert_eq!(request.timeout_seconds, None);
        assert_eq!(request.priority, TaskPriority::Normal);
    }

    #[test]
    fn test_task_delegation_requires_5900() {
        let event = request_event(5100, vec![]);
        assert!(matches!(
            parse_task_delegation_request(&event),
            Err(DvmError::InvalidKind { kind: 5100 })
        ));
    }
}
