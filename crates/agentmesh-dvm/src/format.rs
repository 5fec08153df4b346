//! Result and feedback event formatting

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use agentmesh_types::{kinds, Event, EventBuilder};

use crate::error::DvmError;

/// Result status carried in the `status` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvmJobStatus {
    Success,
    Error,
    Partial,
}

impl DvmJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Partial => "partial",
        }
    }
}

/// What a job produced
#[derive(Debug, Clone)]
pub enum ResultContent {
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

fn render_content(content: ResultContent, status: DvmJobStatus) -> String {
    match content {
        ResultContent::Text(text) => {
            if status == DvmJobStatus::Error {
                // plain strings get wrapped unless already error-shaped
                let already_shaped = serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .map(|v| v.get("error").is_some())
                    .unwrap_or(false);
                if already_shaped {
                    text
                } else {
                    serde_json::json!({"error": true, "message": text}).to_string()
                }
            } else {
                text
            }
        }
        ResultContent::Bytes(bytes) => BASE64.encode(bytes),
        ResultContent::Json(value) => value.to_string(),
    }
}

/// Build an unsigned result event for a job request.
///
/// Kind is `request.kind + 1000`; tags, in order: the serialized request,
/// the request id, the requester key, the amount, and the status.
pub fn format_dvm_job_result(
    request_event: &Event,
    content: ResultContent,
    amount: u64,
    status: DvmJobStatus,
    our_pubkey: &str,
) -> Result<Event, DvmError> {
    if !(kinds::DVM_REQUEST_MIN..=kinds::DVM_REQUEST_MAX).contains(&request_event.kind) {
        return Err(DvmError::InvalidKind {
            kind: request_event.kind,
        });
    }
    let request_json =
        serde_json::to_string(request_event).map_err(|e| DvmError::InvalidArgument {
            message: e.to_string(),
        })?;
    Ok(EventBuilder::new(request_event.kind + 1000)
        .tag(vec!["request".into(), request_json])
        .tag(vec!["e".into(), request_event.id.clone()])
        .tag(vec!["p".into(), request_event.pubkey.clone()])
        .tag(vec!["amount".into(), amount.to_string()])
        .tag(vec!["status".into(), status.as_str().into()])
        .content(render_content(content, status))
        .build_unsigned(our_pubkey))
}

/// Error-result convenience: status `error`, content `{error, code, message}`.
pub fn format_dvm_error_result(
    request_event: &Event,
    code: &str,
    message: &str,
    amount: u64,
    our_pubkey: &str,
) -> Result<Event, DvmError> {
    format_dvm_job_result(
        request_event,
        ResultContent::Json(serde_json::json!({
            "error": true,
            "code": code,
            "message": message,
        })),
        amount,
        DvmJobStatus::Error,
        our_pubkey,
    )
}

/// Feedback status carried in the `status` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackStatus {
    PaymentRequired,
    Processing,
    Error,
    Success,
    Partial,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentRequired => "payment-required",
            Self::Processing => "processing",
            Self::Error => "error",
            Self::Success => "success",
            Self::Partial => "partial",
        }
    }

    fn default_content(&self) -> &'static str {
        match self {
            Self::PaymentRequired => "Payment required to process this request",
            Self::Processing => "Processing your request…",
            Self::Error => "An error occurred while processing your request",
            Self::Success => "Request completed successfully",
            Self::Partial => "Partial results available",
        }
    }
}

/// A kind-7000 feedback message
#[derive(Debug, Clone)]
pub struct Feedback {
    pub job_event_id: String,
    pub requester_pubkey: String,
    pub status: FeedbackStatus,
    pub amount: Option<u64>,
    /// Overrides the status's default content when set
    pub content: Option<String>,
}

/// Build an unsigned kind-7000 feedback event.
pub fn format_dvm_feedback(feedback: &Feedback, our_pubkey: &str) -> Event {
    let mut builder = EventBuilder::new(kinds::DVM_FEEDBACK)
        .tag(vec!["e".into(), feedback.job_event_id.clone()])
        .tag(vec!["p".into(), feedback.requester_pubkey.clone()])
        .tag(vec!["status".into(), feedback.status.as_str().into()]);
    if let Some(amount) = feedback.amount {
        builder = builder.tag(vec!["amount".into(), amount.to_string()]);
    }
    builder
        .content(
            feedback
                .content
                .clone()
                .unwrap_or_else(|| feedback.status.default_content().to_string()),
        )
        .build_unsigned(our_pubkey)
}

/// Feedback enriched with progress and ETA tags
#[derive(Debug, Clone)]
pub struct TaskFeedback {
    pub feedback: Feedback,
    /// Progress in [0, 100]; floored into the tag
    pub progress: Option<f64>,
    /// Seconds until completion; floored into the tag
    pub eta_seconds: Option<f64>,
}

/// Build an unsigned feedback event with progress and ETA tags.
pub fn format_task_feedback(task: &TaskFeedback, our_pubkey: &str) -> Result<Event, DvmError> {
    let mut event = format_dvm_feedback(&task.feedback, our_pubkey);
    if let Some(progress) = task.progress {
        if !(0.0..=100.0).contains(&progress) {
            return Err(DvmError::InvalidArgument {
                message: format!("progress out of range: {progress}"),
            });
        }
        event
            .tags
            .push(vec!["progress".into(), (progress.floor() as i64).to_string()]);
    }
    if let Some(eta) = task.eta_seconds {
        if eta < 0.0 {
            return Err(DvmError::InvalidArgument {
                message: format!("negative eta: {eta}"),
            });
        }
        event
            .tags
            .push(vec!["eta".into(), (eta.floor() as i64).to_string()]);
    }
    // tags changed after building
    event.id = event.compute_id();
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_dvm_job_request;
    use agentmesh_types::AgentKeypair;

    fn request() -> Event {
        EventBuilder::new(5100)
            .content("job")
            .tag(vec!["i".into(), "hello".into(), "text".into()])
            .tag(vec!["bid".into(), "5000".into()])
            .sign(&AgentKeypair::generate())
            .unwrap()
    }

    #[test]
    fn test_result_shape() {
        let request = request();
        let result = format_dvm_job_result(
            &request,
            ResultContent::Text("done".into()),
            42,
            DvmJobStatus::Success,
            "ourkey",
        )
        .unwrap();
        assert_eq!(result.kind, 6100);
        assert_eq!(result.pubkey, "ourkey");
        assert_eq!(result.tags[0][0], "request");
        assert_eq!(result.tags[1], vec!["e".to_string(), request.id.clone()]);
        assert_eq!(result.tags[2], vec!["p".to_string(), request.pubkey.clone()]);
        assert_eq!(result.tags[3], vec!["amount".to_string(), "42".to_string()]);
        assert_eq!(result.tags[4], vec!["status".to_string(), "success".to_string()]);
        assert_eq!(result.content, "done");
    }

    #[test]
    fn test_request_round_trips_through_result_tag() {
        let request = request();
        let result = format_dvm_job_result(
            &request,
            ResultContent::Text("done".into()),
            0,
            DvmJobStatus::Success,
            "ourkey",
        )
        .unwrap();
        let embedded: Event = serde_json::from_str(&result.tags[0][1]).unwrap();
        assert_eq!(embedded, request);
        let reparsed = parse_dvm_job_request(&embedded).unwrap();
        assert_eq!(reparsed.bid, Some(5_000));
        assert_eq!(reparsed.inputs.len(), 1);
    }

    #[test]
    fn test_bytes_become_base64_and_json_stays_json() {
        let request = request();
        let bytes = format_dvm_job_result(
            &request,
            ResultContent::Bytes(vec![1, 2, 3]),
            0,
            DvmJobStatus::Success,
            "ourkey",
        )
        .unwrap();
        assert_eq!(bytes.content, "AQID");

        let json = format_dvm_job_result(
            &request,
            ResultContent::Json(serde_json::json!({"answer": 42})),
            0,
            DvmJobStatus::Success,
            "ourkey",
        )
        .unwrap();
        assert_eq!(json.content, r#"{"answer":42}"#);
    }

    #[test]
    fn test_error_status_wraps_plain_strings() {
        let request = request();
        let wrapped = format_dvm_job_result(
            &request,
            ResultContent::Text("disk full".into()),
            0,
            DvmJobStatus::Error,
            "ourkey",
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&wrapped.content).unwrap();
        assert_eq!(value["error"], true);
        assert_eq!(value["message"], "disk full");

        // already error-shaped content passes through untouched
        let shaped = format_dvm_job_result(
            &request,
            ResultContent::Text(r#"{"error":true,"code":"X1"}"#.into()),
            0,
            DvmJobStatus::Error,
            "ourkey",
        )
        .unwrap();
        assert_eq!(shaped.content, r#"{"error":true,"code":"X1"}"#);
    }

    #[test]
    fn test_error_result_helper() {
        let request = request();
        let result =
            format_dvm_error_result(&request, "F99", "cannot handle", 0, "ourkey").unwrap();
        let value: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(value["code"], "F99");
        assert_eq!(result.first_tag_value("status"), Some("error"));
    }

    #[test]
    fn test_feedback_defaults_by_status() {
        let feedback = Feedback {
            job_event_id: "job1".into(),
            requester_pubkey: "requester".into(),
            status: FeedbackStatus::Processing,
            amount: Some(10),
            content: None,
        };
        let event = format_dvm_feedback(&feedback, "ourkey");
        assert_eq!(event.kind, 7000);
        assert_eq!(event.first_tag_value("e"), Some("job1"));
        assert_eq!(event.first_tag_value("status"), Some("processing"));
        assert_eq!(event.first_tag_value("amount"), Some("10"));
        assert_eq!(event.content, "Processing your request…");
    }

    #[test]
    fn test_task_feedback_floors_progress_and_eta() {
        let task = TaskFeedback {
            feedback: Feedback {
                job_event_id: "job1".into(),
                requester_pubkey: "requester".into(),
                status: FeedbackStatus::Processing,
                amount: None,
                content: None,
            },
            progress: Some(61.9),
            eta_seconds: Some(12.7),
        };
        let event = format_task_feedback(&task, "ourkey").unwrap();
        assert_eq!(event.first_tag_value("progress"), Some("61"));
        assert_eq!(event.first_tag_value("eta"), Some("12"));
        // id recomputed over the final tag set
        assert_eq!(event.id, event.compute_id());
    }

    #[test]
    fn test_task_feedback_range_checks() {
        let base = Feedback {
            job_event_id: "job1".into(),
            requester_pubkey: "requester".into(),
            status: FeedbackStatus::Processing,
            amount: None,
            content: None,
        };
        let too_big = TaskFeedback {
            feedback: base.clone(),
            progress: Some(100.5),
            eta_seconds: None,
        };
        assert!(matches!(
            format_task_feedback(&too_big, "ourkey"),
            Err(DvmError::InvalidArgument { .. })
        ));
        let negative_eta = TaskFeedback {
            feedback: base,
            progress: None,
            eta_seconds: Some(-1.0),
        };
        assert!(matches!(
            format_task_feedback(&negative_eta, "ourkey"),
            Err(DvmError::InvalidArgument { .. })
        ));
    }
}
