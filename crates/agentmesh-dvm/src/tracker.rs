//! Task status tracking with throttled progress feedback

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use agentmesh_types::Event;

use crate::error::DvmError;
use crate::format::{format_task_feedback, Feedback, FeedbackStatus, TaskFeedback};

/// State of a tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Processing,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn feedback_status(&self) -> FeedbackStatus {
        match self {
            Self::Queued | Self::Waiting | Self::Processing => FeedbackStatus::Processing,
            Self::Completed => FeedbackStatus::Success,
            Self::Failed | Self::Cancelled => FeedbackStatus::Error,
        }
    }
}

/// Metadata for one tracked task
#[derive(Debug, Clone, Serialize)]
pub struct TaskMetadata {
    pub task_id: String,
    pub requester_pubkey: String,
    pub started_at: DateTime<Utc>,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    /// Milliseconds; throttle anchor for progress feedback
    pub last_update_ms: i64,
}

/// Tracker configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub enabled: bool,
    pub min_update_interval_ms: i64,
    pub emit_progress_updates: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_update_interval_ms: 1_000,
            emit_progress_updates: true,
        }
    }
}

/// Receives formatted feedback events; the node sends them to the requester.
pub type FeedbackEmitter = Box<dyn Fn(Event) + Send + Sync>;

/// Tracks delegated tasks and emits throttled feedback.
pub struct TaskTracker {
    tasks: Mutex<HashMap<String, TaskMetadata>>,
    emitter: FeedbackEmitter,
    config: TrackerConfig,
    our_pubkey: String,
}

impl TaskTracker {
    pub fn new(config: TrackerConfig, our_pubkey: impl Into<String>, emitter: FeedbackEmitter) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            emitter,
            config,
            our_pubkey: our_pubkey.into(),
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Start tracking a task; no-op when tracking is disabled.
    pub fn track_task(&self, task_id: impl Into<String>, requester_pubkey: impl Into<String>) {
        if !self.config.enabled {
            return;
        }
        let task_id = task_id.into();
        debug!(task_id = %task_id, "tracking task");
        self.tasks.lock().insert(
            task_id.clone(),
            TaskMetadata {
                task_id,
                requester_pubkey: requester_pubkey.into(),
                started_at: Utc::now(),
                state: TaskState::Queued,
                progress: None,
                eta_seconds: None,
                last_update_ms: Self::now_ms(),
            },
        );
    }

    /// Update progress; feedback is emitted only when the throttle allows.
    pub fn update_progress(
        &self,
        task_id: &str,
        progress: f64,
        eta_seconds: Option<f64>,
    ) -> Result<(), DvmError> {
        self.update_progress_at(task_id, progress, eta_seconds, Self::now_ms())
    }

    fn update_progress_at(
        &self,
        task_id: &str,
        progress: f64,
        eta_seconds: Option<f64>,
        now_ms: i64,
    ) -> Result<(), DvmError> {
        if !(0.0..=100.0).contains(&progress) {
            return Err(DvmError::InvalidArgument {
                message: format!("progress out of range: {progress}"),
            });
        }
        let feedback = {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(task_id).ok_or_else(|| DvmError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
            // metadata always updates, even when the event is throttled
            task.progress = Some(progress);
            if eta_seconds.is_some() {
                task.eta_seconds = eta_seconds;
            }
            let due = now_ms - task.last_update_ms >= self.config.min_update_interval_ms;
            if self.config.enabled && self.config.emit_progress_updates && due {
                task.last_update_ms = now_ms;
                Some(TaskFeedback {
                    feedback: Feedback {
                        job_event_id: task.task_id.clone(),
                        requester_pubkey: task.requester_pubkey.clone(),
                        status: FeedbackStatus::Processing,
                        amount: None,
                        content: None,
                    },
                    progress: Some(progress),
                    eta_seconds: task.eta_seconds,
                })
            } else {
                None
            }
        };
        if let Some(feedback) = feedback {
            let event = format_task_feedback(&feedback, &self.our_pubkey)?;
            (self.emitter)(event);
        }
        Ok(())
    }

    /// Transition a task's state, always emitting feedback.
    ///
    /// Terminal states delete the metadata.
    pub fn transition_state(&self, task_id: &str, new_state: TaskState) -> Result<(), DvmError> {
        let feedback = {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(task_id).ok_or_else(|| DvmError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
            task.state = new_state;
            task.last_update_ms = Self::now_ms();
            let feedback = TaskFeedback {
                feedback: Feedback {
                    job_event_id: task.task_id.clone(),
                    requester_pubkey: task.requester_pubkey.clone(),
                    status: new_state.feedback_status(),
                    amount: None,
                    content: None,
                },
                progress: task.progress,
                eta_seconds: task.eta_seconds,
            };
            if new_state.is_terminal() {
                tasks.remove(task_id);
            }
            feedback
        };
        let event = format_task_feedback(&feedback, &self.our_pubkey)?;
        (self.emitter)(event);
        Ok(())
    }

    /// Snapshot of a task's metadata
    pub fn task(&self, task_id: &str) -> Option<TaskMetadata> {
        self.tasks.lock().get(task_id).cloned()
    }

    /// Number of live (non-terminal) tasks
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
