//! AgentMesh DVM - Job request/result/feedback pipeline
//!
//! Implements the kind-5000 job protocol: requests in [5000, 5999],
//! results in [6000, 6999] (request kind + 1000), feedback at kind 7000.
//! Requests may chain on prior results through `e` dependency tags; the
//! resolver enforces depth, cycle, and timestamp invariants over the event
//! database.

pub mod error;
pub mod format;
pub mod parser;
pub mod resolver;
pub mod tracker;

pub use error::DvmError;
pub use format::{
    format_dvm_error_result, format_dvm_feedback, format_dvm_job_result, format_task_feedback,
    DvmJobStatus, Feedback, FeedbackStatus, ResultContent, TaskFeedback,
};
pub use parser::{
    parse_dvm_job_request, parse_task_delegation_request, DvmJobRequest, InputType, JobInput,
    TaskDelegationRequest, TaskPriority,
};
pub use resolver::{resolve_dependencies, ResolvedDependency, MAX_RESOLVE_DEPTH};
pub use tracker::{TaskMetadata, TaskState, TaskTracker, TrackerConfig};
