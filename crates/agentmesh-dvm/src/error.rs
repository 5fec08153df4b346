//! DVM pipeline errors

use thiserror::Error;

use agentmesh_eventdb::StoreError;

#[derive(Debug, Error)]
pub enum DvmError {
    #[error("invalid kind {kind}: not a DVM job request")]
    InvalidKind { kind: u32 },

    #[error("invalid input type: {value}")]
    InvalidInputType { value: String },

    #[error("invalid bid: {value}")]
    InvalidBid { value: String },

    #[error("dependency chain exceeds max depth {depth}")]
    MaxDepthExceeded { depth: u32 },

    #[error("circular dependency at {event_id}")]
    CircularDependency { event_id: String },

    #[error("missing dependency: {event_id}")]
    MissingDependency { event_id: String },

    #[error("dependency {event_id} is not older than the job that uses it")]
    InvalidDependencyTimestamp { event_id: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("unknown task: {task_id}")]
    UnknownTask { task_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
