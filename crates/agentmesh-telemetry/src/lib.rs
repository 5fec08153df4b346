//! AgentMesh Telemetry - Typed state-transition records
//!
//! Every state transition the node performs is recorded as a typed
//! telemetry event and fanned out to subscribers (the explorer UI consumes
//! the stream; tests consume it directly). Records are buffered in a
//! bounded in-memory ring and persisted to a local SQLite store.
//!
//! Emission never fails upward: subscriber and store errors are logged and
//! dropped.

pub mod events;
pub mod emitter;
pub mod store;

pub use emitter::TelemetryEmitter;
pub use events::{TelemetryEvent, TelemetryRecord};
pub use store::{TelemetryQuery, TelemetryStore, TelemetryStoreError};
