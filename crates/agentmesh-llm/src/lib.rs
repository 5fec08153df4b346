//! AgentMesh LLM - Language-model provider abstraction
//!
//! The model client is a capability, not a dependency: the dispatcher sees
//! one trait, [`LanguageModel`], whose contract is "given a system string,
//! a user string, a bag of tools, a step bound, and a token bound, return
//! steps, tool calls, tool results, a usage triple, and a finish reason".
//!
//! ## Key design principles
//!
//! 1. The model may **choose** a skill; it never touches transport or
//!    channel state directly
//! 2. Tool execution happens inside the provider's agentic loop, bounded
//!    by `max_steps`
//! 3. A deterministic provider exists for tests and no-key deployments

pub mod providers;
pub mod types;

pub use providers::*;
pub use types::*;
