//! AgentMesh Skills - Named capabilities with typed parameters
//!
//! A skill is a tagged record, not a subclass: name, description, JSON
//! parameter schema, the event kinds it claims, a required payment, and an
//! async execute hook. The registry is mutated only at boot; once the node
//! serves traffic it is read-only behind an `Arc`.
//!
//! `to_tools` is the bridge to the AI dispatcher: each skill becomes a
//! callable bound to the dispatch context that validates raw parameters
//! against the schema before invoking the skill.

pub mod context;
pub mod registry;

pub use context::{AgentIdentity, DispatchContext, HandlerResult};
pub use registry::{validate_params, Skill, SkillError, SkillHandler, SkillRegistry, SkillSummary};
