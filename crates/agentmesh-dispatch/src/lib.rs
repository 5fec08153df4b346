//! AgentMesh Dispatch - Routing events to skills
//!
//! Two dispatchers share one contract (`handle_event(ctx) -> HandlerResult`):
//!
//! - [`DirectDispatcher`]: kind-to-skill routing without a model
//! - [`AiDispatcher`]: asks a language model to choose and invoke a skill,
//!   honoring the rolling token budget and a per-request timeout, and
//!   falling back to the direct path on any model failure
//!
//! The token budget and the system-prompt builder live here because only
//! the dispatchers consume them.

pub mod ai;
pub mod budget;
pub mod direct;
pub mod prompt;

pub use ai::{AiDispatcher, AiDispatcherConfig};
pub use budget::{BudgetEvent, BudgetObserver, BudgetStatus, TokenBudget};
pub use direct::DirectDispatcher;
pub use prompt::PromptBuilder;

use agentmesh_skills::{DispatchContext, HandlerResult};

/// The dispatcher the packet handler is configured with.
pub enum Dispatcher {
    Ai(AiDispatcher),
    Direct(DirectDispatcher),
}

impl Dispatcher {
    pub async fn handle_event(&self, ctx: &DispatchContext) -> HandlerResult {
        match self {
            Dispatcher::Ai(dispatcher) => dispatcher.handle_event(ctx).await,
            Dispatcher::Direct(dispatcher) => dispatcher.handle_event(ctx).await,
        }
    }
}
