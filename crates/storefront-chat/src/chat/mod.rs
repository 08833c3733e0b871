//! Turn orchestration for customer chat messages

pub mod retrieval_planner;
pub mod turn_orchestrator;

pub use retrieval_planner::{ContextPlan, RetrievalPlanner};
pub use turn_orchestrator::{
    TurnConfig, TurnError, TurnOrchestrator, TurnOutcome, TurnState, FALLBACK_REPLY,
};
