//! 核心编排层：错误、单轮状态机、过程事件、对话编排器

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod state;

pub use error::AgentError;
pub use events::TurnEvent;
pub use orchestrator::{
    FallbackReason, TurnOrchestrator, TurnOutcome, TurnRequest, DEFAULT_MAX_ITERATIONS,
    ITERATION_LIMIT_REPLY, REASONING_FAILED_REPLY,
};
pub use state::TurnState;
