//! Error types for the agent.

use serde::{Deserialize, Serialize};

use super::state::AgentState;

/// Errors produced by the agent state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: AgentState, event: String },

    #[error("task {0} is not in a terminal state")]
    NotTerminal(String),
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Why a single step did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0}s")]
    TimedOut(u64),

    #[error("cancelled: {0}")]
    Cancelled(String),
}
