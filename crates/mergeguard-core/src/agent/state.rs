//! Agent states and the pure transition function.
//!
//! ```text
//! IDLE -> ANALYZING -> PLANNING -> EXECUTING -> VERIFYING -> COMPLETED
//!                                      ^            |
//!                                      +-- retry ---+--> FAILED
//! ```
//!
//! Any non-terminal state moves to FAILED on [`AgentEvent::Aborted`].

use serde::{Deserialize, Serialize};

use super::error::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Idle,
    Analyzing,
    Planning,
    Executing,
    Verifying,
    Completed,
    Failed,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Analyzing => "ANALYZING",
            Self::Planning => "PLANNING",
            Self::Executing => "EXECUTING",
            Self::Verifying => "VERIFYING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    RequestReceived,
    AnalysisDone,
    PlanProduced,
    /// Every step ran, or a failure stopped the round early.
    StepsAttempted,
    Verified {
        all_succeeded: bool,
        retry_available: bool,
    },
    Aborted {
        reason: String,
    },
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestReceived => "request_received",
            Self::AnalysisDone => "analysis_done",
            Self::PlanProduced => "plan_produced",
            Self::StepsAttempted => "steps_attempted",
            Self::Verified { .. } => "verified",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// Next state for `event` in `from`, or an error if the move is illegal.
pub fn transition(from: AgentState, event: &AgentEvent) -> AgentResult<AgentState> {
    use AgentState::*;

    let next = match (from, event) {
        (Idle, AgentEvent::RequestReceived) => Analyzing,
        (Analyzing, AgentEvent::AnalysisDone) => Planning,
        (Planning, AgentEvent::PlanProduced) => Executing,
        (Executing, AgentEvent::StepsAttempted) => Verifying,
        (
            Verifying,
            AgentEvent::Verified {
                all_succeeded,
                retry_available,
            },
        ) => match (*all_succeeded, *retry_available) {
            (true, _) => Completed,
            (false, true) => Executing,
            (false, false) => Failed,
        },
        (state, AgentEvent::Aborted { .. }) if !state.is_terminal() => Failed,
        (state, event) => {
            return Err(AgentError::InvalidTransition {
                from: state,
                event: event.name().to_string(),
            })
        }
    };
    Ok(next)
}
