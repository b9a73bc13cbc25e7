//! Integration agent: an explicit per-task state machine over typed steps.

pub mod archive;
pub mod error;
pub mod machine;
pub mod runner;
pub mod state;
pub mod task;

pub use archive::{read_report, write_report};
pub use error::{AgentError, AgentResult, StepError};
pub use machine::{Agent, StepCache, SUPERSEDED_REASON};
pub use runner::{EngineStepRunner, StepOutput, StepRunner};
pub use state::{transition, AgentEvent, AgentState};
pub use task::{
    plan, AgentReport, AgentTask, AnalyzeStep, IntegrateStep, PlanStep, ScanStep, StepKind,
    StepStatus, TestStep, TransitionRecord,
};
