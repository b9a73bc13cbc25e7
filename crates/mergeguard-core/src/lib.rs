//! MergeGuard Core Library
//!
//! Risk scoring, merge decisions, the outcome-trained predictor, and the
//! integration agent. Persistence lives in `mergeguard-state`; host calls go
//! through `mergeguard-host`.

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod executor;
pub mod learning;
pub mod metrics;
pub mod obs;
pub mod recorder;
pub mod scoring;
pub mod strategy;
pub mod telemetry;

pub use agent::{
    Agent, AgentError, AgentEvent, AgentReport, AgentState, AgentTask, EngineStepRunner,
    PlanStep, StepError, StepKind, StepRunner,
};

pub use config::{
    AgentSettings, EngineConfig, ExecutorSettings, HostSettings, LearnerSettings, StorageSettings,
};

pub use coordinator::{PipelineCoordinator, Submission};

pub use domain::{
    ChangeEvent, ChangeSnapshot, CiStatus, DecisionRecord, EngineError, EvaluatedChange,
    MergeDecision, MergeStrategy, Outcome, OutcomeFeedback, OutcomeRecord, Result,
    RiskAssessment, RiskFactor, RiskLevel,
};

pub use engine::{Engine, PipelineOutcome, Stores};
pub use executor::{
    AppliedAction, DecisionExecutor, ExecutionResult, ExecutionStatus, RetryPolicy,
};
pub use learning::{Learner, Predictor, RiskModel, TrainReport};
pub use recorder::OutcomeRecorder;
pub use scoring::PredictorSignal;

pub use mergeguard_host::{MergeMethod, SourceControlHost};
