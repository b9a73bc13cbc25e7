//! Domain models for MergeGuard.
//!
//! - `ChangeSnapshot`: validated, immutable metadata for one revision
//! - `RiskAssessment`: score, level and factors for one snapshot
//! - `MergeDecision`: strategy, method and should-act for one assessment
//! - `OutcomeRecord`: labeled result used for retraining

pub mod assessment;
pub mod decision;
pub mod error;
pub mod outcome;
pub mod snapshot;

pub use assessment::{RiskAssessment, RiskFactor, RiskLevel};
pub use decision::{DecisionRecord, EvaluatedChange, MergeDecision, MergeStrategy};
pub use error::{EngineError, Result};
pub use outcome::{Outcome, OutcomeFeedback, OutcomeRecord};
pub use snapshot::{ChangeEvent, ChangeSnapshot, CiStatus, DO_NOT_MERGE_LABEL, HIGH_RISK_LABEL};
