//! Merge decisions and the outbound decision record.

use mergeguard_host::MergeMethod;
use serde::{Deserialize, Serialize};

use super::assessment::{RiskAssessment, RiskFactor, RiskLevel};
use super::error::{EngineError, Result};
use super::snapshot::ChangeSnapshot;

/// What to do with a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    AutoMerge,
    RequireReview,
    ManualReview,
    Block,
}

impl MergeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoMerge => "auto_merge",
            Self::RequireReview => "require_review",
            Self::ManualReview => "manual_review",
            Self::Block => "block",
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The chosen action for one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub revision_id: String,
    pub strategy: MergeStrategy,
    pub method: MergeMethod,
    pub should_act: bool,
    /// Score and level of the assessment the decision was derived from.
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub reasoning: Vec<String>,
}

/// Snapshot, assessment and decision for one revision, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedChange {
    pub snapshot: ChangeSnapshot,
    pub assessment: RiskAssessment,
    pub decision: MergeDecision,
}

impl EvaluatedChange {
    /// Bundle the three values, rejecting any that disagree on revision id.
    pub fn new(
        snapshot: ChangeSnapshot,
        assessment: RiskAssessment,
        decision: MergeDecision,
    ) -> Result<Self> {
        for other in [&assessment.revision_id, &decision.revision_id] {
            if other != snapshot.revision_id() {
                return Err(EngineError::RevisionMismatch {
                    expected: snapshot.revision_id().to_string(),
                    actual: other.clone(),
                });
            }
        }
        Ok(Self {
            snapshot,
            assessment,
            decision,
        })
    }

    pub fn revision_id(&self) -> &str {
        self.snapshot.revision_id()
    }

    /// Outbound wire shape.
    pub fn record(&self) -> DecisionRecord {
        DecisionRecord {
            revision_id: self.revision_id().to_string(),
            change_id: self.snapshot.change_id().to_string(),
            risk_score: self.assessment.score,
            risk_level: self.assessment.level,
            factors: self.assessment.factors.clone(),
            strategy: self.decision.strategy,
            method: self.decision.method,
            should_act: self.decision.should_act,
            reasoning: self.decision.reasoning.clone(),
            model_version: self.assessment.model_version,
        }
    }
}

/// Decision record returned to callers and written by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub revision_id: String,
    pub change_id: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub strategy: MergeStrategy,
    pub method: MergeMethod,
    pub should_act: bool,
    pub reasoning: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<u64>,
}
