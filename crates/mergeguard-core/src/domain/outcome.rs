//! Ground-truth outcomes fed back after a decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assessment::RiskAssessment;
use super::decision::{EvaluatedChange, MergeDecision};
use super::snapshot::ChangeSnapshot;

/// Observed result of an integrated change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failure)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// Out-of-band feedback for one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFeedback {
    pub revision_id: String,
    pub outcome: Outcome,
}

impl OutcomeFeedback {
    pub fn new(revision_id: &str, outcome: Outcome) -> Self {
        Self {
            revision_id: revision_id.to_string(),
            outcome,
        }
    }
}

/// One labeled training example in the outcome log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub snapshot: ChangeSnapshot,
    pub assessment: RiskAssessment,
    pub decision: MergeDecision,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(evaluated: EvaluatedChange, outcome: Outcome) -> Self {
        Self {
            snapshot: evaluated.snapshot,
            assessment: evaluated.assessment,
            decision: evaluated.decision,
            outcome,
            recorded_at: Utc::now(),
        }
    }

    pub fn revision_id(&self) -> &str {
        self.snapshot.revision_id()
    }
}
