//! Risk assessment produced by the scorer.

use serde::{Deserialize, Serialize};

/// Coarse risk bucket derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Higher score means lower risk: `>= 70` low, `50..70` medium, else high.
    pub fn from_score(score: u8) -> Self {
        match score {
            70.. => Self::Low,
            50..=69 => Self::Medium,
            _ => Self::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied adjustment, in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub delta: i32,
}

impl RiskFactor {
    pub fn new(name: &str, delta: i32) -> Self {
        Self {
            name: name.to_string(),
            delta,
        }
    }
}

/// Scored and leveled risk for exactly one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub revision_id: String,
    /// 0..=100, higher is safer.
    pub score: u8,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    /// Predictor model that contributed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<u64>,
}
