//! Rule-based risk scoring.
//!
//! Higher score means lower risk. Scoring starts at [`BASE_SCORE`] and
//! applies deductions in a fixed order; every applied deduction is recorded
//! as a [`RiskFactor`]. The `do-not-merge` label short-circuits to zero.

use serde::{Deserialize, Serialize};

use crate::domain::{
    ChangeSnapshot, RiskAssessment, RiskFactor, RiskLevel, DO_NOT_MERGE_LABEL, HIGH_RISK_LABEL,
};

pub const BASE_SCORE: i32 = 100;

/// Largest deduction the predictor can contribute (at p = 1.0).
pub const PREDICTOR_WEIGHT: f64 = 30.0;

pub const FACTOR_FILES: &str = "files-changed";
pub const FACTOR_LINES: &str = "lines-changed";
pub const FACTOR_HIGH_RISK: &str = "high-risk-label";
pub const FACTOR_DO_NOT_MERGE: &str = "do-not-merge";
pub const FACTOR_PREDICTOR: &str = "predictor";
pub const FACTOR_PREDICTOR_UNAVAILABLE: &str = "predictor-unavailable";

/// What the predictor contributed to a scoring call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorSignal {
    /// Scoring without a predictor.
    Absent,
    /// Too few outcomes to train; the neutral model adds nothing.
    Untrained,
    /// Prediction failed; recorded as a zero-delta factor.
    Unavailable,
    /// Probability of issue from a trained model.
    Probability { p: f64, model_version: u64 },
}

/// Score a snapshot using rules only.
pub fn score(snapshot: &ChangeSnapshot) -> RiskAssessment {
    score_with(snapshot, PredictorSignal::Absent)
}

/// Score a snapshot with a predictor signal.
///
/// Pure and deterministic: identical inputs give identical assessments.
pub fn score_with(snapshot: &ChangeSnapshot, signal: PredictorSignal) -> RiskAssessment {
    let mut score = BASE_SCORE;
    let mut factors = Vec::new();
    let mut deduct = |score: &mut i32, name: &str, amount: i32| {
        *score -= amount;
        factors.push(RiskFactor::new(name, -amount));
    };

    let files = snapshot.files_changed();
    if files > 20 {
        deduct(&mut score, FACTOR_FILES, 30);
    } else if files > 10 {
        deduct(&mut score, FACTOR_FILES, 15);
    }

    let lines = snapshot.total_lines();
    if lines > 1000 {
        deduct(&mut score, FACTOR_LINES, 30);
    } else if lines > 500 {
        deduct(&mut score, FACTOR_LINES, 15);
    }

    if snapshot.has_label(HIGH_RISK_LABEL) {
        deduct(&mut score, FACTOR_HIGH_RISK, 40);
    }

    if snapshot.has_label(DO_NOT_MERGE_LABEL) {
        let remaining = score.max(0);
        deduct(&mut score, FACTOR_DO_NOT_MERGE, remaining);
        return finish(snapshot, 0, factors, None);
    }

    let mut model_version = None;
    match signal {
        PredictorSignal::Absent | PredictorSignal::Untrained => {}
        PredictorSignal::Unavailable => factors.push(RiskFactor::new(FACTOR_PREDICTOR_UNAVAILABLE, 0)),
        PredictorSignal::Probability { p, .. } if !p.is_finite() => {
            factors.push(RiskFactor::new(FACTOR_PREDICTOR_UNAVAILABLE, 0))
        }
        PredictorSignal::Probability { p, model_version: v } => {
            let amount = (p.clamp(0.0, 1.0) * PREDICTOR_WEIGHT).round() as i32;
            score -= amount;
            factors.push(RiskFactor::new(FACTOR_PREDICTOR, -amount));
            model_version = Some(v);
        }
    }

    finish(snapshot, score, factors, model_version)
}

fn finish(
    snapshot: &ChangeSnapshot,
    raw: i32,
    factors: Vec<RiskFactor>,
    model_version: Option<u64>,
) -> RiskAssessment {
    let score = raw.clamp(0, BASE_SCORE) as u8;
    RiskAssessment {
        revision_id: snapshot.revision_id().to_string(),
        score,
        level: RiskLevel::from_score(score),
        factors,
        model_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeEvent;

    fn snap(files: i64, added: i64, deleted: i64, labels: &[&str]) -> ChangeSnapshot {
        let mut event = ChangeEvent::new("rev", files, added, deleted);
        for l in labels {
            event = event.with_label(l);
        }
        ChangeSnapshot::build(&event).unwrap()
    }

    #[test]
    fn small_change_keeps_base_score() {
        let a = score(&snap(3, 10, 5, &[]));
        assert_eq!(a.score, 100);
        assert_eq!(a.level, RiskLevel::Low);
        assert!(a.factors.is_empty());
    }

    #[test]
    fn tiers_are_exclusive_at_boundaries() {
        assert_eq!(score(&snap(10, 0, 0, &[])).score, 100);
        assert_eq!(score(&snap(11, 0, 0, &[])).score, 85);
        assert_eq!(score(&snap(20, 0, 0, &[])).score, 85);
        assert_eq!(score(&snap(21, 0, 0, &[])).score, 70);
        assert_eq!(score(&snap(1, 250, 250, &[])).score, 100);
        assert_eq!(score(&snap(1, 501, 0, &[])).score, 85);
        assert_eq!(score(&snap(1, 1000, 0, &[])).score, 85);
        assert_eq!(score(&snap(1, 1000, 1, &[])).score, 70);
    }

    #[test]
    fn factors_in_application_order() {
        let a = score(&snap(25, 800, 300, &["high-risk"]));
        let names: Vec<_> = a.factors.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec![FACTOR_FILES, FACTOR_LINES, FACTOR_HIGH_RISK]);
        assert_eq!(a.score, 0);
    }

    #[test]
    fn do_not_merge_short_circuits_predictor() {
        let a = score_with(
            &snap(1, 1, 1, &["do-not-merge"]),
            PredictorSignal::Probability {
                p: 0.0,
                model_version: 3,
            },
        );
        assert_eq!(a.score, 0);
        assert_eq!(a.level, RiskLevel::High);
        assert_eq!(a.factors, vec![RiskFactor::new(FACTOR_DO_NOT_MERGE, -100)]);
        assert_eq!(a.model_version, None);
    }

    #[test]
    fn predictor_deducts_rounded_probability() {
        let a = score_with(
            &snap(1, 1, 1, &[]),
            PredictorSignal::Probability {
                p: 0.25,
                model_version: 2,
            },
        );
        // round(7.5) = 8
        assert_eq!(a.score, 92);
        assert_eq!(a.factors, vec![RiskFactor::new(FACTOR_PREDICTOR, -8)]);
        assert_eq!(a.model_version, Some(2));
    }

    #[test]
    fn unavailable_predictor_is_recorded_without_deduction() {
        let a = score_with(&snap(1, 1, 1, &[]), PredictorSignal::Unavailable);
        assert_eq!(a.score, 100);
        assert_eq!(
            a.factors,
            vec![RiskFactor::new(FACTOR_PREDICTOR_UNAVAILABLE, 0)]
        );

        let nan = score_with(
            &snap(1, 1, 1, &[]),
            PredictorSignal::Probability {
                p: f64::NAN,
                model_version: 1,
            },
        );
        assert_eq!(nan.score, 100);
        assert_eq!(nan.factors[0].name, FACTOR_PREDICTOR_UNAVAILABLE);
    }

    #[test]
    fn untrained_predictor_adds_nothing() {
        let s = snap(3, 10, 5, &[]);
        assert_eq!(score_with(&s, PredictorSignal::Untrained), score(&s));
    }
}
