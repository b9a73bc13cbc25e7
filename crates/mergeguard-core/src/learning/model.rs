//! Logistic-regression risk model.
//!
//! Features are scaled to roughly `0..=1`. Training is batch gradient
//! descent from zero weights, so the same examples and parameters always
//! produce the same model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChangeSnapshot, CiStatus, DO_NOT_MERGE_LABEL, HIGH_RISK_LABEL};

pub const FEATURE_COUNT: usize = 6;

/// Probability returned by an untrained model.
pub const NEUTRAL_PROBABILITY: f64 = 0.5;

pub type Features = [f64; FEATURE_COUNT];

/// Feature vector for a snapshot:
/// log files, log lines, deletion ratio, high-risk, do-not-merge, CI pass.
pub fn features(snapshot: &ChangeSnapshot) -> Features {
    let total = snapshot.total_lines();
    let deletion_ratio = if total == 0 {
        0.0
    } else {
        snapshot.lines_deleted() as f64 / total as f64
    };
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    [
        (snapshot.files_changed() as f64).ln_1p() / 5.0,
        (total as f64).ln_1p() / 10.0,
        deletion_ratio,
        flag(snapshot.has_label(HIGH_RISK_LABEL)),
        flag(snapshot.has_label(DO_NOT_MERGE_LABEL)),
        flag(snapshot.ci_status() == CiStatus::Pass),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 500,
            learning_rate: 0.1,
        }
    }
}

/// A published model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskModel {
    pub version: u64,
    pub weights: Features,
    pub bias: f64,
    /// Examples this model was fitted on; zero for the neutral model.
    pub trained_on: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
}

impl RiskModel {
    /// Model that always predicts [`NEUTRAL_PROBABILITY`].
    pub fn neutral(version: u64) -> Self {
        Self {
            version,
            weights: [0.0; FEATURE_COUNT],
            bias: 0.0,
            trained_on: 0,
            trained_at: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained_on > 0
    }

    /// Probability of issue in `0..=1`.
    pub fn predict(&self, x: &Features) -> f64 {
        if !self.is_trained() {
            return NEUTRAL_PROBABILITY;
        }
        sigmoid(self.logit(x))
    }

    fn logit(&self, x: &Features) -> f64 {
        self.bias + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Fit a model on `(features, had_issue)` examples.
pub fn fit(examples: &[(Features, bool)], params: TrainingParams, version: u64) -> RiskModel {
    let mut model = RiskModel::neutral(version);
    if examples.is_empty() {
        return model;
    }
    model.trained_on = examples.len();
    let n = examples.len() as f64;

    for _ in 0..params.epochs {
        let mut grad_w = [0.0; FEATURE_COUNT];
        let mut grad_b = 0.0;
        for (x, label) in examples {
            let err = sigmoid(model.logit(x)) - if *label { 1.0 } else { 0.0 };
            for (g, v) in grad_w.iter_mut().zip(x) {
                *g += err * v;
            }
            grad_b += err;
        }
        for (w, g) in model.weights.iter_mut().zip(grad_w) {
            *w -= params.learning_rate * g / n;
        }
        model.bias -= params.learning_rate * grad_b / n;
    }

    model.trained_at = Some(Utc::now());
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeEvent;

    fn snap(files: i64, added: i64, deleted: i64) -> ChangeSnapshot {
        ChangeSnapshot::build(&ChangeEvent::new("r", files, added, deleted).with_ci(CiStatus::Pass))
            .unwrap()
    }

    fn dataset() -> Vec<(Features, bool)> {
        let mut out = Vec::new();
        for i in 0..10 {
            out.push((features(&snap(2 + i % 3, 20 + i, 5)), false));
            out.push((features(&snap(40 + i, 3000 + 100 * i, 500)), true));
        }
        out
    }

    #[test]
    fn features_are_bounded_for_typical_changes() {
        let f = features(&snap(25, 800, 300));
        for v in f {
            assert!((0.0..=1.5).contains(&v), "feature out of range: {v}");
        }
        assert_eq!(f[5], 1.0);
    }

    #[test]
    fn empty_change_has_zero_deletion_ratio() {
        assert_eq!(features(&snap(0, 0, 0))[2], 0.0);
    }

    #[test]
    fn neutral_model_predicts_half() {
        let m = RiskModel::neutral(0);
        assert_eq!(m.predict(&features(&snap(100, 5000, 0))), NEUTRAL_PROBABILITY);
    }

    #[test]
    fn fit_is_deterministic() {
        let data = dataset();
        let a = fit(&data, TrainingParams::default(), 1);
        let b = fit(&data, TrainingParams::default(), 1);
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.bias, b.bias);
    }

    #[test]
    fn fit_separates_large_risky_changes() {
        let model = fit(&dataset(), TrainingParams::default(), 1);
        let small = model.predict(&features(&snap(2, 15, 5)));
        let large = model.predict(&features(&snap(45, 3500, 500)));
        assert!(model.is_trained());
        assert!(large > small, "large={large} small={small}");
        assert!((0.0..=1.0).contains(&small) && (0.0..=1.0).contains(&large));
    }
}
