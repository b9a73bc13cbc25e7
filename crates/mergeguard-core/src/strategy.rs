//! Strategy selection: risk level and CI status to a merge decision.

use mergeguard_host::MergeMethod;

use crate::domain::{
    ChangeSnapshot, CiStatus, EngineError, MergeDecision, MergeStrategy, Result, RiskAssessment,
    RiskLevel,
};

/// Changes larger than this many lines are squashed.
pub const SQUASH_THRESHOLD_LINES: u64 = 500;

/// Outcome of the strategy rules, before method selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyChoice {
    pub strategy: MergeStrategy,
    pub should_act: bool,
    pub reason: String,
}

/// Apply the strategy rules in order; the first match wins.
pub fn select_strategy(level: RiskLevel, ci: CiStatus) -> StrategyChoice {
    let (strategy, should_act, reason) = match (level, ci) {
        (_, CiStatus::Fail) => (
            MergeStrategy::ManualReview,
            false,
            "CI failed; a human must review".to_string(),
        ),
        (_, CiStatus::Unknown | CiStatus::Pending) => (
            MergeStrategy::Block,
            false,
            format!("CI status is {ci}; blocked until CI passes"),
        ),
        (RiskLevel::Low, CiStatus::Pass) => (
            MergeStrategy::AutoMerge,
            true,
            "low risk and CI passed; merging automatically".to_string(),
        ),
        (RiskLevel::Medium, CiStatus::Pass) => (
            MergeStrategy::RequireReview,
            false,
            "medium risk; review required before merging".to_string(),
        ),
        (RiskLevel::High, CiStatus::Pass) => (
            MergeStrategy::ManualReview,
            false,
            "high risk; manual review required".to_string(),
        ),
    };
    StrategyChoice {
        strategy,
        should_act,
        reason,
    }
}

/// Squash large changes, merge the rest.
pub fn select_method(total_lines: u64) -> MergeMethod {
    if total_lines > SQUASH_THRESHOLD_LINES {
        MergeMethod::Squash
    } else {
        MergeMethod::Merge
    }
}

/// Build the decision for `assessment`, which must belong to `snapshot`.
pub fn decide(assessment: &RiskAssessment, snapshot: &ChangeSnapshot) -> Result<MergeDecision> {
    if assessment.revision_id != snapshot.revision_id() {
        return Err(EngineError::RevisionMismatch {
            expected: snapshot.revision_id().to_string(),
            actual: assessment.revision_id.clone(),
        });
    }

    let choice = select_strategy(assessment.level, snapshot.ci_status());
    let total = snapshot.total_lines();
    let method = select_method(total);

    let mut reasoning = Vec::with_capacity(assessment.factors.len() + 3);
    reasoning.push(format!(
        "risk score {}/100 ({})",
        assessment.score, assessment.level
    ));
    reasoning.extend(
        assessment
            .factors
            .iter()
            .map(|f| format!("{}: {:+}", f.name, f.delta)),
    );
    reasoning.push(choice.reason);
    reasoning.push(format!("{total} lines changed; method {method}"));

    Ok(MergeDecision {
        revision_id: assessment.revision_id.clone(),
        strategy: choice.strategy,
        method,
        should_act: choice.should_act,
        risk_score: assessment.score,
        risk_level: assessment.level,
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeEvent;
    use crate::scoring;

    #[test]
    fn ci_failure_wins_over_low_risk() {
        let c = select_strategy(RiskLevel::Low, CiStatus::Fail);
        assert_eq!(c.strategy, MergeStrategy::ManualReview);
        assert!(!c.should_act);
    }

    #[test]
    fn unknown_and_pending_block() {
        for ci in [CiStatus::Unknown, CiStatus::Pending] {
            for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
                let c = select_strategy(level, ci);
                assert_eq!(c.strategy, MergeStrategy::Block);
                assert!(!c.should_act);
            }
        }
    }

    #[test]
    fn only_low_and_pass_acts() {
        assert!(select_strategy(RiskLevel::Low, CiStatus::Pass).should_act);
        let medium = select_strategy(RiskLevel::Medium, CiStatus::Pass);
        assert_eq!(medium.strategy, MergeStrategy::RequireReview);
        assert!(!medium.should_act);
        let high = select_strategy(RiskLevel::High, CiStatus::Pass);
        assert_eq!(high.strategy, MergeStrategy::ManualReview);
        assert!(!high.should_act);
    }

    #[test]
    fn method_threshold() {
        assert_eq!(select_method(500), MergeMethod::Merge);
        assert_eq!(select_method(501), MergeMethod::Squash);
    }

    #[test]
    fn decision_always_has_reasoning() {
        let snap = ChangeSnapshot::build(&ChangeEvent::new("r", 3, 10, 5)).unwrap();
        let d = decide(&scoring::score(&snap), &snap).unwrap();
        assert_eq!(d.strategy, MergeStrategy::Block);
        assert!(d.reasoning.iter().any(|r| r.contains("unknown")));
        assert_eq!(d.reasoning[0], "risk score 100/100 (low)");
    }

    #[test]
    fn rejects_assessment_of_other_revision() {
        let old = ChangeSnapshot::build(&ChangeEvent::new("old", 1, 1, 1)).unwrap();
        let new = ChangeSnapshot::build(&ChangeEvent::new("new", 1, 1, 1)).unwrap();
        assert!(matches!(
            decide(&scoring::score(&old), &new),
            Err(EngineError::RevisionMismatch { .. })
        ));
    }
}
