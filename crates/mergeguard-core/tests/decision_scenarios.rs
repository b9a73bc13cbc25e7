use std::sync::Arc;

use mergeguard_core::domain::{DO_NOT_MERGE_LABEL, HIGH_RISK_LABEL};
use mergeguard_core::scoring::{score, score_with, PredictorSignal};
use mergeguard_core::{
    ChangeEvent, ChangeSnapshot, CiStatus, Engine, EngineConfig, ExecutionStatus, MergeMethod,
    MergeStrategy, RiskLevel, Stores,
};
use mergeguard_host::{HostCall, RecordingHost};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine(host: Arc<RecordingHost>) -> Engine {
    Engine::new(&EngineConfig::default(), Stores::in_memory(), host)
}

fn snapshot(event: &ChangeEvent) -> ChangeSnapshot {
    ChangeSnapshot::build(event).expect("valid snapshot")
}

// ---------------------------------------------------------------------------
// Acceptance scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_small_green_change_auto_merges() {
    let host = Arc::new(RecordingHost::new());
    let engine = engine(host.clone());

    let out = engine
        .process(&ChangeEvent::new("rev-a", 3, 10, 5).with_ci(CiStatus::Pass))
        .await
        .expect("process");

    assert_eq!(out.record.risk_score, 100);
    assert_eq!(out.record.risk_level, RiskLevel::Low);
    assert_eq!(out.record.strategy, MergeStrategy::AutoMerge);
    assert_eq!(out.record.method, MergeMethod::Merge);
    assert!(out.record.should_act);
    assert_eq!(out.execution.status, ExecutionStatus::Applied);

    let calls = host.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(calls[0], HostCall::Label { .. }));
    assert!(matches!(calls[1], HostCall::Comment { .. }));
    assert!(matches!(
        calls[2],
        HostCall::Merge {
            method: MergeMethod::Merge,
            ..
        }
    ));
}

#[tokio::test]
async fn scenario_b_large_change_goes_to_manual_review() {
    let host = Arc::new(RecordingHost::new());
    let engine = engine(host.clone());

    let out = engine
        .process(&ChangeEvent::new("rev-b", 25, 800, 300).with_ci(CiStatus::Pass))
        .await
        .expect("process");

    assert_eq!(out.record.risk_score, 40);
    assert_eq!(out.record.risk_level, RiskLevel::High);
    assert_eq!(out.record.strategy, MergeStrategy::ManualReview);
    assert_eq!(out.record.method, MergeMethod::Squash);
    assert!(!out.record.should_act);
    assert_eq!(out.execution.status, ExecutionStatus::Skipped);
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn scenario_c_do_not_merge_zeroes_the_score() {
    let host = Arc::new(RecordingHost::new());
    let engine = engine(host.clone());

    let out = engine
        .process(
            &ChangeEvent::new("rev-c", 1, 1, 0)
                .with_ci(CiStatus::Pass)
                .with_label("Do-Not-Merge"),
        )
        .await
        .expect("process");

    assert_eq!(out.record.risk_score, 0);
    assert_eq!(out.record.risk_level, RiskLevel::High);
    assert_eq!(out.record.strategy, MergeStrategy::ManualReview);
    assert!(!out.record.should_act);
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn scenario_d_failing_ci_never_acts() {
    let host = Arc::new(RecordingHost::new());
    let engine = engine(host.clone());

    let out = engine
        .process(&ChangeEvent::new("rev-d", 1, 2, 1).with_ci(CiStatus::Fail))
        .await
        .expect("process");

    assert_eq!(out.record.risk_level, RiskLevel::Low);
    assert_eq!(out.record.strategy, MergeStrategy::ManualReview);
    assert!(!out.record.should_act);
    assert!(host.calls().is_empty());
}

#[test]
fn pending_and_unknown_ci_block() {
    let engine = engine(Arc::new(RecordingHost::new()));
    for ci in [CiStatus::Pending, CiStatus::Unknown] {
        let eval = engine
            .evaluate(&ChangeEvent::new("rev", 1, 1, 1).with_ci(ci))
            .expect("evaluate");
        assert_eq!(eval.decision.strategy, MergeStrategy::Block);
        assert!(!eval.decision.should_act);
    }
}

#[test]
fn medium_risk_requires_review() {
    let engine = engine(Arc::new(RecordingHost::new()));
    let eval = engine
        .evaluate(&ChangeEvent::new("rev", 25, 20, 0).with_ci(CiStatus::Pass))
        .expect("evaluate");
    assert_eq!(eval.assessment.score, 70);
    assert_eq!(eval.assessment.level, RiskLevel::Low);

    let eval = engine
        .evaluate(&ChangeEvent::new("rev", 25, 400, 200).with_ci(CiStatus::Pass))
        .expect("evaluate");
    assert_eq!(eval.assessment.score, 55);
    assert_eq!(eval.decision.strategy, MergeStrategy::RequireReview);
    assert_eq!(eval.decision.method, MergeMethod::Squash);
}

#[test]
fn malformed_events_are_rejected_before_scoring() {
    let engine = engine(Arc::new(RecordingHost::new()));
    let mut event = ChangeEvent::new("rev", 1, 1, 1);
    event.lines_added = None;
    let err = engine.evaluate(&event).expect_err("missing field");
    assert!(err.to_string().contains("lines_added"));

    let err = engine
        .evaluate(&ChangeEvent::new("rev", 1, -4, 1))
        .expect_err("negative count");
    assert!(err.to_string().contains("lines_added"));
}

// ---------------------------------------------------------------------------
// Scoring properties
// ---------------------------------------------------------------------------

#[test]
fn score_stays_within_bounds() {
    let sizes = [0_i64, 1, 10, 11, 20, 21, 499, 500, 501, 1000, 1001, 1_000_000];
    for files in sizes {
        for lines in sizes {
            for label in [None, Some(HIGH_RISK_LABEL), Some(DO_NOT_MERGE_LABEL)] {
                let mut event = ChangeEvent::new("rev", files, lines, lines / 2);
                if let Some(label) = label {
                    event = event.with_label(label);
                }
                let snap = snapshot(&event);
                for p in [0.0, 0.5, 1.0, f64::NAN, 7.0, -3.0] {
                    let a = score_with(
                        &snap,
                        PredictorSignal::Probability {
                            p,
                            model_version: 1,
                        },
                    );
                    assert!(a.score <= 100, "score {} out of range", a.score);
                    assert_eq!(a.level, RiskLevel::from_score(a.score));
                }
            }
        }
    }
}

#[test]
fn do_not_merge_short_circuits_everything() {
    let snap = snapshot(
        &ChangeEvent::new("rev", 1, 1, 1)
            .with_ci(CiStatus::Pass)
            .with_label(DO_NOT_MERGE_LABEL)
            .with_label(HIGH_RISK_LABEL),
    );
    let a = score_with(
        &snap,
        PredictorSignal::Probability {
            p: 0.0,
            model_version: 4,
        },
    );
    assert_eq!(a.score, 0);
    assert_eq!(a.model_version, None);
    assert_eq!(a.factors.last().map(|f| f.name.as_str()), Some("do-not-merge"));
}

#[test]
fn scoring_is_deterministic() {
    let snap = snapshot(
        &ChangeEvent::new("rev", 14, 600, 100)
            .with_ci(CiStatus::Pass)
            .with_label(HIGH_RISK_LABEL),
    );
    assert_eq!(score(&snap), score(&snap));
}

#[test]
fn larger_changes_never_score_higher() {
    let mut previous = u8::MAX;
    for files in [1_i64, 5, 10, 11, 15, 20, 21, 50] {
        let s = score(&snapshot(&ChangeEvent::new("rev", files, 10, 0))).score;
        assert!(s <= previous, "{files} files scored {s} > {previous}");
        previous = s;
    }

    let mut previous = u8::MAX;
    for lines in [0_i64, 100, 500, 501, 1000, 1001, 10_000] {
        let s = score(&snapshot(&ChangeEvent::new("rev", 1, lines, 0))).score;
        assert!(s <= previous, "{lines} lines scored {s} > {previous}");
        previous = s;
    }
}

#[test]
fn higher_issue_probability_never_scores_higher() {
    let snap = snapshot(&ChangeEvent::new("rev", 3, 10, 5).with_ci(CiStatus::Pass));
    let mut previous = u8::MAX;
    for p in [0.0, 0.1, 0.33, 0.5, 0.9, 1.0] {
        let s = score_with(
            &snap,
            PredictorSignal::Probability {
                p,
                model_version: 2,
            },
        )
        .score;
        assert!(s <= previous);
        previous = s;
    }
}
