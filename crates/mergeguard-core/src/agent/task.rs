//! Agent tasks, typed plan steps, and the archived report.

use chrono::{DateTime, Utc};
use mergeguard_host::MergeMethod;
use serde::{Deserialize, Serialize};

use crate::domain::{ChangeEvent, CiStatus, DecisionRecord, EvaluatedChange};
use crate::obs;

use super::error::{AgentError, AgentResult};
use super::state::{transition, AgentEvent, AgentState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeStep {
    pub revision_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStep {
    pub revision_id: String,
    /// Fail when the predicted probability of issue exceeds this.
    pub max_issue_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    pub revision_id: String,
    pub required: CiStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrateStep {
    pub revision_id: String,
    pub method: MergeMethod,
}

/// Closed set of step kinds; runners must handle every one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Analyze(AnalyzeStep),
    Scan(ScanStep),
    Test(TestStep),
    Integrate(IntegrateStep),
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Analyze(_) => "analyze",
            Self::Scan(_) => "scan",
            Self::Test(_) => "test",
            Self::Integrate(_) => "integrate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable within a task, e.g. `2-scan`.
    pub id: String,
    pub kind: StepKind,
    pub expected: String,
    pub executed: Option<String>,
    pub status: StepStatus,
    /// Times the runner was invoked for this step.
    pub runs: u32,
}

impl PlanStep {
    fn new(index: usize, kind: StepKind, expected: String) -> Self {
        Self {
            id: format!("{}-{}", index + 1, kind.name()),
            kind,
            expected,
            executed: None,
            status: StepStatus::Pending,
            runs: 0,
        }
    }
}

/// Build the plan for an analyzed change.
///
/// Integration is only planned when the decision acts.
pub fn plan(analysis: &EvaluatedChange, max_issue_probability: f64) -> Vec<PlanStep> {
    let revision_id = analysis.revision_id().to_string();
    let mut kinds = vec![
        (
            StepKind::Analyze(AnalyzeStep {
                revision_id: revision_id.clone(),
            }),
            format!(
                "risk score {}/100 ({})",
                analysis.assessment.score, analysis.assessment.level
            ),
        ),
        (
            StepKind::Scan(ScanStep {
                revision_id: revision_id.clone(),
                max_issue_probability,
            }),
            format!("probability of issue <= {max_issue_probability:.2}"),
        ),
        (
            StepKind::Test(TestStep {
                revision_id: revision_id.clone(),
                required: CiStatus::Pass,
            }),
            "CI status is pass".to_string(),
        ),
    ];
    if analysis.decision.should_act {
        let method = analysis.decision.method;
        kinds.push((
            StepKind::Integrate(IntegrateStep {
                revision_id,
                method,
            }),
            format!("decision applied with {method}"),
        ));
    }

    kinds
        .into_iter()
        .enumerate()
        .map(|(i, (kind, expected))| PlanStep::new(i, kind, expected))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: AgentState,
    pub to: AgentState,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// One integration task, owned by the agent for its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub request: ChangeEvent,
    state: AgentState,
    pub analysis: Option<EvaluatedChange>,
    pub steps: Vec<PlanStep>,
    /// Execution rounds started.
    pub rounds: u32,
    pub transitions: Vec<TransitionRecord>,
    pub failure_reason: Option<String>,
}

impl AgentTask {
    pub fn new(request: ChangeEvent) -> Self {
        Self::with_id(&uuid::Uuid::new_v4().to_string(), request)
    }

    pub fn with_id(id: &str, request: ChangeEvent) -> Self {
        Self {
            id: id.to_string(),
            request,
            state: AgentState::Idle,
            analysis: None,
            steps: Vec::new(),
            rounds: 0,
            transitions: Vec::new(),
            failure_reason: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Advance through [`transition`] and record the move.
    pub fn apply(&mut self, event: AgentEvent) -> AgentResult<AgentState> {
        let from = self.state;
        let to = transition(from, &event)?;
        if let AgentEvent::Aborted { reason } = &event {
            self.failure_reason = Some(reason.clone());
        } else if to == AgentState::Failed {
            self.failure_reason = self.first_failure();
        }

        obs::emit_agent_transition(&self.id, from.as_str(), to.as_str());
        self.transitions.push(TransitionRecord {
            from,
            to,
            event: event.name().to_string(),
            at: Utc::now(),
        });
        self.state = to;
        Ok(to)
    }

    pub fn all_succeeded(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.status == StepStatus::Succeeded)
    }

    fn first_failure(&self) -> Option<String> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .map(|s| format!("{}: {}", s.id, s.executed.as_deref().unwrap_or("failed")))
    }

    /// Archive a terminal task.
    pub fn into_report(self) -> AgentResult<AgentReport> {
        if !self.state.is_terminal() {
            return Err(AgentError::NotTerminal(self.id));
        }
        Ok(AgentReport {
            revision_id: self.request.revision_id.clone(),
            decision: self.analysis.as_ref().map(EvaluatedChange::record),
            task_id: self.id,
            final_state: self.state,
            steps: self.steps,
            rounds: self.rounds,
            transitions: self.transitions,
            failure_reason: self.failure_reason,
            finished_at: Utc::now(),
        })
    }
}

/// What remains of a task after it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub task_id: String,
    pub revision_id: Option<String>,
    pub final_state: AgentState,
    pub decision: Option<DecisionRecord>,
    pub steps: Vec<PlanStep>,
    pub rounds: u32,
    pub transitions: Vec<TransitionRecord>,
    pub failure_reason: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl AgentReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == AgentState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeSnapshot;
    use crate::{scoring, strategy};

    fn analysis(event: ChangeEvent) -> EvaluatedChange {
        let snap = ChangeSnapshot::build(&event).unwrap();
        let assessment = scoring::score(&snap);
        let decision = strategy::decide(&assessment, &snap).unwrap();
        EvaluatedChange::new(snap, assessment, decision).unwrap()
    }

    #[test]
    fn acting_decision_plans_integration() {
        let a = analysis(ChangeEvent::new("abc", 3, 10, 5).with_ci(CiStatus::Pass));
        let steps = plan(&a, 0.8);
        let ids: Vec<_> = steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1-analyze", "2-scan", "3-test", "4-integrate"]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn non_acting_decision_skips_integration() {
        let a = analysis(ChangeEvent::new("abc", 25, 800, 300).with_ci(CiStatus::Pass));
        let steps = plan(&a, 0.8);
        assert_eq!(steps.len(), 3);
        assert!(!steps
            .iter()
            .any(|s| matches!(s.kind, StepKind::Integrate(_))));
    }

    #[test]
    fn apply_records_transitions() {
        let mut task = AgentTask::with_id("t1", ChangeEvent::new("abc", 1, 1, 1));
        task.apply(AgentEvent::RequestReceived).unwrap();
        task.apply(AgentEvent::Aborted {
            reason: "superseded".into(),
        })
        .unwrap();

        assert_eq!(task.state(), AgentState::Failed);
        assert_eq!(task.transitions.len(), 2);
        assert_eq!(task.transitions[1].event, "aborted");

        let report = task.into_report().unwrap();
        assert_eq!(report.failure_reason.as_deref(), Some("superseded"));
        assert!(!report.succeeded());
    }

    #[test]
    fn live_tasks_cannot_be_archived() {
        let task = AgentTask::with_id("t1", ChangeEvent::new("abc", 1, 1, 1));
        assert_eq!(
            task.into_report().unwrap_err(),
            AgentError::NotTerminal("t1".into())
        );
    }

    #[test]
    fn step_kinds_are_tagged() {
        let json = serde_json::to_value(StepKind::Test(TestStep {
            revision_id: "abc".into(),
            required: CiStatus::Pass,
        }))
        .unwrap();
        assert_eq!(json["kind"], "test");
        assert_eq!(json["required"], "pass");
    }
}
