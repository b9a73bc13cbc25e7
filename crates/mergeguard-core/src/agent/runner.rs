//! Step execution seam for the agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{ChangeEvent, EvaluatedChange};
use crate::engine::Engine;
use crate::executor::ExecutionStatus;

use super::error::StepError;
use super::task::{PlanStep, StepKind};

/// Result of one successful step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub summary: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl StepOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Executes analysis and individual plan steps for an agent.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Score and decide the requested change.
    async fn analyze(&self, request: &ChangeEvent) -> Result<EvaluatedChange, StepError>;

    /// Run one step; called at most once per successful step and task.
    async fn run_step(
        &self,
        task_id: &str,
        step: &PlanStep,
        analysis: &EvaluatedChange,
    ) -> Result<StepOutput, StepError>;
}

/// Runs steps against a live [`Engine`].
pub struct EngineStepRunner {
    engine: Arc<Engine>,
}

impl EngineStepRunner {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StepRunner for EngineStepRunner {
    /// Evaluate and store the decision so outcome feedback for the change
    /// reaches the learner.
    async fn analyze(&self, request: &ChangeEvent) -> Result<EvaluatedChange, StepError> {
        let evaluated = self
            .engine
            .evaluate(request)
            .map_err(|e| StepError::Failed(e.to_string()))?;
        self.engine
            .record_decision(&evaluated)
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;
        Ok(evaluated)
    }

    async fn run_step(
        &self,
        _task_id: &str,
        step: &PlanStep,
        analysis: &EvaluatedChange,
    ) -> Result<StepOutput, StepError> {
        match &step.kind {
            StepKind::Analyze(_) => {
                let a = &analysis.assessment;
                Ok(
                    StepOutput::new(format!("risk score {}/100 ({})", a.score, a.level))
                        .with_detail(json!({
                            "score": a.score,
                            "level": a.level,
                            "strategy": analysis.decision.strategy,
                        })),
                )
            }
            StepKind::Scan(scan) => {
                let p = self.engine.predictor().predict(&analysis.snapshot);
                if !p.is_finite() || p > scan.max_issue_probability {
                    return Err(StepError::Failed(format!(
                        "probability of issue {p:.2} exceeds {:.2}",
                        scan.max_issue_probability
                    )));
                }
                Ok(StepOutput::new(format!("probability of issue {p:.2}")).with_detail(json!({
                    "probability": p,
                    "model_version": self.engine.predictor().version(),
                })))
            }
            StepKind::Test(test) => {
                let ci = analysis.snapshot.ci_status();
                if ci != test.required {
                    return Err(StepError::Failed(format!(
                        "CI status is {ci}, expected {}",
                        test.required
                    )));
                }
                Ok(StepOutput::new(format!("CI status is {ci}")))
            }
            StepKind::Integrate(_) => {
                let result = self
                    .engine
                    .executor()
                    .apply(&analysis.decision, &analysis.snapshot)
                    .await
                    .map_err(|e| StepError::Failed(e.to_string()))?;
                match result.status {
                    ExecutionStatus::Applied => Ok(StepOutput::new(format!(
                        "decision applied ({} actions)",
                        result.actions.len()
                    ))
                    .with_detail(json!(result))),
                    status => Err(StepError::Failed(format!(
                        "decision {}{}",
                        status.as_str(),
                        result
                            .error
                            .map(|e| format!(": {e}"))
                            .unwrap_or_default()
                    ))),
                }
            }
        }
    }
}
