//! Structured observability hooks for pipeline lifecycle events.
//!
//! Every event carries an `event = "..."` field so log pipelines can filter
//! on it. Verbosity is controlled with `RUST_LOG`.

use tracing::info;

use crate::domain::{MergeStrategy, RiskLevel};

/// RAII guard that enters a revision-scoped span for the life of a pipeline.
///
/// ```ignore
/// let _span = PipelineSpan::enter("42", "abc123");
/// // every event below is tagged with change_id and revision_id
/// ```
pub struct PipelineSpan {
    _span: tracing::span::EnteredSpan,
}

impl PipelineSpan {
    pub fn enter(change_id: &str, revision_id: &str) -> Self {
        Self {
            _span: pipeline_span(change_id, revision_id).entered(),
        }
    }
}

/// Span for a pipeline; use with `Instrument` across `.await` points.
pub fn pipeline_span(change_id: &str, revision_id: &str) -> tracing::Span {
    tracing::info_span!(
        "mergeguard.pipeline",
        change_id = %change_id,
        revision_id = %revision_id
    )
}

pub fn emit_pipeline_started(revision_id: &str, change_id: &str) {
    info!(event = "pipeline.started", revision_id = %revision_id, change_id = %change_id);
}

pub fn emit_assessment_scored(revision_id: &str, score: u8, level: RiskLevel, factors: usize) {
    info!(
        event = "assessment.scored",
        revision_id = %revision_id,
        score = score,
        level = %level,
        factors = factors,
    );
}

pub fn emit_decision_selected(revision_id: &str, strategy: MergeStrategy, should_act: bool) {
    info!(
        event = "decision.selected",
        revision_id = %revision_id,
        strategy = %strategy,
        should_act = should_act,
    );
}

pub fn emit_decision_applied(revision_id: &str, status: &str, actions: usize) {
    info!(
        event = "decision.applied",
        revision_id = %revision_id,
        status = %status,
        actions = actions,
    );
}

/// A revision that was already claimed in the ledger.
pub fn emit_decision_duplicate(revision_id: &str, prior_status: &str) {
    info!(
        event = "decision.duplicate",
        revision_id = %revision_id,
        prior_status = %prior_status,
    );
}

pub fn emit_pipeline_superseded(revision_id: &str, superseded_by: &str) {
    info!(
        event = "pipeline.superseded",
        revision_id = %revision_id,
        superseded_by = %superseded_by,
    );
}

pub fn emit_outcome_recorded(revision_id: &str, outcome: &str, seq: u64) {
    info!(event = "outcome.recorded", revision_id = %revision_id, outcome = %outcome, seq = seq);
}

pub fn emit_learner_trained(model_version: u64, records: usize, duration_ms: u64) {
    info!(
        event = "learner.trained",
        model_version = model_version,
        records = records,
        duration_ms = duration_ms,
    );
}

pub fn emit_agent_transition(task_id: &str, from: &str, to: &str) {
    info!(event = "agent.transition", task_id = %task_id, from = %from, to = %to);
}

/// Pipeline ended with an error (warning level).
pub fn emit_pipeline_error(revision_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "pipeline.error", revision_id = %revision_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_span_create() {
        let _span = PipelineSpan::enter("42", "abc123");
        emit_pipeline_started("abc123", "42");
    }
}
