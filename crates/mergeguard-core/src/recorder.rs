//! Outcome recorder: joins feedback with the stored decision and appends it
//! to the outcome log.

use std::sync::Arc;

use mergeguard_state::{ApplyLedger, ApplyStatus, DecisionStore, OutcomeLog};
use tracing::warn;

use crate::domain::{EngineError, EvaluatedChange, OutcomeFeedback, OutcomeRecord, Result};
use crate::learning::Learner;
use crate::metrics::METRICS;
use crate::obs;

/// Decode every record in the outcome log, in append order.
pub async fn load_history(log: &dyn OutcomeLog) -> Result<Vec<OutcomeRecord>> {
    log.list()
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row.payload).map_err(EngineError::from))
        .collect()
}

pub struct OutcomeRecorder {
    decisions: Arc<dyn DecisionStore>,
    outcomes: Arc<dyn OutcomeLog>,
    ledger: Option<Arc<dyn ApplyLedger>>,
    learner: Option<Arc<Learner>>,
}

impl OutcomeRecorder {
    pub fn new(decisions: Arc<dyn DecisionStore>, outcomes: Arc<dyn OutcomeLog>) -> Self {
        Self {
            decisions,
            outcomes,
            ledger: None,
            learner: None,
        }
    }

    /// Refuse feedback for revisions the ledger marks superseded.
    pub fn with_ledger(mut self, ledger: Arc<dyn ApplyLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Trigger `learner` after every append.
    pub fn with_learner(mut self, learner: Arc<Learner>) -> Self {
        self.learner = Some(learner);
        self
    }

    /// Append the outcome for a revision that has a stored decision.
    ///
    /// Each revision contributes one example. Repeated feedback with the same
    /// outcome returns the first record without appending; a different
    /// outcome is a conflict.
    pub async fn record(&self, feedback: &OutcomeFeedback) -> Result<OutcomeRecord> {
        let revision_id = feedback.revision_id.as_str();
        let row = self
            .decisions
            .get(revision_id)
            .await?
            .ok_or_else(|| EngineError::UnknownRevision(revision_id.to_string()))?;

        if let Some(ledger) = &self.ledger {
            if let Some(applied) = ledger.get(revision_id).await? {
                if applied.status == ApplyStatus::Superseded {
                    return Err(EngineError::SupersededRevision {
                        revision_id: revision_id.to_string(),
                        superseded_by: applied.superseded_by,
                    });
                }
            }
        }

        if let Some(prior) = self.outcomes.find(revision_id).await? {
            let prior: OutcomeRecord = serde_json::from_value(prior.payload)?;
            if prior.outcome != feedback.outcome {
                return Err(EngineError::OutcomeConflict {
                    revision_id: revision_id.to_string(),
                    recorded: prior.outcome.to_string(),
                    received: feedback.outcome.to_string(),
                });
            }
            warn!(revision_id = %revision_id, outcome = %feedback.outcome, "duplicate outcome ignored");
            return Ok(prior);
        }

        let evaluated: EvaluatedChange = serde_json::from_value(row.payload)?;
        let record = OutcomeRecord::new(evaluated, feedback.outcome);
        let stored = self
            .outcomes
            .append(revision_id, serde_json::to_value(&record)?)
            .await?;

        METRICS.inc_outcomes();
        obs::emit_outcome_recorded(revision_id, feedback.outcome.as_str(), stored.seq);

        if let Some(learner) = &self.learner {
            learner.trigger();
        }
        Ok(record)
    }

    pub async fn history(&self) -> Result<Vec<OutcomeRecord>> {
        load_history(self.outcomes.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChangeEvent, ChangeSnapshot, CiStatus, Outcome};
    use crate::{scoring, strategy};
    use mergeguard_state::fakes::{MemoryApplyLedger, MemoryDecisionStore, MemoryOutcomeLog};
    use mergeguard_state::DecisionRow;

    async fn store_decision(store: &MemoryDecisionStore, revision: &str) {
        let snap =
            ChangeSnapshot::build(&ChangeEvent::new(revision, 3, 10, 5).with_ci(CiStatus::Pass))
                .unwrap();
        let assessment = scoring::score(&snap);
        let decision = strategy::decide(&assessment, &snap).unwrap();
        let eval = EvaluatedChange::new(snap, assessment, decision).unwrap();
        let row = DecisionRow::new(revision, revision, serde_json::to_value(&eval).unwrap())
            .unwrap();
        store.put(row).await.unwrap();
    }

    #[tokio::test]
    async fn records_outcome_with_its_decision() {
        let decisions = Arc::new(MemoryDecisionStore::new());
        let outcomes = Arc::new(MemoryOutcomeLog::new());
        store_decision(&decisions, "abc").await;

        let recorder = OutcomeRecorder::new(decisions, outcomes.clone());
        let record = recorder
            .record(&OutcomeFeedback::new("abc", Outcome::Failure))
            .await
            .unwrap();

        assert_eq!(record.revision_id(), "abc");
        assert_eq!(record.assessment.score, 100);
        assert_eq!(outcomes.count().await.unwrap(), 1);

        let history = recorder.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Outcome::Failure);
    }

    #[tokio::test]
    async fn unknown_revision_is_rejected() {
        let recorder = OutcomeRecorder::new(
            Arc::new(MemoryDecisionStore::new()),
            Arc::new(MemoryOutcomeLog::new()),
        );
        let err = recorder
            .record(&OutcomeFeedback::new("nope", Outcome::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownRevision(r) if r == "nope"));
    }

    #[tokio::test]
    async fn repeated_feedback_counts_once() {
        let decisions = Arc::new(MemoryDecisionStore::new());
        let outcomes = Arc::new(MemoryOutcomeLog::new());
        store_decision(&decisions, "abc").await;
        let recorder = OutcomeRecorder::new(decisions, outcomes.clone());

        let first = recorder
            .record(&OutcomeFeedback::new("abc", Outcome::Success))
            .await
            .unwrap();
        let again = recorder
            .record(&OutcomeFeedback::new("abc", Outcome::Success))
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(outcomes.count().await.unwrap(), 1);

        let err = recorder
            .record(&OutcomeFeedback::new("abc", Outcome::Failure))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OutcomeConflict { .. }));
        assert_eq!(outcomes.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn superseded_revision_feedback_is_refused() {
        let decisions = Arc::new(MemoryDecisionStore::new());
        let ledger = Arc::new(MemoryApplyLedger::new());
        let outcomes = Arc::new(MemoryOutcomeLog::new());
        store_decision(&decisions, "old").await;
        ledger.mark_superseded("old", "new").await.unwrap();

        let recorder = OutcomeRecorder::new(decisions, outcomes.clone()).with_ledger(ledger);
        let err = recorder
            .record(&OutcomeFeedback::new("old", Outcome::Failure))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::SupersededRevision { ref superseded_by, .. }
                if superseded_by.as_deref() == Some("new")
        ));
        assert_eq!(outcomes.count().await.unwrap(), 0);
    }
}
