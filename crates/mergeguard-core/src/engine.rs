//! The decision pipeline.
//!
//! Builder → Predictor → Scorer → Selector → DecisionStore → Executor.
//! [`Engine::evaluate`] is side-effect free; [`Engine::process`] persists the
//! decision and applies it.

use std::sync::Arc;

use mergeguard_host::SourceControlHost;
use mergeguard_state::fakes::{MemoryApplyLedger, MemoryDecisionStore, MemoryOutcomeLog};
use mergeguard_state::{ApplyLedger, DecisionRow, DecisionStore, OutcomeLog, SurrealStore};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, Instrument};

use crate::config::{EngineConfig, StorageSettings};
use crate::domain::{
    ChangeEvent, ChangeSnapshot, DecisionRecord, EngineError, EvaluatedChange, OutcomeFeedback,
    OutcomeRecord, Result,
};
use crate::executor::{DecisionExecutor, ExecutionResult, RetryPolicy};
use crate::learning::{Learner, Predictor, TrainReport};
use crate::metrics::METRICS;
use crate::obs;
use crate::recorder::OutcomeRecorder;
use crate::{scoring, strategy};

/// The three persistence seams the engine writes through.
#[derive(Clone)]
pub struct Stores {
    pub decisions: Arc<dyn DecisionStore>,
    pub ledger: Arc<dyn ApplyLedger>,
    pub outcomes: Arc<dyn OutcomeLog>,
}

impl Stores {
    /// Process-local fakes; nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            decisions: Arc::new(MemoryDecisionStore::new()),
            ledger: Arc::new(MemoryApplyLedger::new()),
            outcomes: Arc::new(MemoryOutcomeLog::new()),
        }
    }

    pub fn from_surreal(store: Arc<SurrealStore>) -> Self {
        Self {
            decisions: store.clone(),
            ledger: store.clone(),
            outcomes: store,
        }
    }

    pub async fn connect(settings: &StorageSettings) -> Result<Self> {
        let store = SurrealStore::connect(&settings.store_config()).await?;
        Ok(Self::from_surreal(Arc::new(store)))
    }
}

/// Decision record plus what the executor did with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    #[serde(flatten)]
    pub record: DecisionRecord,
    pub execution: ExecutionResult,
}

pub struct Engine {
    stores: Stores,
    predictor: Arc<Predictor>,
    learner: Arc<Learner>,
    executor: DecisionExecutor,
    recorder: OutcomeRecorder,
}

impl Engine {
    pub fn new(config: &EngineConfig, stores: Stores, host: Arc<dyn SourceControlHost>) -> Self {
        let predictor = Arc::new(Predictor::new(config.learner.min_records));
        let learner = Arc::new(Learner::new(
            predictor.clone(),
            stores.outcomes.clone(),
            config.learner.clone(),
        ));
        let executor = DecisionExecutor::new(stores.ledger.clone(), host, &config.executor);
        let recorder = OutcomeRecorder::new(stores.decisions.clone(), stores.outcomes.clone())
            .with_ledger(stores.ledger.clone())
            .with_learner(learner.clone());

        Self {
            stores,
            predictor,
            learner,
            executor,
            recorder,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = self.executor.with_policy(policy);
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn predictor(&self) -> &Arc<Predictor> {
        &self.predictor
    }

    pub fn learner(&self) -> &Arc<Learner> {
        &self.learner
    }

    pub fn executor(&self) -> &DecisionExecutor {
        &self.executor
    }

    /// Score and decide without persisting or acting.
    pub fn evaluate(&self, event: &ChangeEvent) -> Result<EvaluatedChange> {
        self.evaluate_snapshot(ChangeSnapshot::build(event)?)
    }

    pub fn evaluate_snapshot(&self, snapshot: ChangeSnapshot) -> Result<EvaluatedChange> {
        let signal = self.predictor.signal(&snapshot);
        let assessment = scoring::score_with(&snapshot, signal);
        obs::emit_assessment_scored(
            snapshot.revision_id(),
            assessment.score,
            assessment.level,
            assessment.factors.len(),
        );

        let decision = strategy::decide(&assessment, &snapshot)?;
        obs::emit_decision_selected(
            snapshot.revision_id(),
            decision.strategy,
            decision.should_act,
        );
        EvaluatedChange::new(snapshot, assessment, decision)
    }

    /// Run the full pipeline for one event.
    pub async fn process(&self, event: &ChangeEvent) -> Result<PipelineOutcome> {
        let snapshot = ChangeSnapshot::build(event)?;
        self.process_snapshot(snapshot, None).await
    }

    /// Run the full pipeline, stopping before persistence or the ledger
    /// claim once `cancel` reads `true`.
    pub async fn process_snapshot(
        &self,
        snapshot: ChangeSnapshot,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<PipelineOutcome> {
        let span = obs::pipeline_span(snapshot.change_id(), snapshot.revision_id());
        let revision_id = snapshot.revision_id().to_string();
        async move {
            METRICS.inc_events_processed();
            obs::emit_pipeline_started(snapshot.revision_id(), snapshot.change_id());
            let cancelled = || cancel.as_ref().is_some_and(|rx| *rx.borrow());

            let evaluated = self.evaluate_snapshot(snapshot)?;
            let record = evaluated.record();
            if cancelled() {
                return Ok(superseded(record));
            }

            self.record_decision(&evaluated).await?;
            if cancelled() {
                return Ok(superseded(record));
            }

            let execution = self
                .executor
                .apply(&evaluated.decision, &evaluated.snapshot)
                .await?;
            Ok(PipelineOutcome { record, execution })
        }
        .instrument(span)
        .await
        .inspect_err(|e| obs::emit_pipeline_error(&revision_id, e))
    }

    /// Apply the stored decision for `revision_id`.
    pub async fn apply_stored(&self, revision_id: &str) -> Result<PipelineOutcome> {
        let evaluated = self
            .decision(revision_id)
            .await?
            .ok_or_else(|| EngineError::UnknownRevision(revision_id.to_string()))?;
        let execution = self
            .executor
            .apply(&evaluated.decision, &evaluated.snapshot)
            .await?;
        Ok(PipelineOutcome {
            record: evaluated.record(),
            execution,
        })
    }

    /// The persisted evaluation for a revision.
    pub async fn decision(&self, revision_id: &str) -> Result<Option<EvaluatedChange>> {
        match self.stores.decisions.get(revision_id).await? {
            Some(row) => Ok(Some(serde_json::from_value(row.payload)?)),
            None => Ok(None),
        }
    }

    /// The stored evaluation for `change_id` with the newest snapshot.
    pub async fn latest_decision(&self, change_id: &str) -> Result<Option<EvaluatedChange>> {
        let mut latest: Option<EvaluatedChange> = None;
        for row in self.stores.decisions.list_for_change(change_id).await? {
            let evaluated: EvaluatedChange = serde_json::from_value(row.payload)?;
            let newer = latest
                .as_ref()
                .map_or(true, |l| evaluated.snapshot.observed_at() > l.snapshot.observed_at());
            if newer {
                latest = Some(evaluated);
            }
        }
        Ok(latest)
    }

    pub async fn record_outcome(&self, feedback: &OutcomeFeedback) -> Result<OutcomeRecord> {
        self.recorder.record(feedback).await
    }

    pub async fn history(&self) -> Result<Vec<OutcomeRecord>> {
        self.recorder.history().await
    }

    /// Retrain immediately from the outcome log.
    pub async fn train(&self) -> Result<TrainReport> {
        self.learner.retrain_now().await
    }

    /// Store an evaluation so outcome feedback can be joined with it.
    pub async fn record_decision(&self, evaluated: &EvaluatedChange) -> Result<()> {
        let row = DecisionRow::new(
            evaluated.revision_id(),
            evaluated.snapshot.change_id(),
            serde_json::to_value(evaluated)?,
        )?;
        debug!(digest = %row.digest.short(), "persisting decision");
        self.stores.decisions.put(row).await?;
        Ok(())
    }
}

fn superseded(record: DecisionRecord) -> PipelineOutcome {
    debug!(revision_id = %record.revision_id, "pipeline cancelled by newer revision");
    PipelineOutcome {
        execution: ExecutionResult::superseded(&record.revision_id, None),
        record,
    }
}
