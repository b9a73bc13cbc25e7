//! Versioned, read-mostly predictor.
//!
//! The live model sits in a `watch` channel as an `Arc<RiskModel>`. Readers
//! clone the current `Arc` without blocking writers; training builds a whole
//! new model and publishes it with a higher version.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::domain::{ChangeSnapshot, OutcomeRecord};
use crate::scoring::PredictorSignal;

use super::model::{features, fit, Features, RiskModel, TrainingParams};

pub struct Predictor {
    model: watch::Sender<Arc<RiskModel>>,
    min_records: usize,
}

impl Predictor {
    /// Start with the neutral model (version 0).
    pub fn new(min_records: usize) -> Self {
        let (model, _) = watch::channel(Arc::new(RiskModel::neutral(0)));
        Self { model, min_records }
    }

    pub fn min_records(&self) -> usize {
        self.min_records
    }

    /// The model readers should use right now.
    pub fn current(&self) -> Arc<RiskModel> {
        self.model.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.model.borrow().version
    }

    /// Receive every newly published model.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RiskModel>> {
        self.model.subscribe()
    }

    /// Probability of issue; 0.5 until a model has been trained.
    pub fn predict(&self, snapshot: &ChangeSnapshot) -> f64 {
        self.current().predict(&features(snapshot))
    }

    /// Scoring input for `snapshot` under the current model.
    pub fn signal(&self, snapshot: &ChangeSnapshot) -> PredictorSignal {
        let model = self.current();
        if !model.is_trained() {
            return PredictorSignal::Untrained;
        }
        let p = model.predict(&features(snapshot));
        if !p.is_finite() {
            return PredictorSignal::Unavailable;
        }
        PredictorSignal::Probability {
            p,
            model_version: model.version,
        }
    }

    /// Build the model that should follow the current one for `history`.
    ///
    /// Below `min_records` this is the neutral model, or `None` when the
    /// current model is already neutral.
    pub fn next_model(
        &self,
        history: &[OutcomeRecord],
        params: TrainingParams,
    ) -> Option<RiskModel> {
        let current = self.current();
        let version = current.version + 1;
        if history.len() < self.min_records {
            return current.is_trained().then(|| RiskModel::neutral(version));
        }
        let examples: Vec<(Features, bool)> = history
            .iter()
            .map(|r| (features(&r.snapshot), r.outcome.is_failure()))
            .collect();
        Some(fit(&examples, params, version))
    }

    /// Publish `model` if it is newer than the current one.
    pub fn publish(&self, model: RiskModel) -> bool {
        let model = Arc::new(model);
        let published = self.model.send_if_modified(|current| {
            if model.version > current.version {
                *current = model.clone();
                true
            } else {
                false
            }
        });
        if !published {
            debug!(version = model.version, "discarding stale model");
        }
        published
    }

    /// Train on `history` and return the version now in use.
    pub fn train(&self, history: &[OutcomeRecord], params: TrainingParams) -> u64 {
        if let Some(model) = self.next_model(history, params) {
            self.publish(model);
        }
        self.version()
    }
}
