//! Background retraining.
//!
//! The outcome recorder calls [`Learner::trigger`] after each append. The
//! loop started by [`Learner::spawn`] coalesces triggers and trains at most
//! once per `retrain_interval`. Fitting runs on the blocking pool under
//! `train_timeout`; a model that misses the deadline is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mergeguard_state::OutcomeLog;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LearnerSettings;
use crate::domain::{EngineError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::recorder::load_history;

use super::model::TrainingParams;
use super::predictor::Predictor;

/// Rate limit for retraining.
#[derive(Debug, Clone)]
pub struct RetrainGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RetrainGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// How long to wait at `now` before the next run is allowed.
    pub fn wait_time(&self, now: Instant) -> Duration {
        match self.last {
            None => Duration::ZERO,
            Some(last) => (last + self.interval).saturating_duration_since(now),
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainReport {
    /// Version in use after the run.
    pub model_version: u64,
    pub records: usize,
    /// Whether a new model was published.
    pub published: bool,
    pub duration_ms: u64,
}

pub struct Learner {
    predictor: Arc<Predictor>,
    outcomes: Arc<dyn OutcomeLog>,
    settings: LearnerSettings,
    wake: Notify,
    runs: AtomicU64,
}

impl Learner {
    pub fn new(
        predictor: Arc<Predictor>,
        outcomes: Arc<dyn OutcomeLog>,
        settings: LearnerSettings,
    ) -> Self {
        Self {
            predictor,
            outcomes,
            settings,
            wake: Notify::new(),
            runs: AtomicU64::new(0),
        }
    }

    pub fn predictor(&self) -> &Arc<Predictor> {
        &self.predictor
    }

    /// Request a retrain. Cheap; triggers are coalesced.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Training runs started so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Train on the full outcome log now, ignoring the rate limit.
    pub async fn retrain_now(&self) -> Result<TrainReport> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let history = load_history(self.outcomes.as_ref()).await?;
        let records = history.len();

        let params = TrainingParams {
            epochs: self.settings.epochs,
            learning_rate: self.settings.learning_rate,
        };
        let predictor = self.predictor.clone();
        let fitting =
            tokio::task::spawn_blocking(move || predictor.next_model(&history, params));

        let next = tokio::time::timeout(self.settings.train_timeout(), fitting)
            .await
            .map_err(|_| {
                EngineError::Training(format!(
                    "timed out after {}s",
                    self.settings.train_timeout_secs
                ))
            })?
            .map_err(|e| EngineError::Training(e.to_string()))?;

        let published = match next {
            Some(model) => {
                let trained = model.is_trained();
                let published = self.predictor.publish(model);
                if published && trained {
                    METRICS.inc_models_trained();
                }
                published
            }
            None => false,
        };

        let report = TrainReport {
            model_version: self.predictor.version(),
            records,
            published,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if published {
            obs::emit_learner_trained(report.model_version, records, report.duration_ms);
        } else {
            debug!(records, "no new model published");
        }
        Ok(report)
    }

    /// Run the debounced retrain loop until `shutdown` flips or its sender
    /// is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut gate = RetrainGate::new(self.settings.retrain_interval());
            loop {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = shutdown.changed() => break,
                }

                let wait = gate.wait_time(Instant::now());
                if !wait.is_zero() {
                    debug!(wait_ms = wait.as_millis() as u64, "retrain deferred");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.changed() => break,
                    }
                }

                gate.mark(Instant::now());
                if let Err(e) = self.retrain_now().await {
                    warn!(error = %e, "retrain failed; keeping current model");
                }
            }
            debug!("learner loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_is_immediate() {
        let gate = RetrainGate::new(Duration::from_secs(300));
        assert_eq!(gate.wait_time(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn runs_are_spaced_by_interval() {
        let mut gate = RetrainGate::new(Duration::from_secs(300));
        let t0 = Instant::now();
        gate.mark(t0);

        assert_eq!(gate.wait_time(t0), Duration::from_secs(300));
        assert_eq!(
            gate.wait_time(t0 + Duration::from_secs(100)),
            Duration::from_secs(200)
        );
        assert_eq!(gate.wait_time(t0 + Duration::from_secs(301)), Duration::ZERO);
    }
}
