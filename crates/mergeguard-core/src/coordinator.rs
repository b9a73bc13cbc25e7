//! One pipeline task per inbound event, serialized per logical change.
//!
//! Distinct changes run fully in parallel. When a new revision arrives for a
//! change that already has one, the older pipeline is told to stop and its
//! revision is marked superseded in the apply ledger, so it cannot act even
//! if it reaches the executor.
//!
//! A slot lives only while its pipeline runs. Ordering across finished
//! pipelines comes from storage: a revision that already has a decision or a
//! ledger row is a redelivery and never displaces another revision.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mergeguard_state::{ApplyStatus, ClaimOutcome};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::{ChangeEvent, ChangeSnapshot, EvaluatedChange, Result};
use crate::engine::{Engine, PipelineOutcome};
use crate::metrics::METRICS;
use crate::obs;

/// Revision whose pipeline is running for one change.
struct Slot {
    revision_id: String,
    observed_at: DateTime<Utc>,
    cancel: watch::Sender<bool>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// What happened to a submitted event.
#[derive(Debug)]
pub enum Submission {
    /// A pipeline task is running for the event.
    Started(JoinHandle<Result<PipelineOutcome>>),
    /// The revision is already superseded; no pipeline was started.
    Dropped {
        revision_id: String,
        superseded_by: Option<String>,
    },
}

pub struct PipelineCoordinator {
    engine: Arc<Engine>,
    slots: Slots,
}

impl PipelineCoordinator {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Validate `event` and start its pipeline.
    ///
    /// Malformed events fail here, before any task is spawned.
    pub async fn submit(&self, event: &ChangeEvent) -> Result<Submission> {
        let snapshot = ChangeSnapshot::build(event)?;
        let revision_id = snapshot.revision_id().to_string();
        let change_id = snapshot.change_id().to_string();
        let stores = self.engine.stores();

        let mut slots = self.slots.lock().await;

        // Same revision again while it runs: share its cancel signal and let
        // the ledger deduplicate.
        if let Some(slot) = slots.get(&change_id) {
            if slot.revision_id == revision_id {
                let cancel_rx = slot.cancel.subscribe();
                drop(slots);
                return Ok(self.spawn_pipeline(snapshot, cancel_rx));
            }
        }

        let prior = stores.ledger.get(&revision_id).await?;
        if let Some(prior) = &prior {
            if prior.status == ApplyStatus::Superseded {
                return Ok(self.drop_stale(revision_id, prior.superseded_by.clone()));
            }
        }

        let seen = prior.is_some() || stores.decisions.get(&revision_id).await?.is_some();
        if seen {
            if let Some(slot) = slots.get(&change_id) {
                let newer = slot.revision_id.clone();
                return self.supersede_arrival(revision_id, newer).await;
            }
            drop(slots);
            let stored = self.engine.decision(&revision_id).await?;
            if let Some(newer) = self.newer_decision(&change_id, &revision_id, stored).await? {
                return self.supersede_arrival(revision_id, newer).await;
            }
            debug!(revision_id = %revision_id, "redelivered revision; replaying stored decision");
            let engine = self.engine.clone();
            let handle = tokio::spawn(async move { engine.apply_stored(&revision_id).await });
            return Ok(Submission::Started(handle));
        }

        let cancel_rx = match slots.get(&change_id) {
            // An older revision arriving late loses to the one running.
            Some(slot) if snapshot.observed_at() < slot.observed_at => {
                let newer = slot.revision_id.clone();
                return self.supersede_arrival(revision_id, newer).await;
            }
            Some(slot) => {
                let stale = slot.revision_id.clone();
                slot.cancel.send_replace(true);
                if let ClaimOutcome::Existing(existing) =
                    stores.ledger.mark_superseded(&stale, &revision_id).await?
                {
                    debug!(
                        revision_id = %stale,
                        status = %existing.status,
                        "stale revision was already claimed"
                    );
                }
                METRICS.inc_superseded();
                obs::emit_pipeline_superseded(&stale, &revision_id);
                install(&mut slots, &snapshot)
            }
            None => {
                let latest = self.engine.latest_decision(&change_id).await?;
                if let Some(latest) = latest {
                    if snapshot.observed_at() < latest.snapshot.observed_at() {
                        let newer = latest.revision_id().to_string();
                        return self.supersede_arrival(revision_id, newer).await;
                    }
                }
                install(&mut slots, &snapshot)
            }
        };
        drop(slots);

        Ok(self.spawn_pipeline(snapshot, cancel_rx))
    }

    fn spawn_pipeline(
        &self,
        snapshot: ChangeSnapshot,
        cancel_rx: watch::Receiver<bool>,
    ) -> Submission {
        let engine = self.engine.clone();
        let slots = self.slots.clone();
        let handle = tokio::spawn(async move {
            let change_id = snapshot.change_id().to_string();
            let revision_id = snapshot.revision_id().to_string();
            let result = engine.process_snapshot(snapshot, Some(cancel_rx)).await;
            release(&slots, &change_id, &revision_id).await;
            result
        });
        Submission::Started(handle)
    }

    /// Another revision with a later snapshot already has a stored decision.
    async fn newer_decision(
        &self,
        change_id: &str,
        revision_id: &str,
        stored: Option<EvaluatedChange>,
    ) -> Result<Option<String>> {
        let Some(latest) = self.engine.latest_decision(change_id).await? else {
            return Ok(None);
        };
        if latest.revision_id() == revision_id {
            return Ok(None);
        }
        let newer = stored
            .map_or(true, |s| s.snapshot.observed_at() < latest.snapshot.observed_at());
        Ok(newer.then(|| latest.revision_id().to_string()))
    }

    /// Record that `revision_id` lost to `newer` and report it dropped.
    async fn supersede_arrival(&self, revision_id: String, newer: String) -> Result<Submission> {
        let ledger = &self.engine.stores().ledger;
        if let ClaimOutcome::Existing(existing) = ledger.mark_superseded(&revision_id, &newer).await? {
            debug!(
                revision_id = %revision_id,
                status = %existing.status,
                "late revision keeps its ledger status"
            );
        }
        Ok(self.drop_stale(revision_id, Some(newer)))
    }

    fn drop_stale(&self, revision_id: String, superseded_by: Option<String>) -> Submission {
        METRICS.inc_superseded();
        obs::emit_pipeline_superseded(
            &revision_id,
            superseded_by.as_deref().unwrap_or("unknown"),
        );
        Submission::Dropped {
            revision_id,
            superseded_by,
        }
    }

    /// Revision whose pipeline is running for `change_id`.
    pub async fn current_revision(&self, change_id: &str) -> Option<String> {
        self.slots
            .lock()
            .await
            .get(change_id)
            .map(|s| s.revision_id.clone())
    }
}

fn install(slots: &mut HashMap<String, Slot>, snapshot: &ChangeSnapshot) -> watch::Receiver<bool> {
    let (cancel, rx) = watch::channel(false);
    slots.insert(
        snapshot.change_id().to_string(),
        Slot {
            revision_id: snapshot.revision_id().to_string(),
            observed_at: snapshot.observed_at(),
            cancel,
        },
    );
    rx
}

/// Free the slot once no pipeline for its revision is still running.
async fn release(slots: &Slots, change_id: &str, revision_id: &str) {
    let mut slots = slots.lock().await;
    let done = slots
        .get(change_id)
        .is_some_and(|s| s.revision_id == revision_id && s.cancel.receiver_count() == 0);
    if done {
        slots.remove(change_id);
    }
}
