//! In-memory fakes for storage traits
//!
//! Provides `MemoryDecisionStore`, `MemoryApplyLedger`, and `MemoryOutcomeLog`
//! that satisfy the trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryDecisionStore
// ---------------------------------------------------------------------------

/// In-memory decision store backed by a `HashMap<revision_id, row>`.
#[derive(Debug, Default)]
pub struct MemoryDecisionStore {
    rows: Mutex<HashMap<String, DecisionRow>>,
}

impl MemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionStore for MemoryDecisionStore {
    async fn put(&self, row: DecisionRow) -> StorageResult<()> {
        lock(&self.rows).insert(row.revision_id.clone(), row);
        Ok(())
    }

    async fn get(&self, revision_id: &str) -> StorageResult<Option<DecisionRow>> {
        Ok(lock(&self.rows).get(revision_id).cloned())
    }

    async fn list_for_change(&self, change_id: &str) -> StorageResult<Vec<DecisionRow>> {
        Ok(lock(&self.rows)
            .values()
            .filter(|r| r.change_id == change_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryApplyLedger
// ---------------------------------------------------------------------------

/// In-memory apply ledger. The mutex makes claim a true compare-and-set.
#[derive(Debug, Default)]
pub struct MemoryApplyLedger {
    rows: Mutex<HashMap<String, AppliedRecord>>,
}

impl MemoryApplyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_if_absent(&self, record: AppliedRecord) -> ClaimOutcome {
        let mut rows = lock(&self.rows);
        match rows.get(&record.revision_id) {
            Some(existing) => ClaimOutcome::Existing(existing.clone()),
            None => {
                rows.insert(record.revision_id.clone(), record);
                ClaimOutcome::Claimed
            }
        }
    }
}

#[async_trait]
impl ApplyLedger for MemoryApplyLedger {
    async fn claim(
        &self,
        revision_id: &str,
        decision_digest: &ContentDigest,
    ) -> StorageResult<ClaimOutcome> {
        Ok(self.insert_if_absent(AppliedRecord::pending(revision_id, decision_digest)))
    }

    async fn finish(
        &self,
        revision_id: &str,
        status: ApplyStatus,
        result: serde_json::Value,
    ) -> StorageResult<AppliedRecord> {
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(revision_id)
            .ok_or_else(|| StorageError::ClaimNotFound {
                revision_id: revision_id.to_string(),
            })?;
        if row.status != ApplyStatus::Pending {
            return Err(StorageError::InvalidApplyState {
                revision_id: revision_id.to_string(),
                status: row.status.to_string(),
            });
        }
        row.status = status;
        row.result = result;
        row.completed_at = Some(Utc::now());
        Ok(row.clone())
    }

    async fn mark_superseded(
        &self,
        revision_id: &str,
        superseded_by: &str,
    ) -> StorageResult<ClaimOutcome> {
        Ok(self.insert_if_absent(AppliedRecord::superseded(revision_id, superseded_by)))
    }

    async fn get(&self, revision_id: &str) -> StorageResult<Option<AppliedRecord>> {
        Ok(lock(&self.rows).get(revision_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryOutcomeLog
// ---------------------------------------------------------------------------

/// In-memory append-only outcome log.
#[derive(Debug, Default)]
pub struct MemoryOutcomeLog {
    rows: Mutex<Vec<OutcomeRow>>,
}

impl MemoryOutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutcomeLog for MemoryOutcomeLog {
    async fn append(
        &self,
        revision_id: &str,
        payload: serde_json::Value,
    ) -> StorageResult<OutcomeRow> {
        let mut rows = lock(&self.rows);
        let row = OutcomeRow {
            seq: rows.len() as u64 + 1,
            revision_id: revision_id.to_string(),
            payload,
            recorded_at: Utc::now(),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn list(&self) -> StorageResult<Vec<OutcomeRow>> {
        Ok(lock(&self.rows).clone())
    }

    async fn count(&self) -> StorageResult<u64> {
        Ok(lock(&self.rows).len() as u64)
    }

    async fn find(&self, revision_id: &str) -> StorageResult<Option<OutcomeRow>> {
        Ok(lock(&self.rows)
            .iter()
            .find(|r| r.revision_id == revision_id)
            .cloned())
    }
}
