//! SurrealDB-backed implementations of the storage traits
//!
//! One [`SurrealStore`] connection serves all three traits. The `applied`
//! table's unique index on `revision_id` is what makes `claim` a
//! compare-and-set across processes.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::schema::{DbApplied, DbDecision, DbOutcome};
use crate::storage_traits::{
    AppliedRecord, ApplyLedger, ApplyStatus, ClaimOutcome, ContentDigest, DecisionRow,
    DecisionStore, OutcomeLog, OutcomeRow, StorageResult,
};

/// Connection settings for [`SurrealStore::connect`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `mem://`, `surrealkv://<path>`, or a remote `ws://`/`wss://` endpoint.
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "surrealkv://.mergeguard/db".to_string(),
            namespace: "mergeguard".to_string(),
            database: "main".to_string(),
        }
    }
}

/// SurrealDB-backed store for decisions, apply claims, and outcomes.
pub struct SurrealStore {
    db: Surreal<Any>,
    /// Serializes outcome appends so `seq` stays dense.
    append_lock: Mutex<()>,
    /// Serializes in-process claims; the unique index covers other processes.
    claim_lock: Mutex<()>,
    /// Makes the delete-then-create in `DecisionStore::put` atomic in-process.
    decision_lock: Mutex<()>,
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect(&StoreConfig {
            url: "mem://".to_string(),
            ..StoreConfig::default()
        })
        .await
    }

    /// Connect, select namespace/database, and run `init_schema`.
    ///
    /// For `surrealkv://` URLs the parent directory is created first.
    pub async fn connect(config: &StoreConfig) -> StorageResult<Self> {
        if let Some(path) = config.url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StorageError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to connect to {}: {}", config.url, e))
            })?;

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!(url = %config.url, "SurrealStore connected");
        Ok(Self {
            db,
            append_lock: Mutex::new(()),
            claim_lock: Mutex::new(()),
            decision_lock: Mutex::new(()),
        })
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_decision(&self, rid: &str) -> StorageResult<Option<DbDecision>> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM decisions WHERE revision_id = $rid")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbDecision> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_applied(&self, rid: &str) -> StorageResult<Option<DbApplied>> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM applied WHERE revision_id = $rid")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbApplied> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    /// Insert `row` unless a row for the same revision exists.
    ///
    /// The unique index rejects the losing writer of a race; the loser then
    /// reads back the winner's row.
    async fn insert_applied(&self, row: DbApplied) -> StorageResult<ClaimOutcome> {
        let _guard = self.claim_lock.lock().await;
        let rid = row.revision_id.clone();
        if let Some(existing) = self.fetch_applied(&rid).await? {
            return Ok(ClaimOutcome::Existing(existing.into_record()?));
        }

        let created: Result<Option<DbApplied>, surrealdb::Error> =
            self.db.create("applied").content(row).await;

        match created {
            Ok(_) => {
                debug!(revision_id = %rid, "apply claim inserted");
                Ok(ClaimOutcome::Claimed)
            }
            Err(e) => match self.fetch_applied(&rid).await? {
                Some(existing) => Ok(ClaimOutcome::Existing(existing.into_record()?)),
                None => Err(StorageError::Backend(e.to_string())),
            },
        }
    }
}

#[async_trait]
impl DecisionStore for SurrealStore {
    async fn put(&self, row: DecisionRow) -> StorageResult<()> {
        let _guard = self.decision_lock.lock().await;
        let rid = row.revision_id.clone();

        self.db
            .query("DELETE decisions WHERE revision_id = $rid")
            .bind(("rid", rid.clone()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let created: Result<Option<DbDecision>, surrealdb::Error> = self
            .db
            .create("decisions")
            .content(DbDecision::from_row(row))
            .await;

        match created {
            Ok(_) => Ok(()),
            // Another process won the unique index for this revision.
            Err(e) => match self.fetch_decision(&rid).await? {
                Some(_) => Ok(()),
                None => Err(StorageError::Backend(e.to_string())),
            },
        }
    }

    async fn get(&self, revision_id: &str) -> StorageResult<Option<DecisionRow>> {
        self.fetch_decision(revision_id)
            .await?
            .map(DbDecision::into_row)
            .transpose()
    }

    async fn list_for_change(&self, change_id: &str) -> StorageResult<Vec<DecisionRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM decisions WHERE change_id = $cid")
            .bind(("cid", change_id.to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbDecision> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(DbDecision::into_row).collect()
    }
}

#[async_trait]
impl ApplyLedger for SurrealStore {
    async fn claim(
        &self,
        revision_id: &str,
        decision_digest: &ContentDigest,
    ) -> StorageResult<ClaimOutcome> {
        self.insert_applied(DbApplied::from_record(AppliedRecord::pending(
            revision_id,
            decision_digest,
        )))
        .await
    }

    async fn finish(
        &self,
        revision_id: &str,
        status: ApplyStatus,
        result: serde_json::Value,
    ) -> StorageResult<AppliedRecord> {
        let row = self
            .fetch_applied(revision_id)
            .await?
            .ok_or_else(|| StorageError::ClaimNotFound {
                revision_id: revision_id.to_string(),
            })?;

        let mut updated = row.finish(status, result)?;
        updated.id = None;
        let rid_owned = revision_id.to_string();

        self.db
            .query("UPDATE applied CONTENT $row WHERE revision_id = $rid")
            .bind(("row", updated.clone()))
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        updated.into_record()
    }

    async fn mark_superseded(
        &self,
        revision_id: &str,
        superseded_by: &str,
    ) -> StorageResult<ClaimOutcome> {
        self.insert_applied(DbApplied::from_record(AppliedRecord::superseded(
            revision_id,
            superseded_by,
        )))
        .await
    }

    async fn get(&self, revision_id: &str) -> StorageResult<Option<AppliedRecord>> {
        self.fetch_applied(revision_id)
            .await?
            .map(DbApplied::into_record)
            .transpose()
    }
}

#[async_trait]
impl OutcomeLog for SurrealStore {
    async fn append(
        &self,
        revision_id: &str,
        payload: serde_json::Value,
    ) -> StorageResult<OutcomeRow> {
        let _guard = self.append_lock.lock().await;
        let seq = self.count().await? + 1;
        let row = DbOutcome::new(seq, revision_id, payload);

        let _created: Option<DbOutcome> = self
            .db
            .create("outcomes")
            .content(row.clone())
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(revision_id = %revision_id, seq, "outcome appended");
        Ok(row.into_row())
    }

    async fn list(&self) -> StorageResult<Vec<OutcomeRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM outcomes ORDER BY seq ASC")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbOutcome> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(DbOutcome::into_row).collect())
    }

    async fn count(&self) -> StorageResult<u64> {
        let mut res = self
            .db
            .query("SELECT count() AS n FROM outcomes GROUP ALL")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let n: Option<u64> = res
            .take((0, "n"))
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(n.unwrap_or(0))
    }

    async fn find(&self, revision_id: &str) -> StorageResult<Option<OutcomeRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM outcomes WHERE revision_id = $rid ORDER BY seq ASC LIMIT 1")
            .bind(("rid", revision_id.to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbOutcome> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next().map(DbOutcome::into_row))
    }
}
