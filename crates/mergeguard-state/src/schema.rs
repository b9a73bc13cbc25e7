//! SurrealDB row types
//!
//! These mirror the `storage_traits` records but keep SurrealDB specifics
//! (record ids, native datetimes, string enums) out of the trait surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{
    AppliedRecord, ApplyStatus, ContentDigest, DecisionRow, OutcomeRow, StorageResult,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

// ---------------------------------------------------------------------------
// decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbDecision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub revision_id: String,
    pub change_id: String,
    pub digest: String,
    pub payload: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl DbDecision {
    pub fn from_row(row: DecisionRow) -> Self {
        Self {
            id: None,
            revision_id: row.revision_id,
            change_id: row.change_id,
            digest: row.digest.as_str().to_string(),
            payload: row.payload,
            recorded_at: row.recorded_at,
        }
    }

    pub fn into_row(self) -> StorageResult<DecisionRow> {
        Ok(DecisionRow {
            revision_id: self.revision_id,
            change_id: self.change_id,
            digest: ContentDigest::try_from(self.digest)?,
            payload: self.payload,
            recorded_at: self.recorded_at,
        })
    }
}

// ---------------------------------------------------------------------------
// applied
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbApplied {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub revision_id: String,
    pub decision_digest: Option<String>,
    /// "pending" | "applied" | "failed" | "superseded"
    pub status: String,
    #[serde(default)]
    pub result: serde_json::Value,
    pub superseded_by: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub claimed_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DbApplied {
    pub fn from_record(rec: AppliedRecord) -> Self {
        Self {
            id: None,
            revision_id: rec.revision_id,
            decision_digest: rec.decision_digest.map(|d| d.as_str().to_string()),
            status: rec.status.as_str().to_string(),
            result: rec.result,
            superseded_by: rec.superseded_by,
            claimed_at: rec.claimed_at,
            completed_at: rec.completed_at,
        }
    }

    pub fn into_record(self) -> StorageResult<AppliedRecord> {
        Ok(AppliedRecord {
            revision_id: self.revision_id,
            decision_digest: self
                .decision_digest
                .map(ContentDigest::try_from)
                .transpose()?,
            status: self.status.parse::<ApplyStatus>()?,
            result: self.result,
            superseded_by: self.superseded_by,
            claimed_at: self.claimed_at,
            completed_at: self.completed_at,
        })
    }

    /// Close a pending row. Errors if the row is not pending.
    pub fn finish(mut self, status: ApplyStatus, result: serde_json::Value) -> StorageResult<Self> {
        if self.status != ApplyStatus::Pending.as_str() {
            return Err(StorageError::InvalidApplyState {
                revision_id: self.revision_id,
                status: self.status,
            });
        }
        self.status = status.as_str().to_string();
        self.result = result;
        self.completed_at = Some(Utc::now());
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub seq: u64,
    pub revision_id: String,
    pub payload: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl DbOutcome {
    pub fn new(seq: u64, revision_id: &str, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            seq,
            revision_id: revision_id.to_string(),
            payload,
            recorded_at: Utc::now(),
        }
    }

    pub fn into_row(self) -> OutcomeRow {
        OutcomeRow {
            seq: self.seq,
            revision_id: self.revision_id,
            payload: self.payload,
            recorded_at: self.recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_round_trips_through_db_row() {
        let digest = ContentDigest::from_bytes(b"decision");
        let rec = AppliedRecord::pending("rev-1", &digest);
        let back = DbApplied::from_record(rec.clone()).into_record().unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn finish_rejects_non_pending_row() {
        let rec = AppliedRecord::superseded("rev-1", "rev-2");
        let err = DbApplied::from_record(rec)
            .finish(ApplyStatus::Applied, serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidApplyState { .. }));
    }
}
