//! Storage trait definitions for MergeGuard
//!
//! These traits define the persistence seams of the decision engine:
//! - `DecisionStore`: latest outbound decision record per revision
//! - `ApplyLedger`: decisions-already-applied, compare-and-set on revision id
//! - `OutcomeLog`: append-only ground-truth outcomes used for retraining
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the canonical JSON encoding of `value`.
    pub fn from_json<T: Serialize>(value: &T) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DecisionStore — outbound decision records
// ---------------------------------------------------------------------------

/// A persisted outbound decision record.
///
/// `payload` is the serialized decision record produced by the engine; the
/// store treats it as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRow {
    pub revision_id: String,
    pub change_id: String,
    pub digest: ContentDigest,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionRow {
    pub fn new(
        revision_id: impl Into<String>,
        change_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> StorageResult<Self> {
        let digest = ContentDigest::from_json(&payload)?;
        Ok(Self {
            revision_id: revision_id.into(),
            change_id: change_id.into(),
            digest,
            payload,
            recorded_at: Utc::now(),
        })
    }
}

/// Latest decision record per revision id.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Insert or replace the record for `row.revision_id`.
    async fn put(&self, row: DecisionRow) -> StorageResult<()>;

    /// Fetch the record for a revision, if any.
    async fn get(&self, revision_id: &str) -> StorageResult<Option<DecisionRow>>;

    /// Every record stored for a logical change, in no particular order.
    async fn list_for_change(&self, change_id: &str) -> StorageResult<Vec<DecisionRow>>;
}

// ---------------------------------------------------------------------------
// ApplyLedger — at-most-once bookkeeping
// ---------------------------------------------------------------------------

/// Lifecycle of an apply claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// Claimed; side effects in flight.
    Pending,
    /// Side effects completed.
    Applied,
    /// Side effects attempted and the retry budget was exhausted.
    Failed,
    /// A newer revision of the same change arrived before this one acted.
    Superseded,
}

impl ApplyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApplyStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            "superseded" => Ok(Self::Superseded),
            other => Err(StorageError::Backend(format!("unknown apply status: {other}"))),
        }
    }
}

/// One row of the decisions-already-applied ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRecord {
    pub revision_id: String,
    /// Digest of the decision that claimed this revision. `None` for
    /// revisions claimed by supersession.
    pub decision_digest: Option<ContentDigest>,
    pub status: ApplyStatus,
    /// Execution result written by `finish`.
    pub result: serde_json::Value,
    pub superseded_by: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AppliedRecord {
    pub fn pending(revision_id: &str, decision_digest: &ContentDigest) -> Self {
        Self {
            revision_id: revision_id.to_string(),
            decision_digest: Some(decision_digest.clone()),
            status: ApplyStatus::Pending,
            result: serde_json::Value::Null,
            superseded_by: None,
            claimed_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn superseded(revision_id: &str, superseded_by: &str) -> Self {
        let now = Utc::now();
        Self {
            revision_id: revision_id.to_string(),
            decision_digest: None,
            status: ApplyStatus::Superseded,
            result: serde_json::Value::Null,
            superseded_by: Some(superseded_by.to_string()),
            claimed_at: now,
            completed_at: Some(now),
        }
    }
}

/// Result of a compare-and-set claim on a revision id.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the revision and must call `finish`.
    Claimed,
    /// Someone else already claimed it; here is what they recorded.
    Existing(AppliedRecord),
}

/// Durable record of decisions already applied.
///
/// Guarantees:
/// - At most one `claim` (or `mark_superseded`) per revision id returns
///   `Claimed`, even under concurrent callers.
/// - `finish` only transitions a `Pending` claim.
#[async_trait]
pub trait ApplyLedger: Send + Sync {
    /// Atomically claim `revision_id` for applying the given decision.
    async fn claim(
        &self,
        revision_id: &str,
        decision_digest: &ContentDigest,
    ) -> StorageResult<ClaimOutcome>;

    /// Close a pending claim with its final status and result.
    async fn finish(
        &self,
        revision_id: &str,
        status: ApplyStatus,
        result: serde_json::Value,
    ) -> StorageResult<AppliedRecord>;

    /// Claim `revision_id` on behalf of a newer revision so any late
    /// pipeline for it finds the slot taken.
    async fn mark_superseded(
        &self,
        revision_id: &str,
        superseded_by: &str,
    ) -> StorageResult<ClaimOutcome>;

    /// Fetch the ledger row for a revision.
    async fn get(&self, revision_id: &str) -> StorageResult<Option<AppliedRecord>>;
}

// ---------------------------------------------------------------------------
// OutcomeLog — append-only feedback
// ---------------------------------------------------------------------------

/// One appended outcome. `seq` is assigned by the log, starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRow {
    pub seq: u64,
    pub revision_id: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only outcome log.
#[async_trait]
pub trait OutcomeLog: Send + Sync {
    /// Append an outcome payload and return the stored row.
    async fn append(&self, revision_id: &str, payload: serde_json::Value)
        -> StorageResult<OutcomeRow>;

    /// All rows in append order.
    async fn list(&self) -> StorageResult<Vec<OutcomeRow>>;

    /// Number of rows appended so far.
    async fn count(&self) -> StorageResult<u64>;

    /// Earliest row appended for `revision_id`.
    async fn find(&self, revision_id: &str) -> StorageResult<Option<OutcomeRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_64_hex_chars() {
        let d = ContentDigest::from_bytes(b"decision");
        assert_eq!(d.as_str().len(), 64);
        assert_eq!(d.short().len(), 12);
    }

    #[test]
    fn digest_rejects_bad_hex() {
        let err = ContentDigest::try_from("xyz".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn json_digest_is_stable() {
        let v = serde_json::json!({"revision_id": "abc", "score": 40});
        assert_eq!(
            ContentDigest::from_json(&v).unwrap(),
            ContentDigest::from_json(&v.clone()).unwrap()
        );
    }

    #[test]
    fn apply_status_parses_its_own_display() {
        for s in [
            ApplyStatus::Pending,
            ApplyStatus::Applied,
            ApplyStatus::Failed,
            ApplyStatus::Superseded,
        ] {
            assert_eq!(s.to_string().parse::<ApplyStatus>().unwrap(), s);
        }
        assert!("merged".parse::<ApplyStatus>().is_err());
    }
}
