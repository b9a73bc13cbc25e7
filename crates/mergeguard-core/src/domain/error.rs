//! Engine error taxonomy.

use mergeguard_host::HostError;
use mergeguard_state::StorageError;

/// Errors produced by the decision engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("malformed snapshot: {field}: {reason}")]
    MalformedSnapshot { field: &'static str, reason: String },

    #[error("revision mismatch: expected {expected}, got {actual}")]
    RevisionMismatch { expected: String, actual: String },

    #[error("no decision recorded for revision {0}")]
    UnknownRevision(String),

    #[error("revision {revision_id} was superseded by {}", .superseded_by.as_deref().unwrap_or("a newer revision"))]
    SupersededRevision {
        revision_id: String,
        superseded_by: Option<String>,
    },

    #[error("outcome for revision {revision_id} already recorded as {recorded}, got {received}")]
    OutcomeConflict {
        revision_id: String,
        recorded: String,
        received: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedSnapshot {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_snapshot_names_the_field() {
        let err = EngineError::malformed("files_changed", "must not be negative");
        assert_eq!(
            err.to_string(),
            "malformed snapshot: files_changed: must not be negative"
        );
    }

    #[test]
    fn storage_errors_convert() {
        let err: EngineError = StorageError::ClaimNotFound {
            revision_id: "abc".into(),
        }
        .into();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
