//! Error types for mergeguard-state

use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Could not connect to or select the backing database.
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Any other backend failure (query, decode, constraint).
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A digest string was not 64 lowercase hex characters.
    #[error("Invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// `finish` was called for a revision that was never claimed.
    #[error("No apply claim for revision {revision_id}")]
    ClaimNotFound { revision_id: String },

    /// `finish` was called on a claim that is no longer pending.
    #[error("Apply claim for revision {revision_id} is {status}, expected pending")]
    InvalidApplyState { revision_id: String, status: String },

    /// Payload could not be (de)serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
