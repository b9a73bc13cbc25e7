//! MergeGuard Host: the source-control host seam
//!
//! The decision engine never talks HTTP directly. It drives a
//! [`SourceControlHost`], which applies labels, posts comments, and merges.
//!
//! - [`GitHubHost`]: REST client for GitHub-compatible hosts
//! - [`RecordingHost`]: in-memory fake that records calls and can be
//!   scripted to fail

mod error;
pub mod github;
pub mod recording;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::HostError;
pub use github::{GitHubConfig, GitHubHost};
pub use recording::{HostCall, RecordingHost};

/// Result type for host operations
pub type HostResult<T> = std::result::Result<T, HostError>;

/// How the host should integrate the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Squash,
    Merge,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Squash => "squash",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addresses one revision of one logical change on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRef {
    /// Logical change (e.g. pull request number).
    pub change_id: String,
    /// Exact revision (head commit) the decision was computed for.
    pub revision_id: String,
}

impl ChangeRef {
    pub fn new(change_id: impl Into<String>, revision_id: impl Into<String>) -> Self {
        Self {
            change_id: change_id.into(),
            revision_id: revision_id.into(),
        }
    }
}

impl std::fmt::Display for ChangeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.change_id, self.revision_id)
    }
}

/// Side-effecting operations on a source-control host.
///
/// Implementations should be safe to retry: labels are set-like, and merges
/// pinned to `revision_id` are refused by the host once the head moves.
#[async_trait]
pub trait SourceControlHost: Send + Sync {
    /// Apply a label to the change.
    async fn add_label(&self, change: &ChangeRef, label: &str) -> HostResult<()>;

    /// Post a comment on the change.
    async fn post_comment(&self, change: &ChangeRef, body: &str) -> HostResult<()>;

    /// Merge the change at exactly `change.revision_id`.
    async fn merge(&self, change: &ChangeRef, method: MergeMethod) -> HostResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MergeMethod::Squash).unwrap(),
            "\"squash\""
        );
        assert_eq!(MergeMethod::Merge.to_string(), "merge");
    }

    #[test]
    fn change_ref_display() {
        assert_eq!(ChangeRef::new("42", "abc123").to_string(), "42@abc123");
    }
}
