//! Inbound change events and the canonical `ChangeSnapshot` built from them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use mergeguard_host::ChangeRef;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

/// Label that adds a fixed deduction to the risk score.
pub const HIGH_RISK_LABEL: &str = "high-risk";

/// Label that forces the score to zero.
pub const DO_NOT_MERGE_LABEL: &str = "do-not-merge";

/// Continuous-integration status of a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    #[default]
    Unknown,
    Pending,
    Pass,
    Fail,
}

impl CiStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }

    /// Parse a provider status. Unrecognized values are `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "pending" => Some(Self::Pending),
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl std::fmt::Display for CiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw change metadata as delivered by the source-control host.
///
/// Every field is optional on the wire so that missing data is reported as
/// a [`EngineError::MalformedSnapshot`] naming the field instead of a
/// generic deserialization error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default)]
    pub revision_id: Option<String>,
    /// Logical change (pull request). Defaults to the revision id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
    #[serde(default)]
    pub files_changed: Option<i64>,
    #[serde(default)]
    pub lines_added: Option<i64>,
    #[serde(default)]
    pub lines_deleted: Option<i64>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub ci_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// Event with the required fields set and CI status unknown.
    pub fn new(revision_id: &str, files_changed: i64, lines_added: i64, lines_deleted: i64) -> Self {
        Self {
            revision_id: Some(revision_id.to_string()),
            files_changed: Some(files_changed),
            lines_added: Some(lines_added),
            lines_deleted: Some(lines_deleted),
            ..Self::default()
        }
    }

    pub fn with_ci(mut self, status: CiStatus) -> Self {
        self.ci_status = Some(status.as_str().to_string());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.labels.push(label.to_string());
        self
    }

    pub fn with_change_id(mut self, change_id: &str) -> Self {
        self.change_id = Some(change_id.to_string());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Logical change key: `change_id`, or the revision id when absent.
    pub fn change_key(&self) -> Option<&str> {
        self.change_id
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(self.revision_id.as_deref())
    }
}

/// Canonical record of one revision's metadata at evaluation time.
///
/// Built once per inbound event by [`ChangeSnapshot::build`]; fields are
/// private so a snapshot cannot be altered after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    revision_id: String,
    change_id: String,
    files_changed: u32,
    lines_added: u64,
    lines_deleted: u64,
    labels: BTreeSet<String>,
    ci_status: CiStatus,
    author: Option<String>,
    source: Option<String>,
    observed_at: DateTime<Utc>,
}

impl ChangeSnapshot {
    /// Validate and normalize a raw event.
    ///
    /// Labels are trimmed, lowercased and deduplicated. A missing CI status
    /// becomes [`CiStatus::Unknown`]; so does an unrecognized one.
    pub fn build(event: &ChangeEvent) -> Result<Self> {
        let revision_id = event
            .revision_id
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| EngineError::malformed("revision_id", "missing or empty"))?
            .to_string();

        let files_changed = required_count(event.files_changed, "files_changed")?;
        let files_changed = u32::try_from(files_changed)
            .map_err(|_| EngineError::malformed("files_changed", "out of range"))?;
        let lines_added = required_count(event.lines_added, "lines_added")?;
        let lines_deleted = required_count(event.lines_deleted, "lines_deleted")?;

        let labels = event
            .labels
            .iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();

        let ci_status = match event.ci_status.as_deref() {
            None => CiStatus::Unknown,
            Some(raw) => CiStatus::parse(raw).unwrap_or_else(|| {
                tracing::warn!(revision_id = %revision_id, ci_status = raw, "unrecognized CI status; treating as unknown");
                CiStatus::Unknown
            }),
        };

        let change_id = event
            .change_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&revision_id)
            .to_string();

        Ok(Self {
            revision_id,
            change_id,
            files_changed,
            lines_added,
            lines_deleted,
            labels,
            ci_status,
            author: event.author.clone(),
            source: event.source.clone(),
            observed_at: event.timestamp.unwrap_or_else(Utc::now),
        })
    }

    pub fn revision_id(&self) -> &str {
        &self.revision_id
    }

    pub fn change_id(&self) -> &str {
        &self.change_id
    }

    pub fn files_changed(&self) -> u32 {
        self.files_changed
    }

    pub fn lines_added(&self) -> u64 {
        self.lines_added
    }

    pub fn lines_deleted(&self) -> u64 {
        self.lines_deleted
    }

    /// Added plus deleted lines.
    pub fn total_lines(&self) -> u64 {
        self.lines_added.saturating_add(self.lines_deleted)
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn ci_status(&self) -> CiStatus {
        self.ci_status
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Host address of this revision.
    pub fn change_ref(&self) -> ChangeRef {
        ChangeRef::new(self.change_id.as_str(), self.revision_id.as_str())
    }
}

fn required_count(value: Option<i64>, field: &'static str) -> Result<u64> {
    let value = value.ok_or_else(|| EngineError::malformed(field, "missing"))?;
    u64::try_from(value).map_err(|_| EngineError::malformed(field, "must not be negative"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_normalizes_labels() {
        let event = ChangeEvent::new("abc123", 3, 10, 5)
            .with_label(" High-Risk ")
            .with_label("high-risk")
            .with_label("")
            .with_ci(CiStatus::Pass);
        let snap = ChangeSnapshot::build(&event).unwrap();

        assert_eq!(snap.revision_id(), "abc123");
        assert_eq!(snap.change_id(), "abc123");
        assert_eq!(snap.total_lines(), 15);
        assert_eq!(snap.labels().len(), 1);
        assert!(snap.has_label(HIGH_RISK_LABEL));
        assert_eq!(snap.ci_status(), CiStatus::Pass);
    }

    #[test]
    fn missing_ci_status_is_unknown() {
        let snap = ChangeSnapshot::build(&ChangeEvent::new("r1", 1, 1, 1)).unwrap();
        assert_eq!(snap.ci_status(), CiStatus::Unknown);
    }

    #[test]
    fn unrecognized_ci_status_is_unknown_not_pass() {
        let mut event = ChangeEvent::new("r1", 1, 1, 1);
        event.ci_status = Some("green".to_string());
        let snap = ChangeSnapshot::build(&event).unwrap();
        assert_eq!(snap.ci_status(), CiStatus::Unknown);
    }

    #[test]
    fn missing_revision_is_malformed() {
        let mut event = ChangeEvent::new("r1", 1, 1, 1);
        event.revision_id = Some("  ".to_string());
        let err = ChangeSnapshot::build(&event).unwrap_err();
        assert!(matches!(
            err,
            EngineError::MalformedSnapshot {
                field: "revision_id",
                ..
            }
        ));
    }

    #[test]
    fn negative_counts_are_malformed() {
        let err = ChangeSnapshot::build(&ChangeEvent::new("r1", 1, -4, 1)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::MalformedSnapshot {
                field: "lines_added",
                ..
            }
        ));
    }

    #[test]
    fn missing_counts_are_malformed() {
        let mut event = ChangeEvent::new("r1", 1, 1, 1);
        event.files_changed = None;
        assert!(matches!(
            ChangeSnapshot::build(&event),
            Err(EngineError::MalformedSnapshot {
                field: "files_changed",
                ..
            })
        ));
    }

    #[test]
    fn parses_wire_shape() {
        let event: ChangeEvent = serde_json::from_str(
            r#"{"revision_id":"abc","files_changed":3,"lines_added":10,
                "lines_deleted":5,"labels":[],"ci_status":"pass"}"#,
        )
        .unwrap();
        let snap = ChangeSnapshot::build(&event).unwrap();
        assert_eq!(snap.files_changed(), 3);
        assert_eq!(snap.ci_status(), CiStatus::Pass);
    }

    #[test]
    fn change_key_falls_back_to_revision() {
        let event = ChangeEvent::new("abc", 1, 1, 1);
        assert_eq!(event.change_key(), Some("abc"));
        assert_eq!(event.with_change_id("42").change_key(), Some("42"));
    }
}
