//! On-disk archive of terminal agent tasks.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use mergeguard_state::ContentDigest;

use super::task::AgentReport;

/// Persist `<dir>/<task_id>.json` and `<dir>/<task_id>.digest`.
pub fn write_report(dir: &Path, report: &AgentReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;

    let report_path = dir.join(format!("{}.json", report.task_id));
    let digest_path = dir.join(format!("{}.digest", report.task_id));
    let json = serde_json::to_vec_pretty(report).context("serialize agent report")?;
    let digest = ContentDigest::from_bytes(&json);

    std::fs::write(&report_path, &json).with_context(|| format!("write {:?}", report_path))?;
    std::fs::write(&digest_path, digest.as_str())
        .with_context(|| format!("write {:?}", digest_path))?;

    Ok(report_path)
}

/// Read an archived report, verifying it against its digest.
pub fn read_report(dir: &Path, task_id: &str) -> Result<AgentReport> {
    let report_path = dir.join(format!("{task_id}.json"));
    let digest_path = dir.join(format!("{task_id}.digest"));

    let json = std::fs::read(&report_path).with_context(|| format!("read {:?}", report_path))?;
    let expected = std::fs::read_to_string(&digest_path)
        .with_context(|| format!("read {:?}", digest_path))?;
    let actual = ContentDigest::from_bytes(&json);
    if expected.trim() != actual.as_str() {
        bail!(
            "digest mismatch for task {task_id}: expected {}, got {}",
            expected.trim(),
            actual.as_str()
        );
    }

    serde_json::from_slice(&json).with_context(|| format!("parse {:?}", report_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentEvent, AgentTask};
    use crate::domain::ChangeEvent;

    fn report() -> AgentReport {
        let mut task = AgentTask::with_id("task-1", ChangeEvent::new("abc", 1, 1, 1));
        task.apply(AgentEvent::Aborted {
            reason: "superseded".into(),
        })
        .unwrap();
        task.into_report().unwrap()
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let original = report();
        let path = write_report(dir.path(), &original).unwrap();
        assert!(path.ends_with("task-1.json"));

        let loaded = read_report(dir.path(), "task-1").unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn tampered_report_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(dir.path(), &report()).unwrap();

        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("superseded", "completed");
        std::fs::write(&path, tampered).unwrap();

        let err = read_report(dir.path(), "task-1").unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
    }
}
