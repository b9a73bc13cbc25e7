//! In-memory host fake
//!
//! Records every call in order. Failures can be scripted so executors can be
//! tested against transient and permanent host errors.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::HostError;
use crate::{ChangeRef, HostResult, MergeMethod, SourceControlHost};

/// One observed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Label { change: ChangeRef, label: String },
    Comment { change: ChangeRef, body: String },
    Merge { change: ChangeRef, method: MergeMethod },
}

#[derive(Debug, Default)]
struct Script {
    /// Remaining calls that fail with a retryable 503.
    transient_failures: u32,
    /// When set, every call fails with this error.
    permanent: Option<HostError>,
}

/// Host fake that records successful calls.
///
/// Failed attempts are not recorded, so `calls()` reflects what the host
/// actually applied.
#[derive(Debug, Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
    attempts: Mutex<u32>,
    script: Mutex<Script>,
    latency: Option<Duration>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `n` calls with HTTP 503.
    pub fn fail_next(&self, n: u32) {
        self.script.lock().unwrap_or_else(|p| p.into_inner()).transient_failures = n;
    }

    /// Fail every call with `error` until cleared.
    pub fn fail_always(&self, error: HostError) {
        self.script.lock().unwrap_or_else(|p| p.into_inner()).permanent = Some(error);
    }

    /// Drop any scripted failures.
    pub fn clear_failures(&self) {
        *self.script.lock().unwrap_or_else(|p| p.into_inner()) = Script::default();
    }

    /// Successful calls in order.
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Number of merges applied.
    pub fn merge_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HostCall::Merge { .. }))
            .count()
    }

    /// Total attempts, including failed ones.
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn attempt(&self, call: HostCall) -> HostResult<()> {
        *self.attempts.lock().unwrap_or_else(|p| p.into_inner()) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        {
            let mut script = self.script.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(err) = &script.permanent {
                return Err(err.clone());
            }
            if script.transient_failures > 0 {
                script.transient_failures -= 1;
                return Err(HostError::Status {
                    status: 503,
                    message: "scripted outage".to_string(),
                });
            }
        }

        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(call);
        Ok(())
    }
}

#[async_trait]
impl SourceControlHost for RecordingHost {
    async fn add_label(&self, change: &ChangeRef, label: &str) -> HostResult<()> {
        self.attempt(HostCall::Label {
            change: change.clone(),
            label: label.to_string(),
        })
        .await
    }

    async fn post_comment(&self, change: &ChangeRef, body: &str) -> HostResult<()> {
        self.attempt(HostCall::Comment {
            change: change.clone(),
            body: body.to_string(),
        })
        .await
    }

    async fn merge(&self, change: &ChangeRef, method: MergeMethod) -> HostResult<()> {
        self.attempt(HostCall::Merge {
            change: change.clone(),
            method,
        })
        .await
    }
}
