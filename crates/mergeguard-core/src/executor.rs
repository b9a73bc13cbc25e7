//! Decision executor.
//!
//! Applies a [`MergeDecision`] through a [`SourceControlHost`] at most once
//! per revision id. Only acting decisions claim the [`ApplyLedger`]; the
//! claim is a compare-and-set, so concurrent duplicates and late stale
//! pipelines get the recorded result instead of a second set of side
//! effects.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mergeguard_host::{HostError, HostResult, MergeMethod, SourceControlHost};
use mergeguard_state::{AppliedRecord, ApplyLedger, ApplyStatus, ClaimOutcome, ContentDigest};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::ExecutorSettings;
use crate::domain::{ChangeSnapshot, EngineError, MergeDecision, Result};
use crate::metrics::METRICS;
use crate::obs;

/// Bounded retry with exponential backoff for host calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Deadline for a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ExecutorSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `call` until it succeeds, fails permanently, or the budget runs out.
pub async fn call_with_retry<F, Fut>(policy: &RetryPolicy, op: &str, mut call: F) -> HostResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HostResult<()>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(HostError::Timeout {
                timeout_ms: policy.call_timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                METRICS.inc_host_retries();
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "host call failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// All side effects were applied.
    Applied,
    /// The decision does not act; nothing was done.
    Skipped,
    /// A host call failed permanently or exhausted its retries.
    Failed,
    /// A newer revision claimed this one first.
    Superseded,
    /// Another pipeline holds the claim and has not finished.
    InProgress,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
            Self::InProgress => "in_progress",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AppliedAction {
    Label { label: String },
    Comment,
    Merge { method: MergeMethod },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub revision_id: String,
    pub status: ExecutionStatus,
    /// Side effects that completed, in order.
    #[serde(default)]
    pub actions: Vec<AppliedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    /// Returned from the ledger rather than executed by this call.
    #[serde(default)]
    pub replayed: bool,
}

impl ExecutionResult {
    fn new(revision_id: &str, status: ExecutionStatus) -> Self {
        Self {
            revision_id: revision_id.to_string(),
            status,
            actions: Vec::new(),
            error: None,
            superseded_by: None,
            replayed: false,
        }
    }

    pub fn skipped(revision_id: &str) -> Self {
        Self::new(revision_id, ExecutionStatus::Skipped)
    }

    pub fn superseded(revision_id: &str, superseded_by: Option<String>) -> Self {
        Self {
            superseded_by,
            ..Self::new(revision_id, ExecutionStatus::Superseded)
        }
    }
}

/// Summary comment posted on acting decisions.
pub fn render_comment(decision: &MergeDecision) -> String {
    let mut body = format!(
        "**MergeGuard** decision for `{}`\n\n\
         - Risk score: {}/100 ({})\n\
         - Strategy: {}\n\
         - Method: {}\n\nReasoning:\n",
        decision.revision_id,
        decision.risk_score,
        decision.risk_level,
        decision.strategy,
        decision.method,
    );
    for line in &decision.reasoning {
        body.push_str("- ");
        body.push_str(line);
        body.push('\n');
    }
    body
}

pub struct DecisionExecutor {
    ledger: Arc<dyn ApplyLedger>,
    host: Arc<dyn SourceControlHost>,
    policy: RetryPolicy,
    ready_label: String,
}

impl DecisionExecutor {
    pub fn new(
        ledger: Arc<dyn ApplyLedger>,
        host: Arc<dyn SourceControlHost>,
        settings: &ExecutorSettings,
    ) -> Self {
        Self {
            ledger,
            host,
            policy: RetryPolicy::from_settings(settings),
            ready_label: settings.ready_label.clone(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Apply `decision`, computed for `snapshot`, at most once.
    pub async fn apply(
        &self,
        decision: &MergeDecision,
        snapshot: &ChangeSnapshot,
    ) -> Result<ExecutionResult> {
        let revision_id = snapshot.revision_id();
        if decision.revision_id != revision_id {
            return Err(EngineError::RevisionMismatch {
                expected: revision_id.to_string(),
                actual: decision.revision_id.clone(),
            });
        }
        if !decision.should_act {
            return Ok(ExecutionResult::skipped(revision_id));
        }

        let digest = ContentDigest::from_json(decision)?;
        if let ClaimOutcome::Existing(prior) = self.ledger.claim(revision_id, &digest).await? {
            return Ok(replay(prior));
        }

        let result = self.perform(decision, snapshot).await;
        let status = match result.status {
            ExecutionStatus::Applied => ApplyStatus::Applied,
            _ => ApplyStatus::Failed,
        };
        if let Err(e) = self
            .ledger
            .finish(revision_id, status, serde_json::to_value(&result)?)
            .await
        {
            error!(revision_id, error = %e, "side effects ran but the ledger claim was not closed");
            return Err(e.into());
        }

        if result.status == ExecutionStatus::Applied {
            METRICS.inc_decisions_applied();
        }
        obs::emit_decision_applied(revision_id, result.status.as_str(), result.actions.len());
        Ok(result)
    }

    async fn perform(&self, decision: &MergeDecision, snapshot: &ChangeSnapshot) -> ExecutionResult {
        let host = &self.host;
        let change = &snapshot.change_ref();
        let label = self.ready_label.as_str();
        let comment = &render_comment(decision);
        let method = decision.method;

        let mut result = ExecutionResult::new(snapshot.revision_id(), ExecutionStatus::Applied);

        let steps: [(&str, AppliedAction); 3] = [
            ("add_label", AppliedAction::Label { label: label.to_string() }),
            ("post_comment", AppliedAction::Comment),
            ("merge", AppliedAction::Merge { method }),
        ];
        for (op, action) in steps {
            let outcome = match &action {
                AppliedAction::Label { .. } => {
                    call_with_retry(&self.policy, op, move || host.add_label(change, label)).await
                }
                AppliedAction::Comment => {
                    call_with_retry(&self.policy, op, move || host.post_comment(change, comment))
                        .await
                }
                AppliedAction::Merge { method } => {
                    let method = *method;
                    call_with_retry(&self.policy, op, move || host.merge(change, method)).await
                }
            };
            match outcome {
                Ok(()) => result.actions.push(action),
                Err(e) => {
                    warn!(revision_id = %change.revision_id, op, error = %e, "host call failed");
                    result.status = ExecutionStatus::Failed;
                    result.error = Some(format!("{op}: {e}"));
                    break;
                }
            }
        }
        result
    }
}

/// Result for a revision someone else already claimed.
fn replay(prior: AppliedRecord) -> ExecutionResult {
    let revision_id = prior.revision_id.as_str();
    match prior.status {
        ApplyStatus::Superseded => {
            let by = prior.superseded_by.clone();
            obs::emit_pipeline_superseded(revision_id, by.as_deref().unwrap_or("unknown"));
            let mut result = ExecutionResult::superseded(revision_id, by);
            result.replayed = true;
            result
        }
        ApplyStatus::Pending => {
            METRICS.inc_duplicates();
            obs::emit_decision_duplicate(revision_id, prior.status.as_str());
            let mut result = ExecutionResult::new(revision_id, ExecutionStatus::InProgress);
            result.replayed = true;
            result
        }
        ApplyStatus::Applied | ApplyStatus::Failed => {
            METRICS.inc_duplicates();
            obs::emit_decision_duplicate(revision_id, prior.status.as_str());
            let mut result = serde_json::from_value::<ExecutionResult>(prior.result.clone())
                .unwrap_or_else(|e| {
                    warn!(revision_id, error = %e, "unreadable prior execution result");
                    let status = if prior.status == ApplyStatus::Applied {
                        ExecutionStatus::Applied
                    } else {
                        ExecutionStatus::Failed
                    };
                    ExecutionResult::new(revision_id, status)
                });
            result.replayed = true;
            result
        }
    }
}
