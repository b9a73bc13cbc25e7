//! Error types for mergeguard-host

use thiserror::Error;

/// Errors returned by a source-control host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Host is missing required configuration (repository, token).
    #[error("Host is not configured: {0}")]
    NotConfigured(String),

    /// Network or connection failure before a response arrived.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The call did not complete within its deadline.
    #[error("Host call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The host answered with a non-success status.
    #[error("Host returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Change reference cannot be addressed on this host.
    #[error("Invalid change reference: {0}")]
    InvalidChange(String),
}

impl HostError {
    /// Whether retrying the same call may succeed.
    ///
    /// Transport failures, timeouts, 5xx and 429 are transient. Other 4xx
    /// responses (bad credentials, merge conflicts, head moved) are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::NotConfigured(_) | Self::InvalidChange(_) => false,
        }
    }
}

impl From<reqwest::Error> for HostError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return HostError::Timeout { timeout_ms: 0 };
        }
        match err.status() {
            Some(status) => HostError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => HostError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(HostError::Transport("reset".into()).is_retryable());
        assert!(HostError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(HostError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(HostError::Status {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(!HostError::Status {
            status: 409,
            message: "head moved".into()
        }
        .is_retryable());
        assert!(!HostError::NotConfigured("token".into()).is_retryable());
    }
}
