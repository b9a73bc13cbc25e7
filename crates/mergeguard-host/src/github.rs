//! GitHub-compatible REST client
//!
//! Uses the issue label and comment endpoints and the pull-request merge
//! endpoint. Merges are pinned to the revision id via the `sha` field.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::HostError;
use crate::{ChangeRef, HostResult, MergeMethod, SourceControlHost};

/// GitHub host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL, e.g. `https://api.github.com`
    pub api_base: String,
    /// `owner/name`
    pub repository: String,
    /// Bearer token (optional for read-only use; required for side effects)
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        GitHubConfig {
            api_base: "https://api.github.com".to_string(),
            repository: String::new(),
            token: None,
            request_timeout_secs: 15,
        }
    }
}

impl GitHubConfig {
    /// Create config for a specific repository
    pub fn new(api_base: &str, repository: &str) -> Self {
        GitHubConfig {
            api_base: api_base.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            ..Self::default()
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

/// REST client for a GitHub-compatible host.
pub struct GitHubHost {
    config: GitHubConfig,
    http_client: reqwest::Client,
}

impl GitHubHost {
    pub fn new(config: GitHubConfig) -> HostResult<Self> {
        if config.repository.split('/').count() != 2 {
            return Err(HostError::NotConfigured(format!(
                "repository must be owner/name, got '{}'",
                config.repository
            )));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("mergeguard-host/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| HostError::NotConfigured(e.to_string()))?;

        Ok(GitHubHost {
            config,
            http_client,
        })
    }

    fn change_number(change: &ChangeRef) -> HostResult<u64> {
        change
            .change_id
            .parse::<u64>()
            .map_err(|_| HostError::InvalidChange(format!("not a PR number: {}", change.change_id)))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_base, self.config.repository, path
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> HostResult<()> {
        let token = self
            .config
            .token
            .as_deref()
            .ok_or_else(|| HostError::NotConfigured("missing API token".to_string()))?;

        let response = request
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(HostError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[async_trait]
impl SourceControlHost for GitHubHost {
    async fn add_label(&self, change: &ChangeRef, label: &str) -> HostResult<()> {
        let number = Self::change_number(change)?;
        debug!(change = %change, label, "adding label");

        let req = self
            .http_client
            .post(self.url(&format!("issues/{number}/labels")))
            .json(&json!({ "labels": [label] }));
        self.send(req).await
    }

    async fn post_comment(&self, change: &ChangeRef, body: &str) -> HostResult<()> {
        let number = Self::change_number(change)?;
        debug!(change = %change, "posting comment");

        let req = self
            .http_client
            .post(self.url(&format!("issues/{number}/comments")))
            .json(&json!({ "body": body }));
        self.send(req).await
    }

    async fn merge(&self, change: &ChangeRef, method: MergeMethod) -> HostResult<()> {
        let number = Self::change_number(change)?;
        info!(change = %change, method = %method, "merging change");

        let req = self
            .http_client
            .put(self.url(&format!("pulls/{number}/merge")))
            .json(&json!({
                "merge_method": method.as_str(),
                "sha": change.revision_id,
            }));
        self.send(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_repository() {
        let err = GitHubHost::new(GitHubConfig::new("https://api.github.com", "noslash"))
            .err()
            .unwrap();
        assert!(matches!(err, HostError::NotConfigured(_)));
    }

    #[test]
    fn builds_repo_scoped_urls() {
        let host =
            GitHubHost::new(GitHubConfig::new("https://ghe.example.com/api/v3/", "acme/widgets"))
                .unwrap();
        assert_eq!(
            host.url("pulls/7/merge"),
            "https://ghe.example.com/api/v3/repos/acme/widgets/pulls/7/merge"
        );
    }

    #[test]
    fn change_number_must_be_numeric() {
        assert_eq!(
            GitHubHost::change_number(&ChangeRef::new("17", "abc")).unwrap(),
            17
        );
        assert!(matches!(
            GitHubHost::change_number(&ChangeRef::new("feature-x", "abc")),
            Err(HostError::InvalidChange(_))
        ));
    }

    #[tokio::test]
    async fn missing_token_is_not_retryable() {
        let host = GitHubHost::new(GitHubConfig::new("http://127.0.0.1:9", "acme/widgets")).unwrap();
        let err = host
            .add_label(&ChangeRef::new("1", "abc"), "auto-merge-ready")
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::NotConfigured(_)));
        assert!(!err.is_retryable());
    }
}
