//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration:
//!
//! ```toml
//! [learner]
//! min_records = 10
//! retrain_interval_secs = 300
//!
//! [executor]
//! max_attempts = 4
//! ready_label = "auto-merge-ready"
//!
//! [storage]
//! url = "surrealkv://.mergeguard/db"
//!
//! [host]
//! repository = "acme/widgets"
//! ```

use std::path::Path;
use std::time::Duration;

use mergeguard_host::{GitHubConfig, GitHubHost};
use mergeguard_state::StoreConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{EngineError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub learner: LearnerSettings,
    pub executor: ExecutorSettings,
    pub agent: AgentSettings,
    pub storage: StorageSettings,
    pub host: HostSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerSettings {
    /// Outcomes required before a trained model replaces the neutral one.
    pub min_records: usize,
    pub retrain_interval_secs: u64,
    pub train_timeout_secs: u64,
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for LearnerSettings {
    fn default() -> Self {
        Self {
            min_records: 10,
            retrain_interval_secs: 300,
            train_timeout_secs: 30,
            epochs: 500,
            learning_rate: 0.1,
        }
    }
}

impl LearnerSettings {
    pub fn retrain_interval(&self) -> Duration {
        Duration::from_secs(self.retrain_interval_secs)
    }

    pub fn train_timeout(&self) -> Duration {
        Duration::from_secs(self.train_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Attempts per host call, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_secs: u64,
    /// Label applied when a decision acts.
    pub ready_label: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            call_timeout_secs: 15,
            ready_label: "auto-merge-ready".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Extra execution rounds allowed after a failed verification.
    pub max_retries: u32,
    pub step_timeout_secs: u64,
    /// Scan step fails above this predicted probability of issue.
    pub max_issue_probability: f64,
    /// Tasks whose step outputs stay cached; the oldest task is evicted first.
    pub cached_tasks: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_retries: 1,
            step_timeout_secs: 120,
            max_issue_probability: 0.8,
            cached_tasks: 256,
        }
    }
}

impl AgentSettings {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            url: store.url,
            namespace: store.namespace,
            database: store.database,
        }
    }
}

impl StorageSettings {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.url.clone(),
            namespace: self.namespace.clone(),
            database: self.database.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub api_base: String,
    /// `owner/name`; empty means no host is configured.
    pub repository: String,
    /// Environment variable holding the API token.
    pub token_env: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            repository: String::new(),
            token_env: "MERGEGUARD_TOKEN".to_string(),
        }
    }
}

impl HostSettings {
    pub fn is_configured(&self) -> bool {
        !self.repository.trim().is_empty()
    }

    /// Build the GitHub client, reading the token from `token_env`.
    pub fn github_host(&self, call_timeout: Duration) -> Result<GitHubHost> {
        let mut config = GitHubConfig::new(&self.api_base, &self.repository);
        config.request_timeout_secs = call_timeout.as_secs().max(1);
        if let Ok(token) = std::env::var(&self.token_env) {
            config = config.with_token(token.trim());
        } else {
            debug!(token_env = %self.token_env, "no host token in environment");
        }
        Ok(GitHubHost::new(config)?)
    }
}

impl EngineConfig {
    /// Parse TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`; a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(EngineError::Config(msg.to_string()));
        if self.learner.min_records == 0 {
            return fail("learner.min_records must be at least 1");
        }
        if self.learner.epochs == 0 {
            return fail("learner.epochs must be at least 1");
        }
        if !(self.learner.learning_rate.is_finite() && self.learner.learning_rate > 0.0) {
            return fail("learner.learning_rate must be positive");
        }
        if self.learner.train_timeout_secs == 0 {
            return fail("learner.train_timeout_secs must be at least 1");
        }
        if self.executor.max_attempts == 0 {
            return fail("executor.max_attempts must be at least 1");
        }
        if self.executor.max_backoff_ms < self.executor.initial_backoff_ms {
            return fail("executor.max_backoff_ms must be >= initial_backoff_ms");
        }
        if self.executor.call_timeout_secs == 0 {
            return fail("executor.call_timeout_secs must be at least 1");
        }
        if self.executor.ready_label.trim().is_empty() {
            return fail("executor.ready_label must not be empty");
        }
        if self.agent.step_timeout_secs == 0 {
            return fail("agent.step_timeout_secs must be at least 1");
        }
        if self.agent.cached_tasks == 0 {
            return fail("agent.cached_tasks must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.agent.max_issue_probability) {
            return fail("agent.max_issue_probability must be within 0..=1");
        }
        if self.storage.url.trim().is_empty() {
            return fail("storage.url must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.learner.min_records, 10);
        assert_eq!(config.learner.retrain_interval(), Duration::from_secs(300));
        assert_eq!(config.executor.ready_label, "auto-merge-ready");
        assert_eq!(config.storage.url, "surrealkv://.mergeguard/db");
        assert_eq!(config.host.token_env, "MERGEGUARD_TOKEN");
        assert!(!config.host.is_configured());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [executor]
            max_attempts = 2

            [storage]
            url = "mem://"
            "#,
        )
        .unwrap();
        assert_eq!(config.executor.max_attempts, 2);
        assert_eq!(config.executor.initial_backoff_ms, 200);
        assert_eq!(config.storage.url, "mem://");
        assert_eq!(config.storage.namespace, "mergeguard");
        assert_eq!(config.agent.max_retries, 1);
    }

    #[test]
    fn rejects_inverted_backoff() {
        let err = EngineConfig::from_toml_str(
            "[executor]\ninitial_backoff_ms = 1000\nmax_backoff_ms = 10\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_backoff_ms"));
    }

    #[test]
    fn rejects_zero_min_records() {
        assert!(EngineConfig::from_toml_str("[learner]\nmin_records = 0\n").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn loads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mergeguard.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[host]\nrepository = \"acme/widgets\"").unwrap();

        let config = EngineConfig::load_or_default(&path).unwrap();
        assert!(config.host.is_configured());
        assert_eq!(config.host.api_base, "https://api.github.com");
    }

    #[test]
    fn malformed_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[learner\n").unwrap();
        let err = EngineConfig::load_or_default(&path).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
