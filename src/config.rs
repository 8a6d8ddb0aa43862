//! Configuration Management
//!
//! Optional settings file for gcp-quota. Command line flags override it, and
//! it overrides the gcloud defaults.

use crate::gcp::client::DEFAULT_RETRY_ATTEMPTS;
use crate::runner::DEFAULT_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project to audit
    pub project_id: Option<String>,
    /// Region for region and instance scoped checks
    pub region: Option<String>,
    pub warning_threshold: f64,
    pub error_threshold: f64,
    /// Exit non-zero on warnings as well as errors
    pub fail_on_warning: bool,
    /// Checks evaluated concurrently
    pub concurrency: usize,
    /// Attempts per throttled request
    pub retry_attempts: usize,
    /// Base URL replacing every Google API host, for emulators and proxies
    pub endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: None,
            region: None,
            warning_threshold: 0.8,
            error_threshold: 0.9,
            fail_on_warning: false,
            concurrency: DEFAULT_CONCURRENCY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            endpoint: None,
        }
    }
}

impl Config {
    /// Directory holding the config and log files
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcp-quota"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", path, e);
                Self::default()
            },
        }
    }

    /// Parse a config document; an invalid document yields the defaults
    pub fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid config file: {}", e);
            Self::default()
        })
    }

    /// Get effective project (CLI > config > gcloud default)
    pub fn effective_project(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| self.project_id.clone())
            .or_else(crate::gcp::auth::get_default_project)
            .filter(|p| !p.is_empty())
    }

    /// Get effective region (CLI > config > gcloud default)
    pub fn effective_region(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.region.clone())
            .or_else(crate::gcp::auth::get_default_region)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "us-central1".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = Config::parse(r#"{ "project_id": "my-project", "warning_threshold": 0.7 }"#);
        assert_eq!(config.project_id.as_deref(), Some("my-project"));
        assert_eq!(config.warning_threshold, 0.7);
        assert_eq!(config.error_threshold, 0.9);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_invalid_document_is_default() {
        assert_eq!(Config::parse("{ not json"), Config::default());
    }

    #[test]
    fn test_cli_wins_over_config() {
        let config = Config {
            project_id: Some("from-config".to_string()),
            region: Some("europe-west1".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.effective_project(Some("from-cli")).as_deref(),
            Some("from-cli")
        );
        assert_eq!(
            config.effective_project(None).as_deref(),
            Some("from-config")
        );
        assert_eq!(config.effective_region(Some("us-east1")), "us-east1");
        assert_eq!(config.effective_region(None), "europe-west1");
    }
}
