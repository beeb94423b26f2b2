//! Configuration
//!
//! Environment-backed settings for the assembled workflow. The advisory
//! oracle's timeout is short because its failure is absorbed by the
//! deterministic fallback; the executor's is generous because its failure
//! is fatal and reported.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Base URL of the downstream record API.
    pub api_base_url: String,
    /// Bearer credential for downstream calls.
    pub api_token: String,
    /// Key for sealing confirmation tokens.
    pub confirm_secret: String,
    /// Chat-completions endpoint backing the advisory oracle.
    pub oracle_url: String,
    pub oracle_api_key: Option<String>,
    pub oracle_model: String,
    pub oracle_timeout: Duration,
    /// When false, the deterministic analyzer replaces the oracle outright.
    pub oracle_enabled: bool,
    pub executor_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            api_token: String::new(),
            confirm_secret: "change-me".to_string(),
            oracle_url: "http://localhost:11434/v1".to_string(),
            oracle_api_key: None,
            oracle_model: "qwen2.5:7b".to_string(),
            oracle_timeout: Duration::from_secs(8),
            oracle_enabled: true,
            executor_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: env_or("KA_API_BASE_URL", &defaults.api_base_url),
            api_token: env_or("KA_API_TOKEN", &defaults.api_token),
            confirm_secret: env_or("KA_CONFIRM_SECRET", &defaults.confirm_secret),
            oracle_url: env_or("KA_ORACLE_URL", &defaults.oracle_url),
            oracle_api_key: std::env::var("KA_ORACLE_API_KEY").ok(),
            oracle_model: env_or("KA_ORACLE_MODEL", &defaults.oracle_model),
            oracle_timeout: Duration::from_secs(env_secs("KA_ORACLE_TIMEOUT_SECS", 8)),
            oracle_enabled: env_or("KA_ORACLE_ENABLED", "true") != "false",
            executor_timeout: Duration::from_secs(env_secs("KA_EXECUTOR_TIMEOUT_SECS", 30)),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
