//! System-wide configuration.
//!
//! A single `config.json` at the data root configures the scheduler, the
//! webhook listener and the default invocation timeout. Every field has a
//! default so a missing file yields a working development setup; host and
//! port can additionally be overridden from the environment
//! (`BERINIA_WEBHOOK_HOST` / `BERINIA_WEBHOOK_PORT`).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Scheduler section of the system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Path to the durable task file, relative to the data root.
    #[serde(default = "default_tasks_file")]
    pub tasks_file: String,
    /// Worker tick, in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
}

fn default_tasks_file() -> String {
    "data/scheduled_tasks.json".to_string()
}

fn default_check_interval() -> u64 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tasks_file: default_tasks_file(),
            check_interval_seconds: default_check_interval(),
        }
    }
}

/// Webhook section of the system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Scheme used when reconstructing the request URL for signature checks.
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_scheme() -> String {
    "https".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            scheme: default_scheme(),
        }
    }
}

/// A recurring task seeded at bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTaskSpec {
    pub task_id: String,
    pub target_agent: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Seconds between runs.
    pub interval_s: u64,
    /// Seconds from bootstrap to the first run.
    #[serde(default)]
    pub initial_delay_s: u64,
}

/// Top-level system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Default per-call budget for agent invocations, in seconds.
    #[serde(default = "default_timeout")]
    pub default_timeout_s: u64,
    /// Tasks seeded into the scheduler at bootstrap.
    #[serde(default)]
    pub recurring_tasks: Vec<RecurringTaskSpec>,
}

fn default_timeout() -> u64 {
    60
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            webhook: WebhookConfig::default(),
            default_timeout_s: default_timeout(),
            recurring_tasks: Vec::new(),
        }
    }
}

impl SystemConfig {
    /// Load the configuration from `path`, falling back to defaults when the
    /// file does not exist. A present-but-malformed file is a configuration
    /// error (fatal at bootstrap).
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            return Ok(Self::with_env_overrides(Self::default()));
        }
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            AgentError::config(format!("malformed config file {}: {e}", path.display()))
        })?;
        Ok(Self::with_env_overrides(config))
    }

    fn with_env_overrides(mut config: Self) -> Self {
        if let Ok(host) = std::env::var("BERINIA_WEBHOOK_HOST") {
            config.webhook.host = host;
        }
        if let Ok(port) = std::env::var("BERINIA_WEBHOOK_PORT") {
            if let Ok(port) = port.parse() {
                config.webhook.port = port;
            }
        }
        config
    }
}
