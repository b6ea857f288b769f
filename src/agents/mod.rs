//! The agent contract and shared lifecycle.
//!
//! Every agent exposes a single entry point `run(input) -> output` where
//! both sides are JSON maps, and every output carries a `status` field the
//! caller branches on. Expected failures come back as
//! `Ok({"status": "error", ...})`; unexpected failures as `Err`, which only
//! the Overseer translates into a result record. Agents never call each
//! other directly: all cross-agent traffic goes through the Overseer.

pub mod definitions;
pub mod registry;
pub mod roster;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::AgentError;
use crate::utilities::logger::{LogLevel, RuntimeLogger};
use crate::utilities::paths;
use crate::utilities::prompts::{merge_vars, render_template};

pub use definitions::{AgentCategory, AgentDefinition, AGENT_DEFINITIONS};
pub use registry::AgentRegistry;

/// Instantaneous status of an agent, owned by the Overseer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Running,
    Error,
}

/// The contract every agent implements.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent's logical name (unique across the registry).
    fn name(&self) -> &str;

    /// Execute one action. `input` is a JSON map with at least an `action`
    /// key for multi-action agents.
    async fn run(&self, input: Value) -> Result<Value, AgentError>;

    /// Per-call budget in seconds (config key `timeout_s`); the Overseer's
    /// default applies when absent.
    fn timeout_s(&self) -> Option<u64> {
        None
    }
}

/// A handle to a live agent.
pub type AgentHandle = Arc<dyn Agent>;

// ---------------------------------------------------------------------------
// Shared lifecycle
// ---------------------------------------------------------------------------

/// State and behavior shared by every concrete agent: config loading with
/// on-disk defaults, prompt templates, and the agent message channel.
pub struct AgentCore {
    pub name: String,
    pub instance_id: Uuid,
    pub config_path: PathBuf,
    pub prompt_path: PathBuf,
    config: RwLock<Map<String, Value>>,
}

impl AgentCore {
    /// Create the core, loading (or creating) the agent's config file.
    ///
    /// `config_path` defaults to `agents/<snake_name>/config.json` under the
    /// data root; the prompt template lives next to it as `prompt.txt`.
    pub fn new(name: &str, config_path: Option<String>) -> Result<Self, AgentError> {
        let config_path = config_path
            .map(PathBuf::from)
            .unwrap_or_else(|| paths::agent_dir(name).join("config.json"));
        let prompt_path = config_path
            .parent()
            .map(|dir| dir.join("prompt.txt"))
            .unwrap_or_else(|| PathBuf::from("prompt.txt"));
        let config = Self::load_or_init_config(name, &config_path)?;
        Ok(Self {
            name: name.to_string(),
            instance_id: Uuid::new_v4(),
            config_path,
            prompt_path,
            config: RwLock::new(config),
        })
    }

    fn load_or_init_config(name: &str, path: &Path) -> Result<Map<String, Value>, AgentError> {
        if !path.exists() {
            let mut default = Map::new();
            default.insert("name".to_string(), json!(name));
            create_parent_dir(path)?;
            std::fs::write(path, serde_json::to_string_pretty(&Value::Object(default.clone()))?)?;
            return Ok(default);
        }
        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => {
                // Unreadable config: run with the minimal default, do not
                // clobber the file on disk.
                let mut default = Map::new();
                default.insert("name".to_string(), json!(name));
                Ok(default)
            }
        }
    }

    /// Snapshot of the config map.
    pub fn config(&self) -> Map<String, Value> {
        self.config.read().clone()
    }

    /// Read a single config value.
    pub fn config_value(&self, key: &str) -> Option<Value> {
        self.config.read().get(key).cloned()
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.read().get(key).and_then(Value::as_bool)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.read().get(key).and_then(Value::as_u64)
    }

    /// Write-through config update: the in-memory map and the on-disk file
    /// change together.
    pub fn update_config(&self, key: &str, value: Value) -> Result<(), AgentError> {
        let snapshot = {
            let mut config = self.config.write();
            config.insert(key.to_string(), value);
            config.clone()
        };
        create_parent_dir(&self.config_path)?;
        std::fs::write(
            &self.config_path,
            serde_json::to_string_pretty(&Value::Object(snapshot))?,
        )?;
        Ok(())
    }

    /// Load the prompt template, falling back to a generic one.
    pub fn load_prompt(&self) -> String {
        std::fs::read_to_string(&self.prompt_path).unwrap_or_else(|_| {
            format!("Tu es un agent nommé {}. Réponds en JSON.", self.name)
        })
    }

    /// Merge `config ∪ context` into the prompt template. Placeholders inside
    /// fenced code blocks are left untouched.
    pub fn build_prompt(&self, context: &Map<String, Value>) -> String {
        let vars = merge_vars(&self.config.read(), context);
        render_template(&self.load_prompt(), &vars)
    }

    /// Emit an agent-tagged log record.
    pub fn speak(&self, message: &str, target: Option<&str>, level: LogLevel) {
        RuntimeLogger::global().agent_message(&self.name, message, target, level);
    }
}

fn create_parent_dir(path: &Path) -> Result<(), AgentError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Result helpers
// ---------------------------------------------------------------------------

/// `{"status": "error", "message": ...}`
pub fn error_result(message: impl Into<String>) -> Value {
    json!({"status": "error", "message": message.into()})
}

/// The `action` field of an input map, or `""`.
pub fn input_action(input: &Value) -> &str {
    input.get("action").and_then(Value::as_str).unwrap_or("")
}

/// Whether a result record reports success.
pub fn is_success(result: &Value) -> bool {
    result.get("status").and_then(Value::as_str) == Some("success")
}
