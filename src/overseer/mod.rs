//! Central dispatcher.
//!
//! The Overseer is the only component that invokes agents by name. Every
//! other component (webhook handlers, the scheduler worker, front-door
//! agents, supervisors) hands it a target and an input and gets back a
//! result record. It resolves targets through the registry, runs them under
//! a per-agent timeout, translates raised errors into
//! `{"status": "error", ...}` records, and tracks each agent's status.
//!
//! It never raises and it never guesses: an unknown target is an error
//! record, not a fuzzy match.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::agents::definitions::{self, AgentCategory};
use crate::agents::{error_result, AgentRegistry, AgentStatus};
use crate::scheduler::TaskExecutor;
use crate::utilities::logger::{LogLevel, RuntimeLogger};

static GLOBAL: Lazy<std::sync::Arc<Overseer>> =
    Lazy::new(|| std::sync::Arc::new(Overseer::new(60)));

/// The dispatcher. One per process in production; tests build their own.
pub struct Overseer {
    statuses: DashMap<String, AgentStatus>,
    default_timeout_s: AtomicU64,
}

impl Overseer {
    pub fn new(default_timeout_s: u64) -> Self {
        Self {
            statuses: DashMap::new(),
            default_timeout_s: AtomicU64::new(default_timeout_s),
        }
    }

    /// The process-wide dispatcher.
    pub fn global() -> std::sync::Arc<Overseer> {
        GLOBAL.clone()
    }

    /// Default per-call budget; per-agent `timeout_s` config wins.
    pub fn set_default_timeout(&self, seconds: u64) {
        self.default_timeout_s.store(seconds.max(1), Ordering::SeqCst);
    }

    /// Resolve `target` and run it with `input` under a timeout.
    pub async fn execute(&self, target: &str, input: Value) -> Value {
        let registry = AgentRegistry::global();
        if !registry.is_known(target) {
            log::warn!(target: "overseer", "agent inconnu demandé: {target}");
            return error_result(format!("Agent inconnu: {target}"));
        }

        let agent = match registry.get_or_create(target, None) {
            Ok(agent) => agent,
            Err(e) => {
                log::error!(target: "overseer", "résolution de {target} échouée: {e}");
                return error_result(format!("Impossible de charger l'agent {target}: {e}"));
            }
        };

        RuntimeLogger::global().agent_message(
            "OverseerAgent",
            &format!("dispatching to {target}"),
            Some(target),
            LogLevel::Info,
        );
        self.statuses.insert(target.to_string(), AgentStatus::Running);

        let budget_s = agent
            .timeout_s()
            .unwrap_or_else(|| self.default_timeout_s.load(Ordering::SeqCst))
            .max(1);

        let result = match tokio::time::timeout(Duration::from_secs(budget_s), agent.run(input))
            .await
        {
            Ok(Ok(result)) => {
                self.statuses.insert(target.to_string(), AgentStatus::Idle);
                result
            }
            Ok(Err(e)) => {
                self.statuses.insert(target.to_string(), AgentStatus::Error);
                log::error!(target: "overseer", "{target} a levé une erreur: {e}");
                json!({
                    "status": "error",
                    "agent": target,
                    "message": e.to_string(),
                    "trace": format!("{e:?}"),
                })
            }
            // The in-flight call is abandoned, not interrupted.
            Err(_elapsed) => {
                self.statuses.insert(target.to_string(), AgentStatus::Error);
                log::error!(target: "overseer", "{target} a dépassé son budget de {budget_s}s");
                json!({
                    "status": "error",
                    "agent": target,
                    "message": "timeout",
                })
            }
        };

        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        RuntimeLogger::global().agent_message(
            "OverseerAgent",
            &format!("{target} returned status={status}"),
            Some(target),
            LogLevel::Info,
        );
        result
    }

    /// Hand a task to a supervisor-category agent, which orchestrates its
    /// own stage through this same dispatcher.
    pub async fn delegate(&self, supervisor: &str, task: Value) -> Value {
        if let Some(def) = definitions::definition(supervisor) {
            if def.category != AgentCategory::Supervisor {
                return error_result(format!(
                    "{supervisor} n'est pas un superviseur ({})",
                    def.category
                ));
            }
        }
        self.execute(supervisor, task).await
    }

    /// Snapshot of agent statuses.
    pub fn system_state(&self) -> Value {
        let mut agents = Map::new();
        for name in AgentRegistry::global().live_names() {
            let status = self
                .statuses
                .get(&name)
                .map(|s| *s.value())
                .unwrap_or(AgentStatus::Idle);
            agents.insert(name, serde_json::to_value(status).unwrap_or(Value::Null));
        }
        json!({
            "status": "success",
            "agents": agents,
            "known": AgentRegistry::global().known_names(),
        })
    }

    /// Status of one agent, if it has been dispatched to.
    pub fn agent_status(&self, name: &str) -> Option<AgentStatus> {
        self.statuses.get(name).map(|s| *s.value())
    }
}

/// Scheduler integration: a due task is an `execute` request whose
/// parameters are merged at the top level of the agent input.
#[async_trait]
impl TaskExecutor for Overseer {
    async fn execute_task(&self, target_agent: &str, action: &str, parameters: Value) -> Value {
        let mut input = Map::new();
        match parameters {
            Value::Object(fields) => {
                for (k, v) in fields {
                    input.insert(k, v);
                }
            }
            Value::Null => {}
            other => {
                input.insert("parameters".to_string(), other);
            }
        }
        input.insert("action".to_string(), json!(action));
        self.execute(target_agent, Value::Object(input)).await
    }
}
