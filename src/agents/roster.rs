//! Concrete agents registered in the definition table.
//!
//! The pipeline leaves (scraping, qualification, prospection, analytics)
//! keep the runtime contract only; their business heuristics live outside
//! the core. Supervisors orchestrate their stage agents through the
//! Overseer; nothing here calls another agent directly.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{error_result, input_action, Agent, AgentCore};
use crate::error::AgentError;
use crate::llm::{Complexity, LLMService};
use crate::overseer::Overseer;
use crate::utilities::logger::LogLevel;

// ---------------------------------------------------------------------------
// TestAgent
// ---------------------------------------------------------------------------

/// Development agent: echoes, sleeps, or fails on demand.
pub struct TestAgent {
    core: AgentCore,
}

impl TestAgent {
    pub fn new(config_path: Option<String>) -> Result<Self, AgentError> {
        Ok(Self {
            core: AgentCore::new("TestAgent", config_path)?,
        })
    }
}

#[async_trait]
impl Agent for TestAgent {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn timeout_s(&self) -> Option<u64> {
        self.core.config_u64("timeout_s")
    }

    async fn run(&self, input: Value) -> Result<Value, AgentError> {
        match input_action(&input) {
            "noop" => Ok(json!({"status": "success"})),
            "echo" => {
                let mut out = Map::new();
                out.insert("status".to_string(), json!("success"));
                if let Value::Object(fields) = &input {
                    for (k, v) in fields {
                        if k != "action" && k != "status" {
                            out.insert(k.clone(), v.clone());
                        }
                    }
                }
                Ok(Value::Object(out))
            }
            "sleep" => {
                let seconds = input.get("seconds").and_then(Value::as_f64).unwrap_or(1.0);
                tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
                Ok(json!({"status": "success", "slept_s": seconds}))
            }
            "fail" => Err(AgentError::Invocation {
                agent: self.core.name.clone(),
                message: "échec demandé".to_string(),
            }),
            other => Ok(error_result(format!("Action non reconnue: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline leaves
// ---------------------------------------------------------------------------

/// Contract-level stand-in for a pipeline stage. Accepts any action,
/// acknowledges it, and reports which stage ran; the stage's real heuristics
/// are plugged in behind this same contract.
pub struct PipelineAgent {
    core: AgentCore,
}

impl PipelineAgent {
    pub fn new(name: &str, config_path: Option<String>) -> Result<Self, AgentError> {
        Ok(Self {
            core: AgentCore::new(name, config_path)?,
        })
    }
}

#[async_trait]
impl Agent for PipelineAgent {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn timeout_s(&self) -> Option<u64> {
        self.core.config_u64("timeout_s")
    }

    async fn run(&self, input: Value) -> Result<Value, AgentError> {
        let action = input_action(&input);
        if action.is_empty() {
            return Ok(error_result("Champ 'action' manquant"));
        }
        self.core.speak(
            &format!("Exécution de l'action {action}"),
            Some("OverseerAgent"),
            LogLevel::Debug,
        );
        Ok(json!({
            "status": "success",
            "agent": self.core.name,
            "action": action,
            "parameters": input.get("parameters").cloned().unwrap_or(Value::Null),
        }))
    }
}

// ---------------------------------------------------------------------------
// Supervisors
// ---------------------------------------------------------------------------

/// Orchestrates one pipeline stage: runs its agents in order through the
/// Overseer, feeding each result into the next call's `previous` field.
pub struct SupervisorAgent {
    core: AgentCore,
    stages: &'static [&'static str],
}

impl SupervisorAgent {
    pub fn new(
        name: &str,
        stages: &'static [&'static str],
        config_path: Option<String>,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            core: AgentCore::new(name, config_path)?,
            stages,
        })
    }
}

#[async_trait]
impl Agent for SupervisorAgent {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn timeout_s(&self) -> Option<u64> {
        self.core.config_u64("timeout_s")
    }

    async fn run(&self, input: Value) -> Result<Value, AgentError> {
        let action = input_action(&input);
        match action {
            "run_pipeline" | "execute" | "" => {
                let parameters = input.get("parameters").cloned().unwrap_or(json!({}));
                let mut previous = Value::Null;
                let mut results = Vec::with_capacity(self.stages.len());

                for stage in self.stages {
                    self.core.speak(
                        &format!("Délégation à {stage}"),
                        Some(stage),
                        LogLevel::Info,
                    );
                    let result = Overseer::global()
                        .execute(
                            stage,
                            json!({
                                "action": "process",
                                "parameters": parameters,
                                "previous": previous,
                            }),
                        )
                        .await;
                    let ok = super::is_success(&result);
                    results.push(json!({"agent": stage, "result": result}));
                    if !ok {
                        return Ok(json!({
                            "status": "error",
                            "message": format!("Étape {stage} en échec"),
                            "results": results,
                        }));
                    }
                    previous = results.last().cloned().unwrap_or(Value::Null);
                }

                Ok(json!({"status": "success", "results": results}))
            }
            other => Ok(error_result(format!("Action non reconnue: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseInterpreterAgent
// ---------------------------------------------------------------------------

/// Classifies a normalized inbound reply. Uses the LLM at low complexity
/// when configured, with a keyword heuristic as the degraded path.
pub struct ResponseInterpreterAgent {
    core: AgentCore,
}

impl ResponseInterpreterAgent {
    pub fn new(config_path: Option<String>) -> Result<Self, AgentError> {
        Ok(Self {
            core: AgentCore::new("ResponseInterpreterAgent", config_path)?,
        })
    }

    /// Keyword fallback classification.
    fn classify_by_keywords(content: &str) -> (&'static str, f64) {
        let lower = content.to_lowercase();
        const NEGATIVE: &[&str] = &["stop", "désabonner", "unsubscribe", "plus jamais"];
        const INTERESTED: &[&str] = &["intéressé", "interested", "oui", "yes", "rendez-vous", "rdv"];
        const REFUSAL: &[&str] = &["non merci", "pas intéressé", "not interested", "no thanks"];

        if NEGATIVE.iter().any(|k| lower.contains(k)) {
            ("unsubscribe", 0.9)
        } else if REFUSAL.iter().any(|k| lower.contains(k)) {
            ("not_interested", 0.7)
        } else if INTERESTED.iter().any(|k| lower.contains(k)) {
            ("interested", 0.7)
        } else if lower.contains('?') {
            ("question", 0.6)
        } else {
            ("neutral", 0.4)
        }
    }

    async fn interpret(&self, data: &Value) -> Value {
        let content = data.get("content").and_then(Value::as_str).unwrap_or("");
        if content.is_empty() {
            return error_result("Champ 'content' manquant");
        }

        let (mut intent, mut confidence) = Self::classify_by_keywords(content);

        if self.core.config_bool("use_llm_for_interpretation").unwrap_or(false) {
            let mut context = Map::new();
            context.insert("content".to_string(), json!(content));
            let prompt = self.core.build_prompt(&context);
            if let Ok(reply) = LLMService::global().call(&prompt, Complexity::Low).await {
                if let Ok(parsed) = serde_json::from_str::<Value>(&reply) {
                    if let Some(llm_intent) = parsed.get("intent").and_then(Value::as_str) {
                        intent = match llm_intent {
                            "interested" => "interested",
                            "not_interested" => "not_interested",
                            "unsubscribe" => "unsubscribe",
                            "question" => "question",
                            _ => "neutral",
                        };
                        confidence = parsed
                            .get("confidence")
                            .and_then(Value::as_f64)
                            .unwrap_or(confidence);
                    }
                }
            }
        }

        self.core.speak(
            &format!("Réponse interprétée comme '{intent}'"),
            Some("OverseerAgent"),
            LogLevel::Info,
        );

        json!({
            "status": "success",
            "interpretation": {"intent": intent, "confidence": confidence},
            "campaign_id": data.get("campaign_id").cloned().unwrap_or(Value::Null),
            "event": data,
        })
    }
}

#[async_trait]
impl Agent for ResponseInterpreterAgent {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn timeout_s(&self) -> Option<u64> {
        self.core.config_u64("timeout_s")
    }

    async fn run(&self, input: Value) -> Result<Value, AgentError> {
        match input_action(&input) {
            "interpret_response" => {
                let data = input.get("data").cloned().unwrap_or(json!({}));
                Ok(self.interpret(&data).await)
            }
            other => Ok(error_result(format!("Action non reconnue: {other}"))),
        }
    }
}
