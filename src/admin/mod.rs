//! Administrative command interpreter.
//!
//! Stricter sibling of the MetaAgent: admin text must come out as a
//! validated delegation request whose target exists in the registry's known
//! set. A message naming an unknown agent is remapped to the closest valid
//! one by keyword heuristic, keeping the original string in
//! `original_target` so the caller can ask for confirmation. Messages that
//! are not actionable at all come back as `{"intent": "unknown"}`.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::agents::{error_result, registry::AgentRegistry, Agent, AgentCore};
use crate::error::AgentError;
use crate::llm::{strip_code_fence, Complexity, LLMService};
use crate::utilities::logger::LogLevel;
use crate::utilities::prompts::{merge_vars, render_template};

/// A validated delegation, ready for the Overseer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub target_agent: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Value,
    /// The agent name the admin actually wrote, when it had to be remapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_target: Option<String>,
}

const DEFAULT_PROMPT_TEMPLATE: &str = r#"Tu es l'interprète des commandes administrateur de BerinIA.
Transforme la commande en une action structurée.

Agents valides: {valid_agents}

Commande: {message}

Réponds uniquement en JSON:
```json
{"intent": "action", "action": {"target_agent": "NomAgent", "action": "nom_action", "parameters": {}}}
```
Si la commande n'est pas exploitable, réponds `{"intent": "unknown"}`."#;

static AGENT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][A-Za-z]*(?:Agent|Supervisor))\b").unwrap());

/// Map an unknown agent name onto the closest valid one.
pub fn remap_target(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    const RULES: &[(&[&str], &str)] = &[
        (&["scrap"], "ScraperAgent"),
        (&["classif"], "NicheClassifierAgent"),
        (&["niche"], "NicheExplorerAgent"),
        (&["clean", "nettoy"], "CleanerAgent"),
        (&["scor"], "ScoringAgent"),
        (&["valid"], "ValidatorAgent"),
        (&["dupli", "doublon"], "DuplicateCheckerAgent"),
        (&["messag", "sms", "mail"], "MessagingAgent"),
        (&["relance", "follow"], "FollowUpAgent"),
        (&["listen", "ecoute"], "ResponseListenerAgent"),
        (&["repon", "répon", "reply", "respon"], "ResponseInterpreterAgent"),
        (&["pivot", "strat", "perform"], "PivotStrategyAgent"),
        (&["web", "site", "presence"], "WebPresenceCheckerAgent"),
        (
            &["lead", "database", "db", "stat", "query", "data", "campag"],
            "DatabaseQueryAgent",
        ),
        (&["test"], "TestAgent"),
    ];
    for (keywords, target) in RULES {
        if keywords.iter().any(|k| lower.contains(k)) {
            return target;
        }
    }
    // Nothing matched: hand the conversation to the front door.
    "MetaAgent"
}

/// Parses admin text into validated delegation requests.
pub struct AdminInterpreterAgent {
    core: AgentCore,
    llm: Arc<LLMService>,
}

impl AdminInterpreterAgent {
    pub fn new(config_path: Option<String>) -> Result<Self, AgentError> {
        Self::with_llm(config_path, LLMService::global())
    }

    pub fn with_llm(config_path: Option<String>, llm: Arc<LLMService>) -> Result<Self, AgentError> {
        Ok(Self {
            core: AgentCore::new("AdminInterpreterAgent", config_path)?,
            llm,
        })
    }

    /// Analyze one admin message: LLM first, keyword fallback when the LLM
    /// is unreachable, then validation of the target agent.
    pub async fn analyze(&self, message: &str) -> Value {
        let raw = match self.analyze_with_llm(message).await {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!(target: "admin", "analyse LLM indisponible ({e}), repli heuristique");
                self.analyze_by_keywords(message)
            }
        };
        self.validate(raw)
    }

    async fn analyze_with_llm(&self, message: &str) -> Result<Value, AgentError> {
        let mut context = Map::new();
        context.insert("message".to_string(), json!(message));
        context.insert(
            "valid_agents".to_string(),
            json!(AgentRegistry::global().known_names().join(", ")),
        );
        let prompt = if self.core.prompt_path.exists() {
            self.core.build_prompt(&context)
        } else {
            render_template(
                DEFAULT_PROMPT_TEMPLATE,
                &merge_vars(&self.core.config(), &context),
            )
        };
        let reply = self.llm.call(&prompt, Complexity::High).await?;
        serde_json::from_str::<Value>(strip_code_fence(&reply))
            .map_err(|e| AgentError::downstream(format!("analyse illisible: {e}")))
    }

    /// LLM-free analysis: an explicitly named agent becomes an `execute`
    /// delegation; anything else is not actionable.
    fn analyze_by_keywords(&self, message: &str) -> Value {
        match AGENT_TOKEN.find(message) {
            Some(token) => json!({
                "intent": "action",
                "action": {
                    "target_agent": token.as_str(),
                    "action": "execute",
                    "parameters": {"message": message},
                }
            }),
            None => json!({"intent": "unknown"}),
        }
    }

    /// Guarantee the delegation targets a known agent, remapping and
    /// recording `original_target` when it does not.
    fn validate(&self, mut analysis: Value) -> Value {
        let intent = analysis
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        if intent != "action" {
            return json!({"intent": "unknown"});
        }

        let Some(action) = analysis.get_mut("action").and_then(Value::as_object_mut) else {
            return json!({"intent": "unknown"});
        };
        let Some(target) = action.get("target_agent").and_then(Value::as_str) else {
            return json!({"intent": "unknown"});
        };

        let mut requires_confirmation = false;
        if !AgentRegistry::global().is_known(target) {
            let original = target.to_string();
            let remapped = remap_target(&original);
            action.insert("target_agent".to_string(), json!(remapped));
            action.insert("original_target".to_string(), json!(original.clone()));
            requires_confirmation = true;
            log::warn!(
                target: "admin",
                "agent inconnu '{original}' remappé vers '{remapped}'"
            );
        }
        if !action.contains_key("action") {
            action.insert("action".to_string(), json!("execute"));
        }
        analysis["requires_confirmation"] = json!(requires_confirmation);
        analysis["intent"] = json!("action");
        analysis
    }
}

#[async_trait]
impl Agent for AdminInterpreterAgent {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn timeout_s(&self) -> Option<u64> {
        self.core.config_u64("timeout_s")
    }

    async fn run(&self, input: Value) -> Result<Value, AgentError> {
        let message = input.get("message").and_then(Value::as_str).unwrap_or("");
        if message.is_empty() {
            return Ok(error_result("Champ 'message' manquant"));
        }
        self.core.speak(
            &format!("Interprétation de la commande: {message}"),
            Some("OverseerAgent"),
            LogLevel::Debug,
        );
        let analysis = self.analyze(message).await;
        let mut out = Map::new();
        out.insert("status".to_string(), json!("success"));
        if let Value::Object(fields) = analysis {
            for (k, v) in fields {
                out.insert(k, v);
            }
        }
        Ok(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreter(dir: &tempfile::TempDir) -> AdminInterpreterAgent {
        let config = dir
            .path()
            .join("admin_interpreter/config.json")
            .to_string_lossy()
            .into_owned();
        AdminInterpreterAgent::with_llm(Some(config), LLMService::disabled()).unwrap()
    }

    #[test]
    fn test_remap_covers_common_misnames() {
        assert_eq!(remap_target("LeadsAgent"), "DatabaseQueryAgent");
        assert_eq!(remap_target("ScrapingAgent"), "ScraperAgent");
        assert_eq!(remap_target("CampaignAgent"), "DatabaseQueryAgent");
        assert_eq!(remap_target("EmailAgent"), "MessagingAgent");
        assert_eq!(remap_target("SomethingElse"), "MetaAgent");
    }

    #[test]
    fn test_validate_keeps_known_targets() {
        let dir = tempfile::tempdir().unwrap();
        let admin = interpreter(&dir);
        let out = admin.validate(json!({
            "intent": "action",
            "action": {"target_agent": "ScraperAgent", "action": "scrape", "parameters": {}}
        }));
        assert_eq!(out["action"]["target_agent"], "ScraperAgent");
        assert_eq!(out["requires_confirmation"], false);
        assert!(out["action"].get("original_target").is_none());
    }

    #[test]
    fn test_validate_remaps_unknown_target() {
        let dir = tempfile::tempdir().unwrap();
        let admin = interpreter(&dir);
        let out = admin.validate(json!({
            "intent": "action",
            "action": {"target_agent": "LeadsAgent", "action": "count", "parameters": {}}
        }));
        assert_eq!(out["action"]["target_agent"], "DatabaseQueryAgent");
        assert_eq!(out["action"]["original_target"], "LeadsAgent");
        assert_eq!(out["requires_confirmation"], true);
    }

    #[tokio::test]
    async fn test_unknown_agent_remap_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let admin = interpreter(&dir);

        let out = admin
            .run(json!({
                "message": "Ask the LeadsAgent how many leads are active"
            }))
            .await
            .unwrap();
        assert_eq!(out["status"], "success");
        assert_eq!(out["intent"], "action");
        assert_eq!(out["action"]["original_target"], "LeadsAgent");
        let target = out["action"]["target_agent"].as_str().unwrap();
        assert!(AgentRegistry::global().is_known(target));
    }

    #[tokio::test]
    async fn test_non_actionable_message_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let admin = interpreter(&dir);
        let out = admin
            .run(json!({"message": "Quelle est la capitale de la France ?"}))
            .await
            .unwrap();
        assert_eq!(out["intent"], "unknown");
    }

    #[test]
    fn test_validated_delegation_deserializes() {
        let dir = tempfile::tempdir().unwrap();
        let admin = interpreter(&dir);
        let out = admin.validate(json!({
            "intent": "action",
            "action": {"target_agent": "LeadsAgent", "parameters": {"n": 5}}
        }));
        let request: DelegationRequest =
            serde_json::from_value(out["action"].clone()).unwrap();
        assert_eq!(request.target_agent, "DatabaseQueryAgent");
        assert_eq!(request.action, "execute");
        assert_eq!(request.original_target.as_deref(), Some("LeadsAgent"));
    }
}
