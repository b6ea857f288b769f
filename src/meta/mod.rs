//! Conversational front door.
//!
//! The MetaAgent turns free-form user text into structured actions, routes
//! them through the Overseer, and rewrites raw agent results into human
//! prose. Analysis prompts are enriched with chunks retrieved from the
//! knowledge store. When the LLM is unreachable the agent degrades to
//! canned, friendly sentences; it never surfaces a raw failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::agents::{error_result, input_action, registry::AgentRegistry, Agent, AgentCore};
use crate::error::AgentError;
use crate::knowledge::{self, format_knowledge_for_prompt, KnowledgeStore};
use crate::llm::{strip_code_fence, Complexity, LLMService};
use crate::overseer::Overseer;
use crate::utilities::logger::LogLevel;
use crate::utilities::prompts::{merge_vars, render_template};

/// Analysis template used when no prompt file is installed for the agent.
const DEFAULT_ANALYSIS_TEMPLATE: &str = r#"Tu es MetaAgent, l'intelligence conversationnelle du système BerinIA.
Tu reçois un message d'un utilisateur et tu décides quelles actions déléguer.

Agents disponibles: {valid_agents}

{knowledge}

Message de l'utilisateur: {message}

Réponds uniquement en JSON, au format suivant:
```json
{"actions": [{"agent": "NomAgent", "action": "nom_action", "parameters": {}}], "rationale": "explication courte"}
```
Si aucune action n'est nécessaire, renvoie une liste d'actions vide et un
champ "response" contenant ta réponse directe."#;

/// Canned degraded reply when the LLM is unavailable.
const DEGRADED_REPLY: &str = "Je suis désolé, je ne peux pas traiter cette demande pour le \
moment. Le service d'intelligence est momentanément indisponible, veuillez réessayer.";

/// Conversational adapter between free text and the Overseer.
pub struct MetaAgent {
    core: AgentCore,
    llm: Arc<LLMService>,
    knowledge: Arc<dyn KnowledgeStore>,
}

impl MetaAgent {
    pub fn new(config_path: Option<String>) -> Result<Self, AgentError> {
        Self::with_services(config_path, LLMService::global(), knowledge::global_store())
    }

    /// Construct with explicit services (tests and bootstrap overrides).
    pub fn with_services(
        config_path: Option<String>,
        llm: Arc<LLMService>,
        knowledge: Arc<dyn KnowledgeStore>,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            core: AgentCore::new("MetaAgent", config_path)?,
            llm,
            knowledge,
        })
    }

    /// Build the analysis prompt: template + valid agent names + retrieved
    /// knowledge + the user message.
    async fn analysis_prompt(&self, message: &str) -> String {
        let hits = self
            .knowledge
            .search("knowledge", message, 3)
            .await
            .unwrap_or_default();
        let knowledge_section = format_knowledge_for_prompt(&hits);

        let mut context = Map::new();
        context.insert("message".to_string(), json!(message));
        context.insert(
            "valid_agents".to_string(),
            json!(AgentRegistry::global().known_names().join(", ")),
        );
        context.insert("knowledge".to_string(), json!(knowledge_section));

        if self.core.prompt_path.exists() {
            self.core.build_prompt(&context)
        } else {
            render_template(
                DEFAULT_ANALYSIS_TEMPLATE,
                &merge_vars(&self.core.config(), &context),
            )
        }
    }

    /// Map free text to `{actions, rationale}` using the medium tier.
    pub async fn analyze(&self, message: &str) -> Result<Value, AgentError> {
        let prompt = self.analysis_prompt(message).await;
        let reply = self.llm.call(&prompt, Complexity::Medium).await?;
        let parsed = serde_json::from_str::<Value>(strip_code_fence(&reply))
            .unwrap_or_else(|_| json!({"actions": [], "response": reply, "rationale": ""}));
        Ok(parsed)
    }

    async fn handle_message(&self, input: &Value) -> Value {
        let message = input.get("message").and_then(Value::as_str).unwrap_or("");
        if message.is_empty() {
            return error_result("Champ 'message' manquant");
        }
        self.core.speak(
            &format!("Analyse du message: {message}"),
            None,
            LogLevel::Debug,
        );

        let analysis = match self.analyze(message).await {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!(target: "meta", "LLM indisponible, réponse dégradée: {e}");
                return json!({"status": "success", "response": DEGRADED_REPLY, "degraded": true});
            }
        };

        let actions = analysis
            .get("actions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if actions.is_empty() {
            let direct = analysis
                .get("response")
                .and_then(Value::as_str)
                .unwrap_or(DEGRADED_REPLY);
            return json!({"status": "success", "response": direct});
        }

        let mut last_result = Value::Null;
        let mut agent_used = String::new();
        for action in &actions {
            let Some(agent) = action.get("agent").and_then(Value::as_str) else {
                continue;
            };
            let name = action.get("action").and_then(Value::as_str).unwrap_or("execute");
            let mut call = Map::new();
            if let Some(Value::Object(params)) = action.get("parameters") {
                for (k, v) in params {
                    call.insert(k.clone(), v.clone());
                }
            }
            call.insert("action".to_string(), json!(name));
            agent_used = agent.to_string();
            last_result = Overseer::global().execute(agent, Value::Object(call)).await;
        }

        // Shape the raw result through the format_response path.
        let formatted = Box::pin(self.run(json!({
            "action": "format_response",
            "original_message": message,
            "raw_response": last_result,
            "agent_used": agent_used,
        })))
        .await;
        match formatted {
            Ok(formatted) => formatted,
            Err(_) => json!({"status": "success", "response": summarize_raw(&last_result)}),
        }
    }

    async fn format_response(&self, input: &Value) -> Value {
        let original = input
            .get("original_message")
            .and_then(Value::as_str)
            .unwrap_or("");
        let raw = input.get("raw_response").cloned().unwrap_or(Value::Null);
        let agent_used = input.get("agent_used").and_then(Value::as_str).unwrap_or("");
        let raw_text = summarize_raw(&raw);

        let prompt = format!(
            "Tu es l'assistant conversationnel de BerinIA. L'utilisateur a demandé:\n\
             \"{original}\"\n\nL'agent {agent_used} a répondu:\n{raw_text}\n\n\
             Reformule cette réponse en une ou deux phrases naturelles en français."
        );

        match self.llm.call(&prompt, Complexity::Low).await {
            Ok(formatted) => json!({"status": "success", "response": formatted.trim()}),
            Err(_) => json!({"status": "success", "response": raw_text}),
        }
    }

    fn handle_error(&self, input: &Value) -> Value {
        let error_message = input
            .get("error_message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();

        let response = if error_message.contains("no such table")
            || error_message.contains("relation")
            || error_message.contains("not found")
        {
            "Je ne trouve pas cette information dans ma base de données. Cette \
             fonctionnalité n'est peut-être pas encore disponible."
        } else if error_message.contains("permission") || error_message.contains("access") {
            "Je n'ai pas l'autorisation d'accéder à cette information. Veuillez \
             contacter un administrateur."
        } else if error_message.contains("timeout") {
            "La demande a pris trop de temps. Veuillez réessayer ou simplifier \
             votre question."
        } else {
            "Je suis désolé, je n'ai pas pu traiter cette demande. Pourriez-vous \
             reformuler votre question ?"
        };
        json!({"status": "success", "response": response})
    }
}

/// Pull a human-usable string out of a raw agent result.
fn summarize_raw(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            for key in ["response", "message", "result"] {
                if let Some(Value::String(s)) = map.get(key) {
                    return s.clone();
                }
            }
            if let Some(err) = map.get("error").or_else(|| {
                (map.get("status").and_then(Value::as_str) == Some("error"))
                    .then(|| map.get("message"))
                    .flatten()
            }) {
                return format!("Erreur: {}", text_of(err));
            }
            serde_json::to_string(raw).unwrap_or_default()
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Agent for MetaAgent {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn timeout_s(&self) -> Option<u64> {
        self.core.config_u64("timeout_s")
    }

    async fn run(&self, input: Value) -> Result<Value, AgentError> {
        match input_action(&input) {
            "format_response" => Ok(self.format_response(&input).await),
            "handle_error" => Ok(self.handle_error(&input)),
            "" | "analyze" | "handle_message" => Ok(self.handle_message(&input).await),
            other => Ok(error_result(format!("Action non reconnue: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::offline::OfflineKnowledgeStore;

    fn meta_with_corpus(dir: &tempfile::TempDir) -> MetaAgent {
        let corpus = dir.path().join("knowledge");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(
            corpus.join("scheduler.md"),
            "# Architecture du scheduler\n\nLe scheduler est une file de priorité \
             persistante qui déclenche les agents à l'instant planifié.\n",
        )
        .unwrap();
        let store = Arc::new(OfflineKnowledgeStore::new(corpus));
        let config = dir
            .path()
            .join("meta/config.json")
            .to_string_lossy()
            .into_owned();
        MetaAgent::with_services(Some(config), LLMService::disabled(), store).unwrap()
    }

    #[tokio::test]
    async fn test_analysis_prompt_is_knowledge_enriched() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta_with_corpus(&dir);

        let prompt = meta.analysis_prompt("explique le scheduler").await;
        assert!(prompt.contains("INFORMATIONS CONTEXTUELLES PERTINENTES"));
        assert!(prompt.contains("file de priorité"));
        assert!(prompt.contains("explique le scheduler"));
    }

    #[tokio::test]
    async fn test_degraded_reply_when_llm_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta_with_corpus(&dir);

        let out = meta
            .run(json!({"message": "explique le scheduler"}))
            .await
            .unwrap();
        assert_eq!(out["status"], "success");
        assert_eq!(out["degraded"], true);
        assert!(out["response"].as_str().unwrap().contains("désolé"));
    }

    #[tokio::test]
    async fn test_missing_message_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta_with_corpus(&dir);
        let out = meta.run(json!({})).await.unwrap();
        assert_eq!(out["status"], "error");
    }

    #[tokio::test]
    async fn test_handle_error_categories() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta_with_corpus(&dir);

        let cases = [
            ("no such table leads", "base de données"),
            ("permission denied", "autorisation"),
            ("timeout after 30s", "trop de temps"),
            ("kaboom", "reformuler"),
        ];
        for (error, expected) in cases {
            let out = meta
                .run(json!({
                    "action": "handle_error",
                    "error_message": error,
                    "original_question": "q"
                }))
                .await
                .unwrap();
            assert!(
                out["response"].as_str().unwrap().contains(expected),
                "{error} → {expected}"
            );
        }
    }

    #[tokio::test]
    async fn test_format_response_degrades_to_raw_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta_with_corpus(&dir);

        let out = meta
            .run(json!({
                "action": "format_response",
                "original_message": "combien de leads ?",
                "raw_response": {"status": "success", "message": "42 leads actifs"},
                "agent_used": "DatabaseQueryAgent"
            }))
            .await
            .unwrap();
        assert_eq!(out["status"], "success");
        assert_eq!(out["response"], "42 leads actifs");
    }

    #[test]
    fn test_summarize_raw_shapes() {
        assert_eq!(summarize_raw(&json!("texte")), "texte");
        assert_eq!(summarize_raw(&json!({"response": "ok"})), "ok");
        assert_eq!(
            summarize_raw(&json!({"status": "error", "message": "boom"})),
            "Erreur: boom"
        );
    }
}
