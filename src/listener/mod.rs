//! Inbound response listener.
//!
//! Normalizes raw webhook payloads (email, SMS) into a common
//! [`InboundEvent`] shape: sender, content, received-at timestamp, and a
//! campaign identifier recovered from provider-specific conventions:
//! `campaign+<id>@domain` in an email recipient, `#<id>` or `[<id>]` at the
//! start of an SMS body. The normalized event is returned to the caller,
//! which hands it to the ResponseInterpreter through the Overseer.
//!
//! The listener itself is stateless apart from its counters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::agents::{error_result, input_action, Agent, AgentCore};
use crate::error::AgentError;
use crate::llm::{strip_code_fence, Complexity, LLMService};
use crate::utilities::logger::LogLevel;

static SMS_HASH_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#([a-zA-Z0-9_-]+)").unwrap());
static SMS_BRACKET_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([a-zA-Z0-9_-]+)\]").unwrap());

/// Where an inbound message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundSource {
    Email,
    Sms,
    Whatsapp,
}

/// A normalized inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub source: InboundSource,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// ISO-8601 reception timestamp.
    pub received_at: String,
    /// Optional LLM-extracted fields.
    pub extracted_data: Value,
    /// The provider payload as received.
    pub raw_data: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
struct ListenerStats {
    emails_received: u64,
    sms_received: u64,
    processed_successfully: u64,
    processing_errors: u64,
    last_activity: Option<String>,
}

/// Extract a campaign id from an email recipient's `+` suffix:
/// `campaign+42@domain.com` → `42`.
pub fn campaign_from_recipient(recipient: &str) -> Option<String> {
    let local = recipient.split('@').next()?;
    let (_, id) = local.split_once('+')?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Extract a campaign id from an SMS body prefix: `#id` or `[id]`.
pub fn campaign_from_sms_body(body: &str) -> Option<String> {
    SMS_HASH_TAG
        .captures(body)
        .or_else(|| SMS_BRACKET_TAG.captures(body))
        .map(|caps| caps[1].to_string())
}

/// Normalizes inbound webhook payloads.
pub struct ResponseListenerAgent {
    core: AgentCore,
    llm: Arc<LLMService>,
    stats: Mutex<ListenerStats>,
}

impl ResponseListenerAgent {
    pub fn new(config_path: Option<String>) -> Result<Self, AgentError> {
        Self::with_llm(config_path, LLMService::global())
    }

    pub fn with_llm(config_path: Option<String>, llm: Arc<LLMService>) -> Result<Self, AgentError> {
        Ok(Self {
            core: AgentCore::new("ResponseListenerAgent", config_path)?,
            llm,
            stats: Mutex::new(ListenerStats::default()),
        })
    }

    async fn process_email(&self, data: &Value) -> Value {
        {
            let mut stats = self.stats.lock();
            stats.emails_received += 1;
            stats.last_activity = Some(Utc::now().to_rfc3339());
        }
        let sender = data.get("sender").and_then(Value::as_str).unwrap_or("");
        let body = data.get("body").and_then(Value::as_str).unwrap_or("");
        if sender.is_empty() || body.is_empty() {
            self.stats.lock().processing_errors += 1;
            return error_result("Champs obligatoires manquants (sender, body)");
        }
        let recipient = data.get("recipient").and_then(Value::as_str).unwrap_or("");
        let subject = data.get("subject").and_then(Value::as_str).unwrap_or("");

        self.core.speak(
            &format!("Réception d'une réponse par email de {sender}"),
            Some("OverseerAgent"),
            LogLevel::Info,
        );

        let event = InboundEvent {
            source: InboundSource::Email,
            sender: sender.to_string(),
            recipient: (!recipient.is_empty()).then(|| recipient.to_string()),
            content: body.to_string(),
            campaign_id: campaign_from_recipient(recipient),
            subject: (!subject.is_empty()).then(|| subject.to_string()),
            received_at: data
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
            extracted_data: self.extract_with_llm(body).await,
            raw_data: data.clone(),
        };

        self.stats.lock().processed_successfully += 1;
        json!({
            "status": "success",
            "message": "Réponse email traitée",
            "data": event,
            "forward_to": "ResponseInterpreterAgent",
        })
    }

    async fn process_sms(&self, data: &Value) -> Value {
        {
            let mut stats = self.stats.lock();
            stats.sms_received += 1;
            stats.last_activity = Some(Utc::now().to_rfc3339());
        }
        let sender = data.get("sender").and_then(Value::as_str).unwrap_or("");
        let body = data.get("body").and_then(Value::as_str).unwrap_or("");
        if sender.is_empty() || body.is_empty() {
            self.stats.lock().processing_errors += 1;
            return error_result("Champs obligatoires manquants (sender, body)");
        }
        let recipient = data.get("recipient").and_then(Value::as_str).unwrap_or("");

        self.core.speak(
            &format!("Réception d'une réponse par SMS de {sender}"),
            Some("OverseerAgent"),
            LogLevel::Info,
        );

        let event = InboundEvent {
            source: InboundSource::Sms,
            sender: sender.to_string(),
            recipient: (!recipient.is_empty()).then(|| recipient.to_string()),
            content: body.to_string(),
            campaign_id: campaign_from_sms_body(body),
            subject: None,
            received_at: data
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
            extracted_data: self.extract_with_llm(body).await,
            raw_data: data.clone(),
        };

        self.stats.lock().processed_successfully += 1;
        json!({
            "status": "success",
            "message": "Réponse SMS traitée",
            "data": event,
            "forward_to": "ResponseInterpreterAgent",
        })
    }

    /// Low-tier LLM extraction for messages whose structure is not obvious;
    /// off by default (`use_llm_for_extraction` config key).
    async fn extract_with_llm(&self, body: &str) -> Value {
        if !self.core.config_bool("use_llm_for_extraction").unwrap_or(false) {
            return json!({});
        }
        let mut context = Map::new();
        context.insert("body".to_string(), json!(body));
        let prompt = self.core.build_prompt(&context);
        match self.llm.call(&prompt, Complexity::Low).await {
            Ok(reply) => {
                serde_json::from_str(strip_code_fence(&reply)).unwrap_or_else(|_| json!({}))
            }
            Err(_) => json!({}),
        }
    }
}

#[async_trait]
impl Agent for ResponseListenerAgent {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn timeout_s(&self) -> Option<u64> {
        self.core.config_u64("timeout_s")
    }

    async fn run(&self, input: Value) -> Result<Value, AgentError> {
        let data = input.get("data").cloned().unwrap_or(json!({}));
        match input_action(&input) {
            "process_email_response" => Ok(self.process_email(&data).await),
            "process_sms_response" => Ok(self.process_sms(&data).await),
            "get_stats" => Ok(json!({
                "status": "success",
                "stats": serde_json::to_value(&*self.stats.lock())?,
            })),
            other => Ok(error_result(format!("Action non reconnue: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(dir: &tempfile::TempDir) -> ResponseListenerAgent {
        let config = dir
            .path()
            .join("response_listener/config.json")
            .to_string_lossy()
            .into_owned();
        ResponseListenerAgent::with_llm(Some(config), LLMService::disabled()).unwrap()
    }

    #[test]
    fn test_campaign_from_recipient() {
        assert_eq!(
            campaign_from_recipient("campaign+42@berinia.io"),
            Some("42".to_string())
        );
        assert_eq!(campaign_from_recipient("contact@berinia.io"), None);
        assert_eq!(campaign_from_recipient("campaign+@berinia.io"), None);
    }

    #[test]
    fn test_campaign_from_sms_body() {
        assert_eq!(
            campaign_from_sms_body("#camp42 yes I'm interested"),
            Some("camp42".to_string())
        );
        assert_eq!(
            campaign_from_sms_body("[camp-7] ok"),
            Some("camp-7".to_string())
        );
        assert_eq!(campaign_from_sms_body("plain reply"), None);
        assert_eq!(campaign_from_sms_body("middle #tag does not count"), None);
    }

    #[tokio::test]
    async fn test_sms_normalization_keeps_content_and_campaign() {
        let dir = tempfile::tempdir().unwrap();
        let agent = listener(&dir);

        let out = agent
            .run(json!({
                "action": "process_sms_response",
                "data": {
                    "sender": "+33600000000",
                    "recipient": "+33700000000",
                    "body": "#camp42 yes I'm interested",
                }
            }))
            .await
            .unwrap();

        assert_eq!(out["status"], "success");
        let event: InboundEvent = serde_json::from_value(out["data"].clone()).unwrap();
        assert_eq!(event.source, InboundSource::Sms);
        assert_eq!(event.campaign_id.as_deref(), Some("camp42"));
        assert_eq!(event.content, "#camp42 yes I'm interested");
        assert_eq!(event.sender, "+33600000000");
    }

    #[tokio::test]
    async fn test_email_normalization_extracts_campaign_from_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let agent = listener(&dir);

        let out = agent
            .run(json!({
                "action": "process_email_response",
                "data": {
                    "sender": "prospect@client.fr",
                    "recipient": "campaign+niche12@berinia.io",
                    "subject": "Re: votre offre",
                    "body": "Oui, appelez-moi demain.",
                }
            }))
            .await
            .unwrap();

        let event: InboundEvent = serde_json::from_value(out["data"].clone()).unwrap();
        assert_eq!(event.source, InboundSource::Email);
        assert_eq!(event.campaign_id.as_deref(), Some("niche12"));
        assert_eq!(event.subject.as_deref(), Some("Re: votre offre"));
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let agent = listener(&dir);

        let out = agent
            .run(json!({
                "action": "process_sms_response",
                "data": {"sender": "+33600000000"}
            }))
            .await
            .unwrap();
        assert_eq!(out["status"], "error");

        let stats = agent.run(json!({"action": "get_stats"})).await.unwrap();
        assert_eq!(stats["stats"]["sms_received"], 1);
        assert_eq!(stats["stats"]["processing_errors"], 1);
        assert_eq!(stats["stats"]["processed_successfully"], 0);
    }
}
