//! Uniform LLM call surface.
//!
//! Every agent talks to the language model through this one service, which
//! maps three complexity tiers onto concrete models. The HTTP side speaks
//! the OpenAI-compatible chat-completions and embeddings APIs via `reqwest`.
//!
//! A service constructed without an API key is usable: every call fails
//! with a downstream error so callers can degrade (the MetaAgent answers
//! with a canned sentence, the knowledge layer falls back to offline mode).
//! Bootstrap is where a missing key becomes fatal.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Task complexity tier, selecting the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Simple extraction and reformulation.
    Low,
    /// Intermediate tasks (request analysis, formatting).
    Medium,
    /// Complex or strategic reasoning.
    High,
}

/// One message of a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

static GLOBAL: OnceCell<std::sync::Arc<LLMService>> = OnceCell::new();

/// The shared LLM client. Safe for concurrent use (reqwest pools
/// connections internally).
pub struct LLMService {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model_high: String,
    model_medium: String,
    model_low: String,
    embedding_model: String,
    temperature: f32,
}

impl LLMService {
    /// Build from the environment. `OPENAI_API_KEY` selects live mode;
    /// `BERINIA_LLM_BASE_URL` overrides the endpoint.
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("BERINIA_LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model_high: "gpt-4.1".to_string(),
            model_medium: "gpt-4.1-mini".to_string(),
            model_low: "gpt-4.1-nano".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.3,
        }
    }

    /// The process-wide service.
    pub fn global() -> std::sync::Arc<LLMService> {
        GLOBAL
            .get_or_init(|| std::sync::Arc::new(Self::from_env()))
            .clone()
    }

    /// A service with no key: every call fails downstream, exercising the
    /// degraded paths deterministically.
    #[cfg(test)]
    pub(crate) fn disabled() -> std::sync::Arc<LLMService> {
        std::sync::Arc::new(Self {
            client: reqwest::Client::new(),
            api_key: None,
            base_url: "http://127.0.0.1:1".to_string(),
            model_high: "gpt-4.1".to_string(),
            model_medium: "gpt-4.1-mini".to_string(),
            model_low: "gpt-4.1-nano".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.3,
        })
    }

    /// Whether a key is configured (bootstrap checks this).
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Model name for a tier.
    pub fn model_for(&self, complexity: Complexity) -> &str {
        match complexity {
            Complexity::High => &self.model_high,
            Complexity::Medium => &self.model_medium,
            Complexity::Low => &self.model_low,
        }
    }

    /// Single-prompt call.
    pub async fn call(&self, prompt: &str, complexity: Complexity) -> Result<String, AgentError> {
        self.call_with_context(prompt, &[], complexity).await
    }

    /// Call with conversational history; `prompt` is appended as the final
    /// user message.
    pub async fn call_with_context(
        &self,
        prompt: &str,
        context: &[ChatMessage],
        complexity: Complexity,
    ) -> Result<String, AgentError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::downstream("clé API LLM non configurée"))?;

        let mut messages = context.to_vec();
        messages.push(ChatMessage::user(prompt));
        let request = ChatRequest {
            model: self.model_for(complexity),
            messages: &messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::downstream(format!("appel LLM échoué: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::downstream(format!(
                "API LLM en erreur {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::downstream(format!("réponse LLM illisible: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AgentError::downstream("réponse LLM vide"))
    }

    /// Embed a text chunk (vector store side).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::downstream("clé API LLM non configurée"))?;

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::downstream(format!("embedding échoué: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AgentError::downstream(format!(
                "API embeddings en erreur {status}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AgentError::downstream(format!("réponse embeddings illisible: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| AgentError::downstream("réponse embeddings vide"))
    }
}

/// Strip an optional markdown code fence around an LLM JSON reply.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyless() -> std::sync::Arc<LLMService> {
        LLMService::disabled()
    }

    #[test]
    fn test_model_tiers() {
        let service = keyless();
        assert_eq!(service.model_for(Complexity::High), "gpt-4.1");
        assert_eq!(service.model_for(Complexity::Medium), "gpt-4.1-mini");
        assert_eq!(service.model_for(Complexity::Low), "gpt-4.1-nano");
    }

    #[tokio::test]
    async fn test_missing_key_is_downstream_error() {
        let service = keyless();
        let err = service.call("bonjour", Complexity::Low).await.unwrap_err();
        assert!(matches!(err, AgentError::Downstream { .. }));
        let err = service.embed("bonjour").await.unwrap_err();
        assert!(matches!(err, AgentError::Downstream { .. }));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
