//! Vector knowledge backend over the Qdrant REST API.
//!
//! Collections are created with cosine distance; chunks are embedded
//! through the LLM service and upserted as points carrying the chunk
//! content and metadata as payload. Searches embed the query and ask
//! Qdrant for the top-K above the score threshold.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ChunkMetadata, KnowledgeStore, SearchHit, MIN_SCORE};
use crate::error::AgentError;
use crate::llm::LLMService;

/// Qdrant-backed store.
pub struct VectorKnowledgeStore {
    client: reqwest::Client,
    base_url: String,
    llm: Arc<LLMService>,
}

impl VectorKnowledgeStore {
    pub fn new(base_url: String, llm: Arc<LLMService>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            llm,
        }
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{name}", self.base_url)
    }

    async fn check(&self, response: reqwest::Response, what: &str) -> Result<Value, AgentError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::downstream(format!(
                "qdrant {what} en erreur {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AgentError::downstream(format!("réponse qdrant illisible: {e}")))
    }
}

#[async_trait]
impl KnowledgeStore for VectorKnowledgeStore {
    async fn create_collection(&self, name: &str, vector_size: usize) -> Result<(), AgentError> {
        let body = json!({
            "vectors": {"size": vector_size, "distance": "Cosine"}
        });
        let response = self
            .client
            .put(self.collection_url(name))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::downstream(format!("qdrant injoignable: {e}")))?;
        // 409 means the collection already exists, which is fine.
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        self.check(response, "create_collection").await.map(|_| ())
    }

    async fn add(
        &self,
        collection: &str,
        text: &str,
        metadata: ChunkMetadata,
    ) -> Result<String, AgentError> {
        let embedding = self.llm.embed(text).await?;
        let id = Uuid::new_v4().to_string();
        let body = json!({
            "points": [{
                "id": id,
                "vector": embedding,
                "payload": {
                    "content": text,
                    "metadata": metadata,
                }
            }]
        });
        let response = self
            .client
            .put(format!("{}/points", self.collection_url(collection)))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::downstream(format!("qdrant injoignable: {e}")))?;
        self.check(response, "upsert").await?;
        Ok(id)
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AgentError> {
        let embedding = self.llm.embed(query).await?;
        let body = json!({
            "vector": embedding,
            "limit": limit,
            "score_threshold": MIN_SCORE,
            "with_payload": true,
        });
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(collection)))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::downstream(format!("qdrant injoignable: {e}")))?;
        let parsed = self.check(response, "search").await?;

        let mut hits = Vec::new();
        if let Some(rows) = parsed.get("result").and_then(Value::as_array) {
            for row in rows {
                let score = row.get("score").and_then(Value::as_f64).unwrap_or(0.0);
                let payload = row.get("payload").cloned().unwrap_or(Value::Null);
                let content = payload
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let metadata = payload
                    .get("metadata")
                    .cloned()
                    .and_then(|m| serde_json::from_value(m).ok())
                    .unwrap_or(ChunkMetadata {
                        source: "inconnu".to_string(),
                        category: "system".to_string(),
                        chunk_index: 0,
                        total_chunks: 0,
                        created_at: chrono::Utc::now(),
                    });
                hits.push(SearchHit {
                    score,
                    content,
                    metadata,
                });
            }
        }
        Ok(hits)
    }
}
