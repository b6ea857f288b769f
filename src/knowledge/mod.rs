//! Knowledge retrieval for prompt enrichment.
//!
//! Two interchangeable backends behind one trait: a vector store speaking
//! the Qdrant REST API with embeddings from the LLM service, and an offline
//! store over `data/knowledge/**/*.md` scored by term overlap. Agents only
//! read; the store owns every chunk.

pub mod offline;
pub mod vector;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AgentError;
use crate::llm::LLMService;

/// Default vector dimension for new collections.
pub const DEFAULT_VECTOR_SIZE: usize = 1536;
/// Results below this score are dropped.
pub const MIN_SCORE: f64 = 0.2;

/// Header under which retrieved chunks are injected into prompts.
pub const KNOWLEDGE_SECTION_HEADER: &str = "INFORMATIONS CONTEXTUELLES PERTINENTES";

/// Provenance of a knowledge chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub category: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub created_at: DateTime<Utc>,
}

/// A stored chunk of text with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f64,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Retrieval and storage of text chunks. Both backends expose exactly this
/// surface, so callers never know which mode they run in.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_collection(&self, name: &str, vector_size: usize) -> Result<(), AgentError>;

    /// Embed (when applicable) and upsert one chunk; returns its id.
    async fn add(
        &self,
        collection: &str,
        text: &str,
        metadata: ChunkMetadata,
    ) -> Result<String, AgentError>;

    /// Top-`limit` chunks for `query`, filtered by the minimum score.
    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AgentError>;
}

static GLOBAL: once_cell::sync::OnceCell<Arc<dyn KnowledgeStore>> =
    once_cell::sync::OnceCell::new();

/// The process-wide store, created from the environment on first use.
pub fn global_store() -> Arc<dyn KnowledgeStore> {
    GLOBAL.get_or_init(knowledge_store_from_env).clone()
}

/// Pick the backend from the environment: `QDRANT_URL` set → vector store,
/// otherwise the offline markdown corpus.
pub fn knowledge_store_from_env() -> Arc<dyn KnowledgeStore> {
    match std::env::var("QDRANT_URL") {
        Ok(url) if !url.is_empty() => {
            log::info!(target: "knowledge", "mode vectoriel ({url})");
            Arc::new(vector::VectorKnowledgeStore::new(url, LLMService::global()))
        }
        _ => {
            log::info!(target: "knowledge", "mode hors-ligne (corpus markdown)");
            Arc::new(offline::OfflineKnowledgeStore::new(
                crate::utilities::paths::knowledge_dir(),
            ))
        }
    }
}

/// Render hits into the prompt section agents append to their context.
pub fn format_knowledge_for_prompt(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = format!("{KNOWLEDGE_SECTION_HEADER}:\n\n");
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "[Bloc {} - {}]\n{}\n\n",
            i + 1,
            hit.metadata.source,
            hit.content
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(source: &str, content: &str) -> SearchHit {
        SearchHit {
            score: 0.5,
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                category: "system".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_format_empty_hits() {
        assert_eq!(format_knowledge_for_prompt(&[]), "");
    }

    #[test]
    fn test_format_hits_carries_header_and_sources() {
        let rendered = format_knowledge_for_prompt(&[
            hit("scheduler.md", "Le scheduler est une file de priorité."),
            hit("overseer.md", "L'overseer distribue les tâches."),
        ]);
        assert!(rendered.starts_with("INFORMATIONS CONTEXTUELLES PERTINENTES:"));
        assert!(rendered.contains("[Bloc 1 - scheduler.md]"));
        assert!(rendered.contains("[Bloc 2 - overseer.md]"));
        assert!(rendered.contains("file de priorité"));
    }
}
