//! Offline knowledge backend.
//!
//! Loads markdown files under the knowledge directory, chunks them along
//! heading and paragraph boundaries, and answers searches with a term
//! overlap score (shared words over query words, with a bonus for exact
//! phrase matches). No network, no embeddings: the degraded twin of the
//! vector store.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use uuid::Uuid;

use super::{ChunkMetadata, KnowledgeChunk, KnowledgeStore, SearchHit, MIN_SCORE};
use crate::error::AgentError;

/// Target chunk size, in characters.
const CHUNK_SIZE: usize = 1000;
/// Overlap carried between consecutive chunks.
const CHUNK_OVERLAP: usize = 200;
/// Chunks scoring below this are not even candidates.
const CANDIDATE_SCORE: f64 = 0.1;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());

/// Markdown-file backed store with in-memory collections.
pub struct OfflineKnowledgeStore {
    root: PathBuf,
    collections: RwLock<HashMap<String, Vec<KnowledgeChunk>>>,
    loaded: RwLock<bool>,
}

impl OfflineKnowledgeStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            collections: RwLock::new(HashMap::new()),
            loaded: RwLock::new(false),
        }
    }

    /// Walk `root` for `*.md` files and (re)build the `knowledge` collection.
    pub fn load_corpus(&self) -> usize {
        let mut chunks = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
                    let Ok(content) = std::fs::read_to_string(&path) else {
                        continue;
                    };
                    let source = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let category = path
                        .parent()
                        .and_then(|p| p.file_name())
                        .map(|n| n.to_string_lossy().into_owned())
                        .filter(|c| c != "knowledge")
                        .unwrap_or_else(|| "system".to_string());
                    let pieces = split_into_chunks(&content, CHUNK_SIZE, CHUNK_OVERLAP);
                    let total = pieces.len();
                    for (i, piece) in pieces.into_iter().enumerate() {
                        chunks.push(KnowledgeChunk {
                            id: Uuid::new_v4().to_string(),
                            content: piece,
                            metadata: ChunkMetadata {
                                source: source.clone(),
                                category: category.clone(),
                                chunk_index: i,
                                total_chunks: total,
                                created_at: Utc::now(),
                            },
                            embedding: Vec::new(),
                        });
                    }
                }
            }
        }
        let count = chunks.len();
        self.collections
            .write()
            .insert("knowledge".to_string(), chunks);
        *self.loaded.write() = true;
        log::info!(target: "knowledge", "corpus hors-ligne chargé: {count} chunks");
        count
    }

    fn ensure_loaded(&self) {
        if !*self.loaded.read() {
            self.load_corpus();
        }
    }
}

#[async_trait]
impl KnowledgeStore for OfflineKnowledgeStore {
    async fn create_collection(&self, name: &str, _vector_size: usize) -> Result<(), AgentError> {
        self.collections
            .write()
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn add(
        &self,
        collection: &str,
        text: &str,
        metadata: ChunkMetadata,
    ) -> Result<String, AgentError> {
        let id = Uuid::new_v4().to_string();
        let chunk = KnowledgeChunk {
            id: id.clone(),
            content: text.to_string(),
            metadata,
            embedding: Vec::new(),
        };
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(chunk);
        Ok(id)
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AgentError> {
        if collection == "knowledge" {
            self.ensure_loaded();
        }
        let collections = self.collections.read();
        let Some(chunks) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<SearchHit> = chunks
            .iter()
            .filter_map(|chunk| {
                let score = term_overlap_score(query, &chunk.content);
                (score > CANDIDATE_SCORE).then(|| SearchHit {
                    score,
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored.retain(|hit| hit.score > MIN_SCORE);
        Ok(scored)
    }
}

/// Shared-word ratio between query and content, capped at 1.0, with a 0.2
/// bonus per query phrase (> 2 words) found verbatim.
pub fn term_overlap_score(query: &str, content: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let content_lower = content.to_lowercase();
    let query_words: HashSet<&str> = WORD.find_iter(&query_lower).map(|m| m.as_str()).collect();
    let content_words: HashSet<&str> =
        WORD.find_iter(&content_lower).map(|m| m.as_str()).collect();

    if query_words.is_empty() || content_words.is_empty() {
        return 0.0;
    }

    let common = query_words.intersection(&content_words).count();
    let mut score = common as f64 / query_words.len() as f64;

    for phrase in query_lower.split('.') {
        let phrase = phrase.trim();
        if phrase.split_whitespace().count() > 2 && content_lower.contains(phrase) {
            score += 0.2;
        }
    }
    score.min(1.0)
}

/// Split markdown into chunks, preferring heading and paragraph boundaries,
/// carrying `overlap` characters between consecutive chunks.
pub fn split_into_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for block in text.split("\n\n") {
        let block = block.trim_end();
        if block.trim().is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + block.len() + 2 > chunk_size {
            let carry = tail_chars(&current, overlap);
            chunks.push(std::mem::take(&mut current));
            current = carry;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        // A single oversized block is split hard.
        if block.len() > chunk_size {
            let mut rest = block;
            while rest.len() > chunk_size {
                let split_at = floor_char_boundary(rest, chunk_size);
                current.push_str(&rest[..split_at]);
                chunks.push(std::mem::take(&mut current));
                let back = floor_char_boundary(rest, split_at.saturating_sub(overlap));
                rest = &rest[back..];
            }
            current.push_str(rest);
        } else {
            current.push_str(block);
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

fn tail_chars(s: &str, n: usize) -> String {
    if s.len() <= n {
        return s.to_string();
    }
    let start = floor_char_boundary(s, s.len() - n);
    s[start..].to_string()
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_overlap_scoring() {
        let content = "Le scheduler est une file de priorité persistante qui déclenche les agents.";
        assert!(term_overlap_score("explique le scheduler", content) > 0.3);
        assert_eq!(term_overlap_score("", content), 0.0);
        assert!(term_overlap_score("cuisine italienne", content) < 0.2);
    }

    #[test]
    fn test_chunking_respects_size() {
        let text = (0..30)
            .map(|i| format!("Paragraphe {i} avec un peu de contenu pour remplir."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_into_chunks(&text, 200, 50);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 300, "chunk too large: {}", chunk.len());
        }
    }

    #[tokio::test]
    async fn test_corpus_load_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("architecture");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(
            sub.join("scheduler.md"),
            "# Scheduler\n\nLe scheduler est une file de priorité persistante.\n",
        )
        .unwrap();

        let store = OfflineKnowledgeStore::new(dir.path().to_path_buf());
        assert_eq!(store.load_corpus(), 1);

        let hits = store
            .search("knowledge", "comment fonctionne le scheduler de priorité", 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.source, "scheduler.md");
        assert_eq!(hits[0].metadata.category, "architecture");
    }

    #[tokio::test]
    async fn test_unknown_collection_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = OfflineKnowledgeStore::new(dir.path().to_path_buf());
        let hits = store.search("documents", "anything", 3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_add_then_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = OfflineKnowledgeStore::new(dir.path().to_path_buf());
        store.create_collection("templates", 1536).await.unwrap();
        store
            .add(
                "templates",
                "Modèle de relance pour les campagnes immobilières",
                ChunkMetadata {
                    source: "manual".to_string(),
                    category: "templates".to_string(),
                    chunk_index: 0,
                    total_chunks: 1,
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let hits = store
            .search("templates", "relance campagnes immobilières", 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
