//! Knowledge base retrieval with child→parent promotion
//!
//! Children are embedded for recall; parents carry enough context for the
//! LLM. A search runs intent extraction, filtered vector retrieval over
//! the children, then promotes hits to their parent chunks, deduplicated
//! in first-hit order so chunk-boundary fragments never fracture the
//! answer context.

use crate::config::RetrievalConfig;
use crate::error::{PlatformError, Result};
use crate::intent::{extract_intent, QueryIntent};
use crate::llm::build_chat_model;
use crate::models::{LlmType, Metadata, ModelParameters};
use crate::providers::ProviderDirectory;
use crate::repository::Repository;
use crate::vector::{ScoredChild, VectorStoreRouter};
use crate::embedding::build_embedder;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// One promoted parent chunk in a search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub metadata: Metadata,
    /// 0-based rank in the response
    pub position: usize,
    /// Highest-scoring child's similarity
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub kb_id: Uuid,
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Elapsed microseconds
    pub took: i64,
    pub total: i64,
}

pub struct SearchService {
    repo: Repository,
    directory: Arc<dyn ProviderDirectory>,
    vectors: Arc<VectorStoreRouter>,
    config: RetrievalConfig,
}

impl SearchService {
    pub fn new(
        repo: Repository,
        directory: Arc<dyn ProviderDirectory>,
        vectors: Arc<VectorStoreRouter>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            repo,
            directory,
            vectors,
            config,
        }
    }

    /// Run the full retrieval pipeline for one knowledge base.
    pub async fn search(&self, kb_id: Uuid, user_id: Uuid, query: &str) -> Result<SearchResponse> {
        let started = Instant::now();

        let kb = self
            .repo
            .get_knowledge_base(kb_id, user_id)
            .await?
            .ok_or(PlatformError::KnowledgeBaseNotFound)?;

        if query.trim().is_empty() {
            return Ok(SearchResponse {
                kb_id,
                query: query.to_string(),
                results: Vec::new(),
                took: started.elapsed().as_micros() as i64,
                total: 0,
            });
        }

        let intent = self.resolve_intent(&kb.chat_model_provider, &kb.chat_model_name, query).await;

        let embedding = self
            .directory
            .embedding_config(user_id, &kb.embedding_model_provider, &kb.embedding_model_name)
            .await
            .map_err(|_| PlatformError::EmbeddingConfigNotFound)?;
        let embedder = build_embedder(&embedding);
        let store = self.vectors.store_for(&kb, embedder).await;

        let hits = store
            .search(&intent.keywords, self.config.top_k, &intent.filter())
            .await
            .map_err(|e| PlatformError::Retriever(e.to_string()))?;

        let promoted = promote(&hits);
        if promoted.is_empty() {
            return Ok(SearchResponse {
                kb_id,
                query: query.to_string(),
                results: Vec::new(),
                took: started.elapsed().as_micros() as i64,
                total: 0,
            });
        }

        let promoted: Vec<(Uuid, f64)> = promoted
            .into_iter()
            .take(self.config.max_search_result)
            .filter_map(|(id, score)| Uuid::parse_str(&id).ok().map(|id| (id, score)))
            .collect();
        let ids: Vec<Uuid> = promoted.iter().map(|(id, _)| *id).collect();
        let scores: HashMap<Uuid, f64> = promoted.into_iter().collect();

        // ordered load; orphaned parent ids simply drop out
        let chunks = self.repo.get_chunks_by_ids(&ids).await?;
        debug!("promoted {} parents for query", chunks.len());

        let results: Vec<SearchResult> = chunks
            .into_iter()
            .enumerate()
            .map(|(position, chunk)| SearchResult {
                id: chunk.id,
                document_id: chunk.document_id,
                content: chunk.content,
                metadata: chunk.meta_info,
                position,
                score: scores.get(&chunk.id).copied().unwrap_or(0.0),
            })
            .collect();

        Ok(SearchResponse {
            kb_id,
            query: query.to_string(),
            total: results.len() as i64,
            results,
            took: started.elapsed().as_micros() as i64,
        })
    }

    /// Intent extraction backed by the KB's chat model; any resolution
    /// failure degrades to passing the raw query through.
    async fn resolve_intent(&self, provider: &str, model_name: &str, query: &str) -> QueryIntent {
        let provider_config = match self
            .directory
            .provider_config(provider, model_name, LlmType::Chat)
            .await
        {
            Ok(config) => config,
            Err(e) => {
                warn!("chat provider unavailable for intent extraction: {}", e);
                return QueryIntent::passthrough(query);
            }
        };
        let model = build_chat_model(&provider_config, model_name, &ModelParameters::default());
        extract_intent(model.as_ref(), query).await
    }
}

/// Collect unique `parent_id`s from descending-score hits, preserving
/// first-seen order and keeping each parent's best child score. Hits
/// without a `parent_id` are skipped.
pub fn promote(hits: &[ScoredChild]) -> Vec<(String, f64)> {
    let mut sorted: Vec<&ScoredChild> = hits.iter().collect();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, f64> = HashMap::new();
    for hit in sorted {
        let Some(parent_id) = hit.metadata.get("parent_id").and_then(|v| v.as_str()) else {
            continue;
        };
        if parent_id.is_empty() {
            continue;
        }
        match best.get_mut(parent_id) {
            None => {
                order.push(parent_id.to_string());
                best.insert(parent_id.to_string(), hit.score);
            }
            Some(score) => {
                if hit.score > *score {
                    *score = hit.score;
                }
            }
        }
    }
    order
        .into_iter()
        .map(|id| {
            let score = best[&id];
            (id, score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(parent: Option<&str>, score: f64) -> ScoredChild {
        let mut metadata = Metadata::new();
        if let Some(parent) = parent {
            metadata.insert("parent_id".to_string(), json!(parent));
        }
        ScoredChild {
            id: Uuid::new_v4().to_string(),
            content: "child".to_string(),
            metadata,
            score,
        }
    }

    #[test]
    fn test_promotion_first_seen_order_and_best_score() {
        let hits = vec![
            hit(Some("P2"), 0.9),
            hit(Some("P1"), 0.8),
            hit(Some("P2"), 0.7),
            hit(Some("P3"), 0.6),
        ];
        let promoted = promote(&hits);
        assert_eq!(
            promoted,
            vec![
                ("P2".to_string(), 0.9),
                ("P1".to_string(), 0.8),
                ("P3".to_string(), 0.6),
            ]
        );
    }

    #[test]
    fn test_promotion_sorts_by_score_first() {
        // out-of-order input still promotes by descending score
        let hits = vec![
            hit(Some("P1"), 0.5),
            hit(Some("P2"), 0.9),
        ];
        let promoted = promote(&hits);
        assert_eq!(promoted[0].0, "P2");
    }

    #[test]
    fn test_hits_without_parent_skipped() {
        let hits = vec![hit(None, 0.99), hit(Some("P1"), 0.5), hit(Some(""), 0.4)];
        let promoted = promote(&hits);
        assert_eq!(promoted, vec![("P1".to_string(), 0.5)]);
    }

    #[test]
    fn test_empty_hits() {
        assert!(promote(&[]).is_empty());
    }
}
