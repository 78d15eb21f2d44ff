//! Hybrid retriever: vector + keyword search fused by Reciprocal Rank
//! Fusion.
//!
//! Both signal paths run over the same access filter and the same
//! over-fetched candidate count (`max(k*3, 10)`, sized to leave the
//! optional reranking pass something to work with). Vector results below
//! the configured similarity floor are dropped before fusion. Each list
//! contributes `1 / (rank + K)` per result, keyed by exact chunk content,
//! so a passage ranked well by both signals outranks one ranked well by
//! only one.
//!
//! Failures degrade, never propagate: a broken hybrid path falls back to
//! vector-only search, a broken vector path yields an empty result list.
//! Callers of [`RetrievalEngine::hybrid_search`] cannot get an error.

use std::collections::HashMap;

use anyhow::Result;
use tracing::warn;

use crate::engine::RetrievalEngine;
use crate::models::{AccessFilter, ChunkMetadata, ScoredChunk};

impl RetrievalEngine {
    /// Primary query entrypoint: top-`k` access-filtered passages.
    pub async fn hybrid_search(
        &self,
        query: &str,
        k: usize,
        filter: &AccessFilter,
    ) -> Vec<ScoredChunk> {
        if query.trim().is_empty() || k == 0 {
            return Vec::new();
        }

        let keyword_empty = self.keyword.read().await.is_empty();
        if !self.retrieval.hybrid_enabled || keyword_empty {
            return self.similarity_search(query, k, filter).await;
        }

        match self.hybrid_search_inner(query, k, filter).await {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    error = %format!("{:#}", e),
                    "hybrid search failed, falling back to vector-only"
                );
                self.similarity_search(query, k, filter).await
            }
        }
    }

    async fn hybrid_search_inner(
        &self,
        query: &str,
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let candidate_count = (k * 3).max(10);

        let query_vec = self.embedder.embed_query(query).await?;
        let vector_hits = self.vector.query(&query_vec, candidate_count, filter).await?;
        let vector_list: Vec<ScoredChunk> = vector_hits
            .into_iter()
            .map(|(chunk, similarity)| ScoredChunk {
                content: chunk.content,
                metadata: chunk.metadata,
                score: similarity as f64,
            })
            .filter(|sc| sc.score >= self.retrieval.min_similarity)
            .collect();

        let keyword_list = self
            .keyword
            .read()
            .await
            .search(query, candidate_count, filter);

        let mut fused = rrf_fuse(&[vector_list, keyword_list], self.retrieval.rrf_k);
        fused.truncate(k);
        Ok(fused)
    }

    /// Vector-only search; the hybrid fallback path and the delegation
    /// target when hybrid mode is off or the keyword index is empty.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: &AccessFilter,
    ) -> Vec<ScoredChunk> {
        match self.similarity_search_inner(query, k, filter).await {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    error = %format!("{:#}", e),
                    "vector search failed, returning empty result set"
                );
                Vec::new()
            }
        }
    }

    async fn similarity_search_inner(
        &self,
        query: &str,
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vec = self.embedder.embed_query(query).await?;
        let hits = self.vector.query(&query_vec, k, filter).await?;
        Ok(hits
            .into_iter()
            .map(|(chunk, similarity)| ScoredChunk {
                content: chunk.content,
                metadata: chunk.metadata,
                score: similarity as f64,
            })
            .collect())
    }
}

/// Fuse ranked lists via Reciprocal Rank Fusion.
///
/// Each result at 0-indexed rank `r` contributes `1 / (r + k_const)` to
/// the fused score of its chunk, keyed by exact content. A chunk present
/// in several lists accumulates all of its contributions. Ties keep
/// first-seen order.
pub fn rrf_fuse(lists: &[Vec<ScoredChunk>], k_const: usize) -> Vec<ScoredChunk> {
    struct Fused {
        metadata: ChunkMetadata,
        score: f64,
    }

    let mut by_content: HashMap<&str, Fused> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();

    for list in lists {
        for (rank, item) in list.iter().enumerate() {
            let contribution = 1.0 / ((rank + k_const) as f64);
            match by_content.get_mut(item.content.as_str()) {
                Some(existing) => existing.score += contribution,
                None => {
                    by_content.insert(
                        item.content.as_str(),
                        Fused {
                            metadata: item.metadata.clone(),
                            score: contribution,
                        },
                    );
                    first_seen.push(item.content.as_str());
                }
            }
        }
    }

    let mut fused: Vec<ScoredChunk> = first_seen
        .into_iter()
        .map(|content| {
            let entry = &by_content[content];
            ScoredChunk {
                content: content.to_string(),
                metadata: entry.metadata.clone(),
                score: entry.score,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessLevel, SourceKind};

    fn scored(content: &str, score: f64) -> ScoredChunk {
        ScoredChunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source_kind: SourceKind::Headline,
                source_id: 1,
                access_level: AccessLevel::Public,
                chunk_index: 0,
                file_type: None,
                page_number: None,
                content_hash: String::new(),
            },
            score,
        }
    }

    #[test]
    fn test_rrf_concrete_scores() {
        // vector = [A, B, C], keyword = [B, A, D], K = 60.
        let vector = vec![scored("A", 0.9), scored("B", 0.8), scored("C", 0.7)];
        let keyword = vec![scored("B", 12.0), scored("A", 9.0), scored("D", 3.0)];

        let fused = rrf_fuse(&[vector, keyword], 60);
        assert_eq!(fused.len(), 4);

        let score_of = |content: &str| {
            fused
                .iter()
                .find(|sc| sc.content == content)
                .map(|sc| sc.score)
                .unwrap()
        };

        let expected_ab = 1.0 / 60.0 + 1.0 / 61.0;
        assert!((score_of("A") - expected_ab).abs() < 1e-9);
        assert!((score_of("B") - expected_ab).abs() < 1e-9);
        assert!((score_of("C") - 1.0 / 62.0).abs() < 1e-9);
        assert!((score_of("D") - 1.0 / 62.0).abs() < 1e-9);

        // A and B (in both lists) outrank C and D (in one list each).
        assert!(fused[0].content == "A" || fused[0].content == "B");
        assert!(fused[1].content == "A" || fused[1].content == "B");
    }

    #[test]
    fn test_rrf_double_rank_zero_beats_single() {
        let list_a = vec![scored("both", 1.0), scored("only-a", 0.9)];
        let list_b = vec![scored("both", 5.0), scored("only-b", 4.0)];

        let fused = rrf_fuse(&[list_a, list_b], 60);
        assert_eq!(fused[0].content, "both");
        assert!((fused[0].score - 2.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_rrf_ignores_raw_scores() {
        // Fusion uses ranks only; wildly different raw scores with the
        // same orderings give identical fused output.
        let a1 = vec![scored("x", 1000.0), scored("y", 0.001)];
        let b1 = vec![scored("y", 0.5), scored("x", 0.4)];
        let a2 = vec![scored("x", 0.6), scored("y", 0.5)];
        let b2 = vec![scored("y", 99.0), scored("x", 1.0)];

        let f1 = rrf_fuse(&[a1, b1], 60);
        let f2 = rrf_fuse(&[a2, b2], 60);
        let order1: Vec<&str> = f1.iter().map(|sc| sc.content.as_str()).collect();
        let order2: Vec<&str> = f2.iter().map(|sc| sc.content.as_str()).collect();
        assert_eq!(order1, order2);
        for (s1, s2) in f1.iter().zip(f2.iter()) {
            assert!((s1.score - s2.score).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rrf_empty_and_single_list() {
        assert!(rrf_fuse(&[], 60).is_empty());
        assert!(rrf_fuse(&[Vec::new(), Vec::new()], 60).is_empty());

        let single = vec![scored("a", 1.0), scored("b", 0.5)];
        let fused = rrf_fuse(&[single, Vec::new()], 60);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].content, "a");
        assert_eq!(fused[1].content, "b");
    }

    #[test]
    fn test_rrf_deterministic_tie_order() {
        let a = vec![scored("p", 1.0)];
        let b = vec![scored("q", 1.0)];
        // Both at rank 0 in exactly one list: tie, first-seen order wins.
        let fused = rrf_fuse(&[a, b], 60);
        assert_eq!(fused[0].content, "p");
        assert_eq!(fused[1].content, "q");
    }
}
