//! LLM-scored reranking pass over hybrid candidates.
//!
//! Vector/BM25 fusion is cheap but coarse; a language-model judge over a
//! small candidate set buys precision at acceptable cost, which is why
//! the hybrid retriever over-fetches in the first place. The LLM is asked
//! for a JSON array of integer relevance scores (0-10), one per
//! candidate, in candidate order. Anything that deviates from that
//! contract (transport error, unparseable output, wrong array length)
//! degrades to returning the first `top_k` candidates unscored. This
//! function never fails.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::RerankConfig;
use crate::embedding::post_json_with_retry;
use crate::models::ScoredChunk;

const SYSTEM_PROMPT: &str = "You are a search relevance judge. You are given a query and a \
numbered list of documents. Rate how relevant each document is to the query on an integer \
scale from 0 (irrelevant) to 10 (directly answers the query). Respond with ONLY a JSON array \
of integers, one per document, in the same order as the documents. No explanations.";

/// Black-box text-completion service (system + user message in, text out).
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Completion client for an OpenAI-compatible chat endpoint.
///
/// Uses `OPENAI_API_KEY` from the environment when present; local
/// inference servers typically accept unauthenticated requests.
pub struct HttpCompletionClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("rerank.base_url required"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let api_key = std::env::var("OPENAI_API_KEY").ok();
        let json =
            post_json_with_retry(&self.client, &url, api_key.as_deref(), &body, 1).await?;

        match json.pointer("/choices/0/message/content").and_then(|v| v.as_str()) {
            Some(content) => Ok(content.to_string()),
            None => bail!("Completion response has no message content"),
        }
    }
}

/// Reorder `candidates` by LLM relevance and return the best `top_k`.
///
/// Candidate sets already within `top_k` are returned unchanged and the
/// LLM call is skipped entirely.
pub async fn rerank_documents(
    client: &dyn CompletionClient,
    config: &RerankConfig,
    query: &str,
    candidates: Vec<ScoredChunk>,
    top_k: usize,
) -> Vec<ScoredChunk> {
    if candidates.len() <= top_k {
        return candidates;
    }

    let prompt = build_prompt(query, &candidates, config.max_candidate_chars);

    let response = match client.complete(SYSTEM_PROMPT, &prompt).await {
        Ok(response) => response,
        Err(e) => {
            warn!(
                error = %format!("{:#}", e),
                "rerank LLM call failed, returning fused order"
            );
            return candidates.into_iter().take(top_k).collect();
        }
    };

    let scores = match parse_scores(&response) {
        Some(scores) if scores.len() == candidates.len() => scores,
        Some(scores) => {
            warn!(
                expected = candidates.len(),
                got = scores.len(),
                "rerank score array has wrong length, returning fused order"
            );
            return candidates.into_iter().take(top_k).collect();
        }
        None => {
            warn!("rerank response is not a JSON score array, returning fused order");
            return candidates.into_iter().take(top_k).collect();
        }
    };

    let mut rescored: Vec<ScoredChunk> = candidates
        .into_iter()
        .zip(scores)
        .map(|(mut chunk, score)| {
            chunk.score = score;
            chunk
        })
        .collect();
    rescored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rescored.truncate(top_k);
    rescored
}

/// Compact prompt: the query plus each candidate, indexed and truncated
/// to the configured character budget.
fn build_prompt(query: &str, candidates: &[ScoredChunk], max_chars: usize) -> String {
    let mut prompt = format!("Query: {}\n\nDocuments:\n", query);
    for (index, candidate) in candidates.iter().enumerate() {
        let excerpt: String = candidate.content.chars().take(max_chars).collect();
        prompt.push_str(&format!("[{}] {}\n", index, excerpt));
    }
    prompt.push_str(&format!(
        "\nReturn a JSON array of exactly {} integer scores (0-10).",
        candidates.len()
    ));
    prompt
}

/// Pull the first JSON array of numbers out of the model's reply.
///
/// Models wrap arrays in prose or code fences often enough that parsing
/// the raw response directly would throw away valid answers.
fn parse_scores(response: &str) -> Option<Vec<f64>> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end <= start {
        return None;
    }
    let array: Vec<serde_json::Value> = serde_json::from_str(&response[start..=end]).ok()?;
    array.iter().map(|v| v.as_f64()).collect()
}
