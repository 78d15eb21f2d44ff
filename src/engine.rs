//! The retrieval engine: one long-lived object owning every moving part.
//!
//! Instead of module-level singletons, the vector backend, keyword index,
//! embedder, source store, and watermark live as fields of a
//! [`RetrievalEngine`] constructed once at process startup and passed by
//! reference to the query and sync entrypoints. Components are injected
//! as trait objects, so tests wire in-memory implementations where
//! production wires Chroma/SQLite/HTTP.
//!
//! The keyword index is the only piece of process-wide mutable state; it
//! sits behind a `tokio::sync::RwLock` so a search never observes a
//! partially-cleared index while a full resync is rebuilding it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::config::{ChunkingConfig, Config, RerankConfig, RetrievalConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::keyword::KeywordIndex;
use crate::models::ScoredChunk;
use crate::rerank::{self, CompletionClient, HttpCompletionClient};
use crate::source::{SourceStore, SqliteSourceStore};
use crate::vector::{create_backend, VectorBackend};
use crate::watermark::{FileWatermark, WatermarkStore};

/// Hybrid retrieval engine over a university knowledge base.
///
/// Query path: [`hybrid_search`](RetrievalEngine::hybrid_search) (plus the
/// optional [`rerank_documents`](RetrievalEngine::rerank_documents) pass).
/// Lifecycle path: [`sync_from_db`](RetrievalEngine::sync_from_db),
/// [`init_vector_db`](RetrievalEngine::init_vector_db),
/// [`drop_vector_db`](RetrievalEngine::drop_vector_db).
pub struct RetrievalEngine {
    pub(crate) chunking: ChunkingConfig,
    pub(crate) retrieval: RetrievalConfig,
    pub(crate) rerank: RerankConfig,
    pub(crate) embed_batch: usize,
    pub(crate) upload_dir: Option<PathBuf>,
    pub(crate) source: Arc<dyn SourceStore>,
    pub(crate) vector: Arc<dyn VectorBackend>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) completion: Option<Arc<dyn CompletionClient>>,
    pub(crate) keyword: RwLock<KeywordIndex>,
    pub(crate) watermark: Arc<dyn WatermarkStore>,
}

impl RetrievalEngine {
    /// Assemble an engine from explicit components.
    ///
    /// This is the seam tests use; production code goes through
    /// [`from_config`](RetrievalEngine::from_config).
    pub fn new(
        config: &Config,
        source: Arc<dyn SourceStore>,
        vector: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        completion: Option<Arc<dyn CompletionClient>>,
        watermark: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            rerank: config.rerank.clone(),
            embed_batch: config.embedding.batch_size,
            upload_dir: config.source.upload_dir.clone(),
            source,
            vector,
            embedder,
            completion,
            keyword: RwLock::new(KeywordIndex::new()),
            watermark,
        }
    }

    /// Wire the production components described by `config`.
    ///
    /// Backend and embedder construction validate connectivity and
    /// credentials here, at startup, so misconfiguration surfaces before
    /// any traffic is served.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let source: Arc<dyn SourceStore> =
            Arc::new(SqliteSourceStore::connect(&config.source).await?);
        let vector: Arc<dyn VectorBackend> = Arc::from(create_backend(&config.vector).await?);
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        let completion: Option<Arc<dyn CompletionClient>> = if config.rerank.enabled {
            Some(Arc::new(HttpCompletionClient::new(&config.rerank)?))
        } else {
            None
        };
        let watermark: Arc<dyn WatermarkStore> =
            Arc::new(FileWatermark::new(config.watermark.path.clone()));

        Ok(Self::new(
            config, source, vector, embedder, completion, watermark,
        ))
    }

    /// Number of chunks currently in the keyword index.
    pub async fn keyword_index_len(&self) -> usize {
        self.keyword.read().await.len()
    }

    /// Rerank hybrid candidates with the configured LLM.
    ///
    /// Called by the orchestration layer when its reranking feature flag
    /// is set. Without a configured completion client this degrades to
    /// plain truncation; with one, any LLM failure degrades the same way
    /// inside [`rerank::rerank_documents`]. Never returns an error.
    pub async fn rerank_documents(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
        top_k: usize,
    ) -> Vec<ScoredChunk> {
        match &self.completion {
            Some(client) => {
                rerank::rerank_documents(client.as_ref(), &self.rerank, query, candidates, top_k)
                    .await
            }
            None => {
                tracing::debug!("rerank requested but no completion client configured");
                candidates.into_iter().take(top_k).collect()
            }
        }
    }

    /// True when sync should produce embeddings (an embedding provider is
    /// configured). Keyword-only deployments run with `disabled`.
    pub(crate) fn embeddings_enabled(&self) -> bool {
        self.embedder.dims() > 0
    }
}
