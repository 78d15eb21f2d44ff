use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    pub watermark: WatermarkConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Path to the CRUD application's SQLite database (read-only here).
    pub db_path: PathBuf,
    /// Directory holding uploaded document files.
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Token budget for headline and image-caption chunks.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Token budget for document page chunks (paginated extracts are
    /// denser, so they get a smaller budget).
    #[serde(default = "default_document_max_tokens")]
    pub document_max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            document_max_tokens: default_document_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    400
}
fn default_document_max_tokens() -> usize {
    256
}
fn default_overlap() -> usize {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// When false, `hybrid_search` always delegates to vector-only search.
    #[serde(default = "default_true")]
    pub hybrid_enabled: bool,
    /// RRF constant: each result at rank `r` contributes `1 / (r + rrf_k)`.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    /// Vector results below this cosine similarity are discarded before fusion.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_enabled: default_true(),
            rrf_k: default_rrf_k(),
            min_similarity: default_min_similarity(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_rrf_k() -> usize {
    60
}
fn default_min_similarity() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hf"` (TEI-style inference server), `"openai"`, or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Pooling strategy the serving model was exported with (`"mean"` or
    /// `"cls"`). Recorded so a rebuilt index can be checked against the
    /// vectors already stored: mixing pooling strategies in one collection
    /// silently corrupts similarity semantics, and the engine does not
    /// detect it at query time. Changing this requires `kbctl init`.
    #[serde(default = "default_pooling")]
    pub pooling: String,
    /// L2-normalize embeddings server-side. Same rebuild caveat as `pooling`.
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_embedding_model(),
            dims: default_dims(),
            pooling: default_pooling(),
            normalize: default_true(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "intfloat/multilingual-e5-small".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_pooling() -> String {
    "mean".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `"chroma"`, `"weaviate"`, or `"none"`.
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_collection() -> String {
    "campus_kb".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    /// Per-candidate character budget in the scoring prompt.
    #[serde(default = "default_candidate_chars")]
    pub max_candidate_chars: usize,
    #[serde(default = "default_rerank_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            model: default_rerank_model(),
            max_candidate_chars: default_candidate_chars(),
            timeout_secs: default_rerank_timeout_secs(),
        }
    }
}

fn default_rerank_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_candidate_chars() -> usize {
    500
}
fn default_rerank_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatermarkConfig {
    /// File holding the last-successful-sync timestamp (RFC 3339).
    pub path: PathBuf,
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 || config.chunking.document_max_tokens == 0 {
        anyhow::bail!("chunking token budgets must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.document_max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be smaller than the smallest token budget");
    }

    // Validate retrieval
    if config.retrieval.rrf_k == 0 {
        anyhow::bail!("retrieval.rrf_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_similarity) {
        anyhow::bail!("retrieval.min_similarity must be in [0.0, 1.0]");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hf" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hf, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims == 0 {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider == "hf" && config.embedding.base_url.is_none() {
            anyhow::bail!("embedding.base_url is required for the hf provider");
        }
        match config.embedding.pooling.as_str() {
            "mean" | "cls" => {}
            other => anyhow::bail!("Unknown pooling strategy: '{}'. Must be mean or cls.", other),
        }
    }

    // Validate vector backend
    match config.vector.backend.as_str() {
        "none" => {}
        "chroma" | "weaviate" => {
            if config.vector.url.is_none() {
                anyhow::bail!(
                    "vector.url is required for the {} backend",
                    config.vector.backend
                );
            }
            if !config.embedding.is_enabled() {
                anyhow::bail!(
                    "vector.backend = '{}' requires a configured embedding provider",
                    config.vector.backend
                );
            }
        }
        other => anyhow::bail!(
            "Unknown vector backend: '{}'. Must be chroma, weaviate, or none.",
            other
        ),
    }

    // Validate rerank
    if config.rerank.enabled && config.rerank.base_url.is_none() {
        anyhow::bail!("rerank.base_url is required when rerank.enabled = true");
    }

    Ok(config)
}
