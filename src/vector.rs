//! Vector store abstraction and backends.
//!
//! The [`VectorBackend`] trait is the retrieval engine's only view of the
//! similarity-search infrastructure: add, delete-by-filter, query, clear.
//! Backend choice and connection details are configuration, not algorithm.
//!
//! Implementations:
//! - **[`ChromaBackend`]** — Chroma over REST, cosine space.
//! - **[`WeaviateBackend`]** — Weaviate over REST + GraphQL `nearVector`.
//! - **[`NullBackend`]** — no-op; for keyword-only deployments.
//! - **[`MemoryBackend`]** — brute-force cosine over an in-process list;
//!   used by tests and available as a zero-infrastructure fallback.
//!
//! Backends are selected once at construction via [`create_backend`];
//! connection and collection resolution happen there, so a missing URL or
//! unreachable backend fails at startup instead of mid-query.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use crate::config::VectorConfig;
use crate::models::{AccessFilter, Chunk, ChunkMetadata, SourceKind};

/// Conjunction of exact-match predicates scoping a delete to the chunks
/// of one source record.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteFilter {
    pub source_kind: SourceKind,
    pub source_id: i64,
}

/// Uniform interface over a pluggable similarity-search backend.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Backend identifier for logs (`"chroma"`, `"weaviate"`, …).
    fn name(&self) -> &str;

    /// Insert chunks with their embeddings. `chunks` and `vectors` are
    /// parallel slices of equal length.
    async fn add_documents(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    /// Delete every chunk matching the filter.
    async fn delete(&self, filter: &DeleteFilter) -> Result<()>;

    /// Nearest-neighbour query, access-filtered, scored by cosine
    /// similarity (higher is closer), best first.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<(Chunk, f32)>>;

    /// Physically remove all stored chunks.
    async fn clear(&self) -> Result<()>;
}

/// Create the configured [`VectorBackend`].
///
/// `"chroma"` and `"weaviate"` connect (and create their collection if
/// needed) before returning, so configuration errors surface during
/// initialization rather than as wrong-looking query results later.
pub async fn create_backend(config: &VectorConfig) -> Result<Box<dyn VectorBackend>> {
    match config.backend.as_str() {
        "none" => Ok(Box::new(NullBackend)),
        "chroma" => Ok(Box::new(ChromaBackend::connect(config).await?)),
        "weaviate" => Ok(Box::new(WeaviateBackend::connect(config).await?)),
        other => bail!("Unknown vector backend: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ============ Null Backend ============

/// Backend for deployments that run keyword search only.
///
/// Accepts writes silently and returns no results, so the sync engine and
/// hybrid retriever run unchanged.
pub struct NullBackend;

#[async_trait]
impl VectorBackend for NullBackend {
    fn name(&self) -> &str {
        "none"
    }

    async fn add_documents(&self, _chunks: &[Chunk], _vectors: &[Vec<f32>]) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _filter: &DeleteFilter) -> Result<()> {
        Ok(())
    }

    async fn query(
        &self,
        _vector: &[f32],
        _k: usize,
        _filter: &AccessFilter,
    ) -> Result<Vec<(Chunk, f32)>> {
        Ok(Vec::new())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

// ============ In-memory Backend ============

struct StoredVector {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Brute-force in-process backend.
///
/// Linear cosine scan over all stored vectors. Fine for tests and small
/// single-node deployments; not meant for large corpora.
#[derive(Default)]
pub struct MemoryBackend {
    entries: StdRwLock<Vec<StoredVector>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks (test helper).
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn add_documents(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector length mismatch: {} vs {}",
                chunks.len(),
                vectors.len()
            );
        }
        let mut entries = self.entries.write().unwrap();
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            entries.push(StoredVector {
                chunk: chunk.clone(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn delete(&self, filter: &DeleteFilter) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|e| {
            e.chunk.metadata.source_kind != filter.source_kind
                || e.chunk.metadata.source_id != filter.source_id
        });
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<(Chunk, f32)>> {
        let entries = self.entries.read().unwrap();
        let mut scored: Vec<(Chunk, f32)> = entries
            .iter()
            .filter(|e| filter.allows(e.chunk.metadata.access_level))
            .map(|e| (e.chunk.clone(), cosine_similarity(vector, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }
}

// ============ Chroma Backend ============

/// Chroma REST backend.
///
/// The collection is created (cosine space) on connect if missing; its id
/// is re-resolved after `clear`, which drops and recreates the collection
/// rather than issuing a match-all delete.
pub struct ChromaBackend {
    base_url: String,
    collection: String,
    collection_id: StdRwLock<String>,
    client: reqwest::Client,
}

impl ChromaBackend {
    pub async fn connect(config: &VectorConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("vector.url required for chroma backend"))?
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let backend = Self {
            base_url,
            collection: config.collection.clone(),
            collection_id: StdRwLock::new(String::new()),
            client,
        };
        let id = backend.ensure_collection().await?;
        *backend.collection_id.write().unwrap() = id;
        Ok(backend)
    }

    async fn ensure_collection(&self) -> Result<String> {
        let url = format!("{}/api/v1/collections", self.base_url);
        let body = serde_json::json!({
            "name": self.collection,
            "get_or_create": true,
            "metadata": {"hnsw:space": "cosine"},
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Cannot reach chroma at {}", self.base_url))?;
        if !response.status().is_success() {
            bail!(
                "Chroma collection setup failed: HTTP {}",
                response.status()
            );
        }
        let json: serde_json::Value = response.json().await?;
        json.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Chroma response missing collection id"))
    }

    fn collection_url(&self, op: &str) -> String {
        let id = self.collection_id.read().unwrap().clone();
        format!("{}/api/v1/collections/{}/{}", self.base_url, id, op)
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Chroma error HTTP {}: {}", status, text);
        }
        Ok(response.json().await.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl VectorBackend for ChromaBackend {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn add_documents(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector length mismatch: {} vs {}",
                chunks.len(),
                vectors.len()
            );
        }

        let ids: Vec<String> = chunks
            .iter()
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();
        let documents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let metadatas: Vec<serde_json::Value> = chunks
            .iter()
            .map(|c| serde_json::to_value(&c.metadata))
            .collect::<Result<_, _>>()?;

        let body = serde_json::json!({
            "ids": ids,
            "embeddings": vectors,
            "documents": documents,
            "metadatas": metadatas,
        });
        self.post(&self.collection_url("add"), &body).await?;
        Ok(())
    }

    async fn delete(&self, filter: &DeleteFilter) -> Result<()> {
        let body = serde_json::json!({
            "where": {"$and": [
                {"source_kind": {"$eq": filter.source_kind.as_str()}},
                {"source_id": {"$eq": filter.source_id}},
            ]}
        });
        self.post(&self.collection_url("delete"), &body).await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<(Chunk, f32)>> {
        let levels: Vec<&str> = filter.levels().iter().map(|l| l.as_str()).collect();
        let body = serde_json::json!({
            "query_embeddings": [vector],
            "n_results": k,
            "where": {"access_level": {"$in": levels}},
            "include": ["documents", "metadatas", "distances"],
        });
        let json = self.post(&self.collection_url("query"), &body).await?;

        let documents = first_row(&json, "documents")?;
        let metadatas = first_row(&json, "metadatas")?;
        let distances = first_row(&json, "distances")?;

        let mut results = Vec::with_capacity(documents.len());
        for ((doc, meta), dist) in documents.iter().zip(metadatas).zip(distances) {
            let content = doc.as_str().unwrap_or_default().to_string();
            let metadata: ChunkMetadata = serde_json::from_value(meta.clone())
                .with_context(|| "Chroma returned malformed chunk metadata")?;
            // Cosine-space distance: similarity = 1 − distance.
            let similarity = 1.0 - dist.as_f64().unwrap_or(1.0) as f32;
            results.push((Chunk::new(content, metadata), similarity));
        }
        Ok(results)
    }

    async fn clear(&self) -> Result<()> {
        let url = format!(
            "{}/api/v1/collections/{}",
            self.base_url, self.collection
        );
        let response = self.client.delete(&url).send().await?;
        // 404 just means there was nothing to clear.
        if !response.status().is_success() && response.status().as_u16() != 404 {
            bail!("Chroma collection delete failed: HTTP {}", response.status());
        }
        let id = self.ensure_collection().await?;
        *self.collection_id.write().unwrap() = id;
        Ok(())
    }
}

/// Pull the first (and only) row out of Chroma's nested query response.
fn first_row<'a>(json: &'a serde_json::Value, key: &str) -> Result<&'a Vec<serde_json::Value>> {
    json.get(key)
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|row| row.as_array())
        .ok_or_else(|| anyhow::anyhow!("Chroma response missing {}", key))
}

// ============ Weaviate Backend ============

/// Weaviate REST/GraphQL backend.
///
/// Chunk metadata is mirrored into object properties so deletes and
/// access filters can run server-side (`ContainsAny` on `access_level`).
pub struct WeaviateBackend {
    base_url: String,
    class: String,
    client: reqwest::Client,
}

impl WeaviateBackend {
    pub async fn connect(config: &VectorConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("vector.url required for weaviate backend"))?
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // Weaviate class names are capitalized.
        let mut chars = config.collection.chars();
        let class = match chars.next() {
            Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()),
            None => bail!("vector.collection must not be empty"),
        };

        let backend = Self {
            base_url,
            class,
            client,
        };
        backend.ensure_class().await?;
        Ok(backend)
    }

    async fn ensure_class(&self) -> Result<()> {
        let url = format!("{}/v1/schema/{}", self.base_url, self.class);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Cannot reach weaviate at {}", self.base_url))?;
        if response.status().is_success() {
            return Ok(());
        }

        let create_url = format!("{}/v1/schema", self.base_url);
        let body = serde_json::json!({
            "class": self.class,
            "vectorizer": "none",
            "properties": [
                {"name": "content", "dataType": ["text"]},
                {"name": "source_kind", "dataType": ["text"]},
                {"name": "source_id", "dataType": ["int"]},
                {"name": "access_level", "dataType": ["text"]},
                {"name": "chunk_index", "dataType": ["int"]},
                {"name": "file_type", "dataType": ["text"]},
                {"name": "page_number", "dataType": ["int"]},
                {"name": "content_hash", "dataType": ["text"]},
            ],
        });
        let response = self.client.post(&create_url).json(&body).send().await?;
        if !response.status().is_success() {
            bail!(
                "Weaviate class setup failed: HTTP {}",
                response.status()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for WeaviateBackend {
    fn name(&self) -> &str {
        "weaviate"
    }

    async fn add_documents(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        if chunks.len() != vectors.len() {
            bail!(
                "chunk/vector length mismatch: {} vs {}",
                chunks.len(),
                vectors.len()
            );
        }

        let objects: Vec<serde_json::Value> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| {
                let mut properties = serde_json::to_value(&chunk.metadata)
                    .unwrap_or(serde_json::json!({}));
                if let Some(map) = properties.as_object_mut() {
                    map.insert(
                        "content".to_string(),
                        serde_json::Value::String(chunk.content.clone()),
                    );
                }
                serde_json::json!({
                    "class": self.class,
                    "properties": properties,
                    "vector": vector,
                })
            })
            .collect();

        let url = format!("{}/v1/batch/objects", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({"objects": objects}))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("Weaviate batch insert failed: HTTP {}", response.status());
        }
        Ok(())
    }

    async fn delete(&self, filter: &DeleteFilter) -> Result<()> {
        let url = format!("{}/v1/batch/objects", self.base_url);
        let body = serde_json::json!({
            "match": {
                "class": self.class,
                "where": {
                    "operator": "And",
                    "operands": [
                        {"operator": "Equal", "path": ["source_kind"],
                         "valueText": filter.source_kind.as_str()},
                        {"operator": "Equal", "path": ["source_id"],
                         "valueInt": filter.source_id},
                    ]
                }
            }
        });
        let response = self.client.delete(&url).json(&body).send().await?;
        if !response.status().is_success() {
            bail!("Weaviate batch delete failed: HTTP {}", response.status());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &AccessFilter,
    ) -> Result<Vec<(Chunk, f32)>> {
        let levels: Vec<String> = filter
            .levels()
            .iter()
            .map(|l| format!("\"{}\"", l.as_str()))
            .collect();
        let vector_json = serde_json::to_string(vector)?;
        let query = format!(
            "{{ Get {{ {class}(nearVector: {{vector: {vector}}}, limit: {k}, \
             where: {{operator: ContainsAny, path: [\"access_level\"], valueText: [{levels}]}}) \
             {{ content source_kind source_id access_level chunk_index file_type page_number \
             content_hash _additional {{ certainty }} }} }} }}",
            class = self.class,
            vector = vector_json,
            k = k,
            levels = levels.join(", "),
        );

        let url = format!("{}/v1/graphql", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({"query": query}))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("Weaviate query failed: HTTP {}", response.status());
        }
        let json: serde_json::Value = response.json().await?;

        let objects = json
            .pointer(&format!("/data/Get/{}", self.class))
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("Weaviate response missing Get.{}", self.class))?;

        let mut results = Vec::with_capacity(objects.len());
        for object in objects {
            let content = object
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let metadata: ChunkMetadata = serde_json::from_value(object.clone())
                .with_context(|| "Weaviate returned malformed chunk properties")?;
            let certainty = object
                .pointer("/_additional/certainty")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0) as f32;
            // certainty = (1 + cosine) / 2
            let similarity = certainty * 2.0 - 1.0;
            results.push((Chunk::new(content, metadata), similarity));
        }
        Ok(results)
    }

    async fn clear(&self) -> Result<()> {
        let url = format!("{}/v1/schema/{}", self.base_url, self.class);
        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            bail!("Weaviate class delete failed: HTTP {}", response.status());
        }
        self.ensure_class().await
    }
}
