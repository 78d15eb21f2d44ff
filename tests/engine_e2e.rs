//! End-to-end tests over the full engine with in-memory components.
//!
//! The source store, vector backend, and watermark are the library's own
//! in-memory implementations; the embedder is a deterministic
//! bag-of-words hasher so similarity behaves sensibly without a model.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use campus_retrieval::config::Config;
use campus_retrieval::embedding::Embedder;
use campus_retrieval::models::{
    AccessFilter, AccessLevel, SourceKind, SourceRecord,
};
use campus_retrieval::source::MemorySourceStore;
use campus_retrieval::vector::MemoryBackend;
use campus_retrieval::watermark::{MemoryWatermark, WatermarkStore};
use campus_retrieval::RetrievalEngine;

const DIMS: usize = 256;

/// Deterministic bag-of-words embedder.
///
/// Every distinct token gets its own dimension (first-seen assignment),
/// so unrelated texts are exactly orthogonal and shared vocabulary gives
/// a positive cosine.
#[derive(Default)]
struct HashEmbedder {
    vocabulary: std::sync::Mutex<std::collections::HashMap<String, usize>>,
}

impl HashEmbedder {
    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vocabulary = self.vocabulary.lock().unwrap();
        let mut vector = vec![0.0f32; DIMS];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.chars().count() > 1 {
                let next = vocabulary.len() % DIMS;
                let dim = *vocabulary.entry(token.to_string()).or_insert(next);
                vector[dim] += 1.0;
            }
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words-test"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Embedder that always fails, for failure-path tests.
struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unreachable")
    }
}

fn test_config() -> Config {
    let toml = r#"
[source]
db_path = "/unused/app.sqlite"

[chunking]
max_tokens = 100
document_max_tokens = 64
overlap_tokens = 10

[retrieval]
min_similarity = 0.05

[vector]
backend = "none"

[watermark]
path = "/unused/last_sync"
"#;
    toml::from_str(toml).unwrap()
}

struct Harness {
    source: Arc<MemorySourceStore>,
    backend: Arc<MemoryBackend>,
    watermark: Arc<MemoryWatermark>,
    engine: RetrievalEngine,
}

fn build_harness(embedder: Arc<dyn Embedder>) -> Harness {
    let source = Arc::new(MemorySourceStore::new());
    let backend = Arc::new(MemoryBackend::new());
    let watermark = Arc::new(MemoryWatermark::new());
    let engine = RetrievalEngine::new(
        &test_config(),
        source.clone(),
        backend.clone(),
        embedder,
        None,
        watermark.clone(),
    );
    Harness {
        source,
        backend,
        watermark,
        engine,
    }
}

fn headline(id: i64, title: &str, text: &str, level: AccessLevel, updated_at: i64) -> SourceRecord {
    SourceRecord {
        id,
        kind: SourceKind::Headline,
        title: Some(title.to_string()),
        text: text.to_string(),
        access_level: level,
        updated_at: Utc.timestamp_opt(updated_at, 0).unwrap(),
        is_active: true,
        file_path: None,
        file_type: None,
    }
}

#[tokio::test]
async fn test_end_to_end_access_filtering() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "Semester start",
        "The semester test schedule is published on the campus portal.",
        AccessLevel::Public,
        1000,
    ));
    h.source.upsert(headline(
        2,
        "Staff briefing",
        "Internal test results for the staff restructuring are available.",
        AccessLevel::Employee,
        1000,
    ));

    let stats = h.engine.sync_from_db().await.unwrap();
    assert_eq!(stats.headlines, 2);
    assert!(stats.total_chunks >= 2);

    let public = AccessFilter::new(vec![AccessLevel::Public]);
    let results = h.engine.hybrid_search("test schedule", 5, &public).await;
    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(result.metadata.access_level, AccessLevel::Public);
        assert_eq!(result.metadata.source_id, 1);
    }

    // A query matching nothing in the public article yields an empty
    // list, not an error and not employee-only content.
    let results = h
        .engine
        .hybrid_search("zzzzunknownterm qqqmissing", 5, &public)
        .await;
    assert!(results.is_empty());

    // The employee filter sees both articles.
    let employee = AccessFilter::up_to(AccessLevel::Employee);
    let results = h.engine.hybrid_search("test", 5, &employee).await;
    assert!(results
        .iter()
        .any(|r| r.metadata.access_level == AccessLevel::Employee));
}

#[tokio::test]
async fn test_idempotent_resync() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "Cafeteria",
        "New cafeteria menu for the winter semester.",
        AccessLevel::Public,
        1000,
    ));

    let first = h.engine.sync_from_db().await.unwrap();
    assert!(first.total_chunks > 0);
    let count_after_first = h.backend.len();

    // Nothing changed: the second pass finds no records and writes no
    // chunks; the backend count is unchanged.
    let second = h.engine.sync_from_db().await.unwrap();
    assert_eq!(second.total_chunks, 0);
    assert_eq!(h.backend.len(), count_after_first);
}

#[tokio::test]
async fn test_update_replaces_chunks() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "Opening hours",
        "The library opens at eight.",
        AccessLevel::Public,
        1000,
    ));
    h.engine.sync_from_db().await.unwrap();
    let count = h.backend.len();

    // Edit the record after the first pass; its updated_at moves past
    // the stored watermark.
    let future = Utc::now().timestamp() + 60;
    h.source.upsert(headline(
        1,
        "Opening hours",
        "The library opens at nine after renovation.",
        AccessLevel::Public,
        future,
    ));
    h.engine.sync_from_db().await.unwrap();

    // Same chunk count (replaced, not accumulated), new content.
    assert_eq!(h.backend.len(), count);
    let all = AccessFilter::up_to(AccessLevel::Admin);
    let results = h.engine.similarity_search("library renovation", 5, &all).await;
    assert!(results.iter().any(|r| r.content.contains("nine")));
    assert!(!results.iter().any(|r| r.content.contains("eight")));
}

#[tokio::test]
async fn test_deactivated_record_chunks_removed() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "Old notice",
        "This notice is about parking permits.",
        AccessLevel::Public,
        1000,
    ));
    h.engine.sync_from_db().await.unwrap();
    assert!(h.backend.len() > 0);

    let mut archived = headline(
        1,
        "Old notice",
        "This notice is about parking permits.",
        AccessLevel::Public,
        Utc::now().timestamp() + 60,
    );
    archived.is_active = false;
    h.source.upsert(archived);
    h.engine.sync_from_db().await.unwrap();

    // The delete ran even though the record is no longer active.
    assert_eq!(h.backend.len(), 0);
}

#[tokio::test]
async fn test_watermark_advances_only_on_success() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "A",
        "First article body.",
        AccessLevel::Public,
        1000,
    ));

    assert!(h.watermark.load().await.unwrap().is_none());
    let before = Utc::now();
    h.engine.sync_from_db().await.unwrap();
    let after_success = h.watermark.load().await.unwrap().unwrap();
    assert!(after_success >= before);

    // A failing pass must leave the watermark untouched.
    let failing = build_harness(Arc::new(FailingEmbedder));
    failing.source.upsert(headline(
        1,
        "A",
        "First article body.",
        AccessLevel::Public,
        1000,
    ));
    assert!(failing.engine.sync_from_db().await.is_err());
    assert!(failing.watermark.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unreadable_document_is_skipped_not_fatal() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(SourceRecord {
        id: 1,
        kind: SourceKind::Document,
        title: Some("Broken upload".to_string()),
        text: String::new(),
        access_level: AccessLevel::Public,
        updated_at: Utc.timestamp_opt(1000, 0).unwrap(),
        is_active: true,
        file_path: Some("/nonexistent/file.pdf".to_string()),
        file_type: Some("pdf".to_string()),
    });
    h.source.upsert(headline(
        2,
        "Healthy article",
        "Course registration opens Monday.",
        AccessLevel::Public,
        1000,
    ));

    let stats = h.engine.sync_from_db().await.unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.headlines, 1);
    assert!(stats.total_chunks > 0);
    // Pass succeeded, watermark advanced.
    assert!(h.watermark.load().await.unwrap().is_some());
}

#[tokio::test]
async fn test_document_sync_from_stored_file() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("regulations.txt");
    std::fs::write(
        &file_path,
        "Exam regulations for the bachelor programme.\n\nRetakes are possible twice.",
    )
    .unwrap();

    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(SourceRecord {
        id: 9,
        kind: SourceKind::Document,
        title: Some("Exam regulations".to_string()),
        text: String::new(),
        access_level: AccessLevel::Intern,
        updated_at: Utc.timestamp_opt(1000, 0).unwrap(),
        is_active: true,
        file_path: Some(file_path.display().to_string()),
        file_type: Some("txt".to_string()),
    });

    let stats = h.engine.sync_from_db().await.unwrap();
    assert_eq!(stats.documents_by_type.get("txt"), Some(&1));
    assert!(stats.total_chunks > 0);

    let filter = AccessFilter::up_to(AccessLevel::Intern);
    let results = h.engine.hybrid_search("exam regulations", 5, &filter).await;
    assert!(!results.is_empty());
    assert_eq!(results[0].metadata.source_kind, SourceKind::Document);
    assert_eq!(results[0].metadata.file_type.as_deref(), Some("txt"));
    assert_eq!(results[0].metadata.page_number, Some(1));
}

#[tokio::test]
async fn test_init_discards_hard_deleted_records() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "Keep",
        "Semester dates announcement.",
        AccessLevel::Public,
        1000,
    ));
    h.source.upsert(headline(
        2,
        "Purge",
        "Outdated construction notice.",
        AccessLevel::Public,
        1000,
    ));
    h.engine.init_vector_db().await.unwrap();
    let full_count = h.backend.len();
    assert!(full_count >= 2);

    // Hard-delete record 2: it will never appear in a changed-since
    // query, so only a full rebuild can get rid of its chunks.
    h.source.remove(SourceKind::Headline, 2);
    h.engine.sync_from_db().await.unwrap();
    assert_eq!(h.backend.len(), full_count, "incremental sync cannot see it");

    h.engine.init_vector_db().await.unwrap();
    assert!(h.backend.len() < full_count);
    let all = AccessFilter::up_to(AccessLevel::Admin);
    let results = h.engine.hybrid_search("construction notice", 5, &all).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_drop_clears_everything() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "A",
        "Something searchable here.",
        AccessLevel::Public,
        1000,
    ));
    h.engine.sync_from_db().await.unwrap();
    assert!(h.backend.len() > 0);
    assert!(h.engine.keyword_index_len().await > 0);

    h.engine.drop_vector_db().await.unwrap();
    assert_eq!(h.backend.len(), 0);
    assert_eq!(h.engine.keyword_index_len().await, 0);
}

#[tokio::test]
async fn test_hybrid_search_never_errors() {
    // Engine whose embedder is down and whose keyword index is empty:
    // the caller still gets a plain empty list.
    let h = build_harness(Arc::new(FailingEmbedder));
    let all = AccessFilter::up_to(AccessLevel::Admin);
    let results = h.engine.hybrid_search("anything", 5, &all).await;
    assert!(results.is_empty());

    // Empty query is not an error either.
    let h = build_harness(Arc::new(HashEmbedder::default()));
    let results = h.engine.hybrid_search("   ", 5, &all).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_rerank_without_client_truncates() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "Sports",
        "University sports courses start in October with registration online.",
        AccessLevel::Public,
        1000,
    ));
    h.engine.sync_from_db().await.unwrap();

    let all = AccessFilter::up_to(AccessLevel::Admin);
    let candidates = h.engine.hybrid_search("sports courses", 10, &all).await;
    let reranked = h
        .engine
        .rerank_documents("sports courses", candidates.clone(), 1)
        .await;
    assert_eq!(reranked.len(), candidates.len().min(1));
}

#[tokio::test]
async fn test_access_level_change_applies_on_next_touch() {
    let h = build_harness(Arc::new(HashEmbedder::default()));
    h.source.upsert(headline(
        1,
        "Budget",
        "Faculty budget allocation details.",
        AccessLevel::Public,
        1000,
    ));
    h.engine.sync_from_db().await.unwrap();

    let public = AccessFilter::new(vec![AccessLevel::Public]);
    assert!(!h.engine.hybrid_search("budget", 5, &public).await.is_empty());

    // Tighten the record to manager-only and bump updated_at; after the
    // next sync the public view no longer includes it.
    h.source.upsert(headline(
        1,
        "Budget",
        "Faculty budget allocation details.",
        AccessLevel::Manager,
        Utc::now().timestamp() + 60,
    ));
    h.engine.sync_from_db().await.unwrap();

    let results = h.engine.similarity_search("budget", 5, &public).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_access_level_parse_used_by_cli() {
    assert_eq!(
        AccessLevel::from_str("employee").unwrap(),
        AccessLevel::Employee
    );
}
