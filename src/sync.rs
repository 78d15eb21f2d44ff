//! Sync engine: keeps the vector store and keyword index consistent with
//! the source-of-truth content store.
//!
//! A sync pass asks the source store for everything changed since the
//! persisted watermark and, per record, first deletes that record's
//! existing chunks from the vector store (unconditionally, so a
//! deactivated record cannot keep serving stale passages) and then, only
//! if the record is still active, re-chunks, re-embeds, and re-inserts
//! its current content. The watermark advances only after the whole pass
//! succeeds, which makes a failed pass retry itself from the same cutoff
//! on the next invocation; delete-then-insert per record is safe to
//! repeat.
//!
//! A record whose stored file cannot be loaded or parsed is logged and
//! skipped; it never aborts the pass. Backend and embedding failures are
//! pass-wide and propagate to the operator.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::chunker;
use crate::engine::RetrievalEngine;
use crate::extract;
use crate::models::{Chunk, ChunkMetadata, SourceKind, SourceRecord, SyncStats};
use crate::vector::DeleteFilter;

impl RetrievalEngine {
    /// Incremental sync: process records changed since the last
    /// successful pass.
    pub async fn sync_from_db(&self) -> Result<SyncStats> {
        let cutoff = self
            .watermark
            .load()
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        self.sync_since(cutoff).await
    }

    /// Full resync: physically clear the vector backend and the keyword
    /// index, then rebuild from the epoch.
    ///
    /// The per-record delete step is not enough for a rebuild: records
    /// deleted outright from the source store never show up in the
    /// changed-since query, so their chunks have to go with the physical
    /// clear. The epoch reset is in-memory only; the watermark on disk is
    /// rewritten (with the pass end time) only if the rebuild succeeds.
    pub async fn init_vector_db(&self) -> Result<SyncStats> {
        self.drop_vector_db().await?;
        self.sync_since(DateTime::<Utc>::UNIX_EPOCH).await
    }

    /// Clear the vector backend and the keyword index.
    pub async fn drop_vector_db(&self) -> Result<()> {
        self.vector.clear().await?;
        self.keyword.write().await.clear();
        info!(backend = self.vector.name(), "cleared vector store and keyword index");
        Ok(())
    }

    async fn sync_since(&self, cutoff: DateTime<Utc>) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        let headlines = self.source.headlines_since(cutoff).await?;
        let documents = self.source.documents_since(cutoff).await?;
        let images = self.source.images_since(cutoff).await?;

        info!(
            headlines = headlines.len(),
            documents = documents.len(),
            images = images.len(),
            cutoff = %cutoff,
            "sync pass started"
        );

        for record in &headlines {
            self.resync_record(record, &mut stats).await?;
            stats.headlines += 1;
        }
        for record in &documents {
            self.resync_record(record, &mut stats).await?;
            let file_type = record
                .file_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *stats.documents_by_type.entry(file_type).or_insert(0) += 1;
        }
        for record in &images {
            self.resync_record(record, &mut stats).await?;
            stats.images += 1;
        }

        // Only now is the pass a success; a failure above leaves the
        // watermark at the old cutoff so the next run retries.
        self.watermark.store(Utc::now()).await?;

        info!(
            total_chunks = stats.total_chunks,
            skipped = stats.skipped,
            "sync pass finished"
        );
        Ok(stats)
    }

    /// Delete-then-reinsert one record's chunks.
    ///
    /// The delete must complete before the new chunks are inserted so
    /// stale and fresh chunks never coexist under the same source filter.
    async fn resync_record(&self, record: &SourceRecord, stats: &mut SyncStats) -> Result<()> {
        let filter = DeleteFilter {
            source_kind: record.kind,
            source_id: record.id,
        };
        self.vector.delete(&filter).await.with_context(|| {
            format!("Failed to delete chunks of {} #{}", record.kind, record.id)
        })?;

        if !record.is_active {
            return Ok(());
        }

        let chunks = match self.build_chunks(record).await {
            Ok(chunks) => chunks,
            Err(e) => {
                // One unreadable document must not sink the whole pass.
                warn!(
                    kind = %record.kind,
                    id = record.id,
                    error = %format!("{:#}", e),
                    "skipping record: content could not be loaded"
                );
                stats.skipped += 1;
                return Ok(());
            }
        };
        if chunks.is_empty() {
            return Ok(());
        }

        for batch in chunks.chunks(self.embed_batch.max(1)) {
            let vectors = if self.embeddings_enabled() {
                let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
                self.embedder.embed_documents(&texts).await.with_context(|| {
                    format!("Failed to embed chunks of {} #{}", record.kind, record.id)
                })?
            } else {
                vec![Vec::new(); batch.len()]
            };
            self.vector.add_documents(batch, &vectors).await.with_context(|| {
                format!("Failed to insert chunks of {} #{}", record.kind, record.id)
            })?;
        }

        if self.retrieval.hybrid_enabled {
            let mut index = self.keyword.write().await;
            for chunk in &chunks {
                index.add_document(chunk);
            }
        }

        stats.total_chunks += chunks.len() as u64;
        Ok(())
    }

    /// Chunk a record's current content, tagging every chunk with the
    /// record's current access level.
    async fn build_chunks(&self, record: &SourceRecord) -> Result<Vec<Chunk>> {
        let prefix = record.title.clone().unwrap_or_default();

        match record.kind {
            SourceKind::Headline | SourceKind::Image => {
                let pieces = chunker::split(
                    &record.text,
                    self.chunking.max_tokens,
                    self.chunking.overlap_tokens,
                    &prefix,
                );
                Ok(pieces
                    .into_iter()
                    .enumerate()
                    .map(|(i, content)| make_chunk(record, content, i, None))
                    .collect())
            }
            SourceKind::Document => {
                let path = record
                    .file_path
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("document record has no stored file"))?;
                let file_type = record
                    .file_type
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("document record has no file type"))?;

                let resolved = resolve_upload_path(self.upload_dir.as_deref(), path);
                let bytes = tokio::fs::read(&resolved)
                    .await
                    .with_context(|| format!("Cannot read stored file {}", resolved.display()))?;
                let pages = extract::extract_pages(&bytes, file_type)?;

                let mut chunks = Vec::new();
                let mut index = 0;
                for (page_idx, page) in pages.iter().enumerate() {
                    for content in chunker::split(
                        page,
                        self.chunking.document_max_tokens,
                        self.chunking.overlap_tokens,
                        &prefix,
                    ) {
                        chunks.push(make_chunk(record, content, index, Some(page_idx + 1)));
                        index += 1;
                    }
                }
                Ok(chunks)
            }
        }
    }
}

fn resolve_upload_path(upload_dir: Option<&std::path::Path>, stored: &str) -> PathBuf {
    let stored_path = PathBuf::from(stored);
    match upload_dir {
        Some(dir) if stored_path.is_relative() => dir.join(stored_path),
        _ => stored_path,
    }
}

fn make_chunk(
    record: &SourceRecord,
    content: String,
    chunk_index: usize,
    page_number: Option<usize>,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    Chunk {
        content,
        metadata: ChunkMetadata {
            source_kind: record.kind,
            source_id: record.id,
            access_level: record.access_level,
            chunk_index,
            file_type: record.file_type.clone(),
            page_number,
            content_hash,
        },
    }
}
