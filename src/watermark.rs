//! Persisted sync watermark.
//!
//! A single timestamp marking the cutoff of the last successful sync
//! pass: read when a pass starts, written only after the whole pass
//! succeeds. A failed pass leaves the watermark untouched, so the next
//! invocation retries from the same cutoff; the delete-then-insert
//! discipline in the sync engine makes that repeat safe.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::RwLock as StdRwLock;

/// Durable cell holding one RFC 3339 timestamp.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// The last successful sync cutoff; `None` means never synced.
    async fn load(&self) -> Result<Option<DateTime<Utc>>>;
    /// Persist a new cutoff.
    async fn store(&self, ts: DateTime<Utc>) -> Result<()>;
}

/// File-backed watermark: one RFC 3339 line.
pub struct FileWatermark {
    path: PathBuf,
}

impl FileWatermark {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl WatermarkStore for FileWatermark {
    async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read watermark file {}", self.path.display()))?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let ts = DateTime::parse_from_rfc3339(trimmed)
            .with_context(|| format!("Malformed watermark timestamp: {}", trimmed))?;
        Ok(Some(ts.with_timezone(&Utc)))
    }

    async fn store(&self, ts: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, ts.to_rfc3339())
            .await
            .with_context(|| format!("Failed to write watermark file {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory watermark for tests.
#[derive(Default)]
pub struct MemoryWatermark {
    value: StdRwLock<Option<DateTime<Utc>>>,
}

impl MemoryWatermark {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermark {
    async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.value.read().unwrap())
    }

    async fn store(&self, ts: DateTime<Utc>) -> Result<()> {
        *self.value.write().unwrap() = Some(ts);
        Ok(())
    }
}
