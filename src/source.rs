//! Read-only adapter over the source-of-truth content store.
//!
//! The CRUD application owns articles ("headlines"), uploaded documents,
//! and images, and this engine only ever asks one question of it: what
//! changed since timestamp T, per record kind, **including** records
//! that were deactivated, since those need their chunks deleted.
//!
//! [`SqliteSourceStore`] reads the application's SQLite database directly;
//! [`MemorySourceStore`] backs tests and embedding-free demos.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::RwLock as StdRwLock;

use crate::config::SourceConfig;
use crate::models::{AccessLevel, SourceKind, SourceRecord};

/// "Find records changed since T" for each of the three record kinds.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn headlines_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>>;
    async fn documents_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>>;
    async fn images_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>>;
}

// ============ SQLite ============

/// Source store reading the CRUD application's SQLite database.
///
/// The schema belongs to the application; this adapter never writes and
/// never migrates. `updated_at` columns are Unix timestamps,
/// `access_level` columns are the lowercase level names.
pub struct SqliteSourceStore {
    pool: SqlitePool,
}

impl SqliteSourceStore {
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite:{}",
            config.db_path.display()
        ))?
        .read_only(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Cannot open source database {}", config.db_path.display()))?;

        Ok(Self { pool })
    }

    /// Map the columns shared by all three tables; `text_column` names the
    /// body column (`None` for documents, whose text comes from the stored
    /// file during sync).
    fn row_to_record(
        row: &sqlx::sqlite::SqliteRow,
        kind: SourceKind,
        text_column: Option<&str>,
    ) -> Result<SourceRecord> {
        let level: String = row.try_get("access_level")?;
        let updated_at: i64 = row.try_get("updated_at")?;
        let text: Option<String> = match text_column {
            Some(column) => row.try_get(column)?,
            None => None,
        };

        Ok(SourceRecord {
            id: row.try_get("id")?,
            kind,
            title: row.try_get("title")?,
            text: text.unwrap_or_default(),
            access_level: level.parse::<AccessLevel>()?,
            updated_at: DateTime::from_timestamp(updated_at, 0)
                .ok_or_else(|| anyhow::anyhow!("Invalid updated_at timestamp: {}", updated_at))?,
            is_active: row.try_get("is_active")?,
            file_path: None,
            file_type: None,
        })
    }
}

#[async_trait]
impl SourceStore for SqliteSourceStore {
    async fn headlines_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(
            "SELECT id, title, content, access_level, updated_at, is_active \
             FROM headlines WHERE updated_at > ? ORDER BY id",
        )
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_record(row, SourceKind::Headline, Some("content")))
            .collect()
    }

    async fn documents_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(
            "SELECT id, title, file_path, file_type, access_level, updated_at, is_active \
             FROM documents WHERE updated_at > ? ORDER BY id",
        )
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let mut record = Self::row_to_record(row, SourceKind::Document, None)?;
                record.file_path = row.try_get("file_path")?;
                let file_type: Option<String> = row.try_get("file_type")?;
                record.file_type = file_type.map(|t| t.to_lowercase());
                Ok(record)
            })
            .collect()
    }

    async fn images_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(
            "SELECT id, title, caption, access_level, updated_at, is_active \
             FROM images WHERE updated_at > ? ORDER BY id",
        )
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_record(row, SourceKind::Image, Some("caption")))
            .collect()
    }
}

// ============ In-memory ============

/// In-memory source store for tests.
#[derive(Default)]
pub struct MemorySourceStore {
    records: StdRwLock<Vec<SourceRecord>>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, keyed by `(kind, id)`.
    pub fn upsert(&self, record: SourceRecord) {
        let mut records = self.records.write().unwrap();
        records.retain(|r| !(r.kind == record.kind && r.id == record.id));
        records.push(record);
    }

    /// Hard-delete a record, as an editor purging it entirely would.
    /// Removed records no longer appear in any changed-since query.
    pub fn remove(&self, kind: SourceKind, id: i64) {
        let mut records = self.records.write().unwrap();
        records.retain(|r| !(r.kind == kind && r.id == id));
    }

    fn since(&self, kind: SourceKind, since: DateTime<Utc>) -> Vec<SourceRecord> {
        let records = self.records.read().unwrap();
        records
            .iter()
            .filter(|r| r.kind == kind && r.updated_at > since)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn headlines_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        Ok(self.since(SourceKind::Headline, since))
    }

    async fn documents_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        Ok(self.since(SourceKind::Document, since))
    }

    async fn images_since(&self, since: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        Ok(self.since(SourceKind::Image, since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, kind: SourceKind, updated_at: i64) -> SourceRecord {
        SourceRecord {
            id,
            kind,
            title: None,
            text: "text".to_string(),
            access_level: AccessLevel::Public,
            updated_at: Utc.timestamp_opt(updated_at, 0).unwrap(),
            is_active: true,
            file_path: None,
            file_type: None,
        }
    }

    #[tokio::test]
    async fn test_since_filters_strictly_greater() {
        let store = MemorySourceStore::new();
        store.upsert(record(1, SourceKind::Headline, 100));
        store.upsert(record(2, SourceKind::Headline, 200));

        let cutoff = Utc.timestamp_opt(100, 0).unwrap();
        let changed = store.headlines_since(cutoff).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, 2);
    }

    #[tokio::test]
    async fn test_inactive_records_still_reported() {
        let store = MemorySourceStore::new();
        let mut r = record(1, SourceKind::Image, 500);
        r.is_active = false;
        store.upsert(r);

        let changed = store
            .images_since(Utc.timestamp_opt(0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert!(!changed[0].is_active);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = MemorySourceStore::new();
        store.upsert(record(1, SourceKind::Headline, 100));
        let mut updated = record(1, SourceKind::Headline, 300);
        updated.text = "changed".to_string();
        store.upsert(updated);

        let changed = store
            .headlines_since(Utc.timestamp_opt(0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].text, "changed");
    }

    #[tokio::test]
    async fn test_kinds_are_separate() {
        let store = MemorySourceStore::new();
        store.upsert(record(1, SourceKind::Headline, 100));
        store.upsert(record(1, SourceKind::Image, 100));

        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(store.headlines_since(epoch).await.unwrap().len(), 1);
        assert_eq!(store.images_since(epoch).await.unwrap().len(), 1);
        assert!(store.documents_since(epoch).await.unwrap().is_empty());
    }
}
