//! Core data models used throughout the retrieval engine.
//!
//! These types represent the source records, chunks, and scored results that
//! flow through the sync and retrieval pipeline. `ChunkMetadata` is a closed
//! struct rather than an open map so that shape mismatches between the
//! chunker, the indexes, and fusion are caught at compile time.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility tier of a knowledge-base record.
///
/// Ordered from least to most privileged; a user cleared for a level may
/// also read everything below it (see [`AccessFilter::up_to`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Intern,
    Employee,
    Manager,
    Admin,
}

impl AccessLevel {
    /// All levels in ascending order of privilege.
    pub const ALL: [AccessLevel; 5] = [
        AccessLevel::Public,
        AccessLevel::Intern,
        AccessLevel::Employee,
        AccessLevel::Manager,
        AccessLevel::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Intern => "intern",
            AccessLevel::Employee => "employee",
            AccessLevel::Manager => "manager",
            AccessLevel::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(AccessLevel::Public),
            "intern" => Ok(AccessLevel::Intern),
            "employee" => Ok(AccessLevel::Employee),
            "manager" => Ok(AccessLevel::Manager),
            "admin" => Ok(AccessLevel::Admin),
            other => Err(anyhow::anyhow!("Unknown access level: {}", other)),
        }
    }
}

/// Kind of source record a chunk was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// News/article entries authored directly in the CMS.
    Headline,
    /// Page extracts from uploaded files (PDF, DOCX, …).
    Document,
    /// Image captions.
    Image,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Headline => "headline",
            SourceKind::Document => "document",
            SourceKind::Image => "image",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record read from the source-of-truth store.
///
/// Owned by the CRUD application; the retrieval engine only ever reads
/// these. For headlines and images `text` carries the body/caption;
/// document records carry a stored file reference instead and are
/// extracted during sync.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: i64,
    pub kind: SourceKind,
    pub title: Option<String>,
    pub text: String,
    pub access_level: AccessLevel,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    /// Stored file path, for document records.
    pub file_path: Option<String>,
    /// Lowercase file extension (`pdf`, `docx`, …), for document records.
    pub file_type: Option<String>,
}

/// Structured metadata attached to every chunk.
///
/// `access_level` is inherited from the source record at chunk-creation
/// time and never re-derived at query time; an access change on a record
/// takes effect when the next sync touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_kind: SourceKind,
    pub source_id: i64,
    pub access_level: AccessLevel,
    /// Position of this chunk within its parent record.
    pub chunk_index: usize,
    /// Lowercase file extension, for document-derived chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// 1-based page number, for document-derived chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<usize>,
    /// SHA-256 of the chunk content, hex-encoded.
    pub content_hash: String,
}

/// A unit of retrievable text plus its provenance.
///
/// Created during sync, superseded (deleted and recreated) whenever the
/// parent record changes, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(content: String, metadata: ChunkMetadata) -> Self {
        Self { content, metadata }
    }
}

/// A chunk with a relevance score, as returned by the keyword index, the
/// vector backend, or the hybrid retriever.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
}

/// The set of access levels a caller is allowed to see.
#[derive(Debug, Clone)]
pub struct AccessFilter {
    allowed: Vec<AccessLevel>,
}

impl AccessFilter {
    pub fn new(allowed: Vec<AccessLevel>) -> Self {
        Self { allowed }
    }

    /// Every level up to and including `max` (`public` is always included).
    pub fn up_to(max: AccessLevel) -> Self {
        Self {
            allowed: AccessLevel::ALL
                .iter()
                .copied()
                .filter(|l| *l <= max)
                .collect(),
        }
    }

    pub fn allows(&self, level: AccessLevel) -> bool {
        self.allowed.contains(&level)
    }

    pub fn levels(&self) -> &[AccessLevel] {
        &self.allowed
    }
}

/// Counters reported by a sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Headline records processed (active ones re-chunked).
    pub headlines: u64,
    /// Document records processed, keyed by file type.
    pub documents_by_type: BTreeMap<String, u64>,
    /// Image records processed.
    pub images: u64,
    /// New chunks written to the vector store in this pass.
    pub total_chunks: u64,
    /// Records skipped because their content failed to load or parse.
    pub skipped: u64,
}
