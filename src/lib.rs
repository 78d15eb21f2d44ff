//! # Campus Retrieval
//!
//! Hybrid retrieval engine for a university knowledge-base chatbot.
//!
//! The engine keeps a vector store and an in-memory BM25 index in sync
//! with the content store of the surrounding CRUD application (news
//! headlines, uploaded documents, image captions) and serves ranked,
//! access-filtered context passages to the chat orchestration layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────────────┐   ┌───────────────┐
//! │ Source store   │──▶│ Sync engine          │──▶│ Vector store  │
//! │ (CRUD app DB)  │   │ chunk + embed        │   │ Chroma/Weav.  │
//! └────────────────┘   └──────────┬───────────┘   └──────┬────────┘
//!                                 ▼                      │
//!                        ┌────────────────┐              │
//!                        │ Keyword index  │              │
//!                        │ (BM25)         │              │
//!                        └───────┬────────┘              │
//!                                └────────┬──────────────┘
//!                                         ▼
//!                               ┌──────────────────┐   ┌──────────┐
//!                               │ Hybrid retriever │──▶│ Reranker │
//!                               │ (RRF fusion)     │   │ (LLM)    │
//!                               └──────────────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types (chunks, access levels, sync stats) |
//! | [`chunker`] | Structure-aware text chunking |
//! | [`keyword`] | BM25 keyword index with access filtering |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector`] | Vector store backends (Chroma, Weaviate, in-memory) |
//! | [`source`] | Read-only source-of-truth adapter |
//! | [`extract`] | Document file text extraction |
//! | [`watermark`] | Persisted sync cutoff |
//! | [`sync`] | Incremental and full resync |
//! | [`hybrid`] | Hybrid retrieval with RRF fusion |
//! | [`rerank`] | Optional LLM reranking pass |
//! | [`engine`] | The [`RetrievalEngine`](engine::RetrievalEngine) tying it together |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod hybrid;
pub mod keyword;
pub mod models;
pub mod rerank;
pub mod source;
pub mod sync;
pub mod vector;
pub mod watermark;

pub use engine::RetrievalEngine;
pub use models::{AccessFilter, AccessLevel, Chunk, ChunkMetadata, ScoredChunk, SyncStats};
