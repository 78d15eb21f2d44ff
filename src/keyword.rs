//! In-memory BM25 keyword index over chunk text.
//!
//! The index is rebuilt wholesale during a full resync and appended to
//! during incremental syncs; it is never persisted. Scoring follows the
//! standard BM25 formulation with `k1 = 1.5`, `b = 0.75` and
//! `idf = ln((N − df + 0.5) / (df + 0.5) + 1)`.
//!
//! Access filtering happens before scoring: chunks outside the caller's
//! allowed levels contribute nothing to the ranking or the result list.
//! Corpus statistics (document count, term document frequencies, average
//! document length) always describe the whole index, not the filtered
//! view of one caller.
//!
//! Tokenization is shared by indexing and querying: lowercase, split on
//! runs of non-alphanumeric characters (Unicode-aware, so German umlauts
//! and ß survive), single-character tokens dropped, German/English stop
//! words dropped.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::models::{AccessFilter, Chunk, ScoredChunk};

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Fixed bilingual stop-word list (German + English).
const STOP_WORDS: &[&str] = &[
    // German
    "aber", "als", "am", "an", "auch", "auf", "aus", "bei", "bis", "das", "dass", "dem", "den",
    "der", "des", "die", "durch", "ein", "eine", "einem", "einen", "einer", "eines", "es", "für",
    "hat", "haben", "ich", "ihr", "im", "in", "ist", "kann", "können", "man", "mit", "nach",
    "nicht", "noch", "nur", "oder", "sich", "sie", "sind", "über", "um", "und", "von", "war",
    "waren", "was", "wenn", "werden", "wie", "wir", "wird", "wurde", "zu", "zum", "zur",
    // English
    "a", "about", "after", "all", "also", "an", "and", "are", "as", "at", "be", "been", "but",
    "by", "can", "could", "for", "from", "had", "has", "have", "he", "her", "his", "if", "is",
    "it", "its", "not", "of", "on", "or", "our", "she", "that", "the", "their", "them", "these",
    "they", "this", "to", "was", "we", "were", "will", "with", "would", "you", "your",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// Tokenize text for indexing or querying.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .filter(|t| !stop_words().contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// One indexed chunk: its term frequencies and token length.
struct IndexedDocument {
    chunk: Chunk,
    term_freq: HashMap<String, usize>,
    token_len: usize,
}

/// BM25 inverted-index-style ranking structure.
///
/// Documents are scored lazily at query time against the per-document
/// term frequencies; the global structures maintained per insert are the
/// term document frequencies and the corpus token total (from which the
/// average document length is derived exactly). `clear` resets all three
/// in lockstep.
#[derive(Default)]
pub struct KeywordIndex {
    entries: Vec<IndexedDocument>,
    doc_freq: HashMap<String, usize>,
    total_tokens: usize,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one chunk to the index.
    pub fn add_document(&mut self, chunk: &Chunk) {
        let tokens = tokenize(&chunk.content);
        let mut term_freq: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *term_freq.entry(token.clone()).or_insert(0) += 1;
        }
        for term in term_freq.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_tokens += tokens.len();
        self.entries.push(IndexedDocument {
            chunk: chunk.clone(),
            term_freq,
            token_len: tokens.len(),
        });
    }

    /// Drop every indexed document and all derived statistics.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.doc_freq.clear();
        self.total_tokens = 0;
    }

    /// Rank indexed chunks against `query`, returning the top `k`.
    ///
    /// Chunks whose access level is not in `filter` are skipped before
    /// scoring. Chunks with no query-term overlap (score 0) are excluded.
    /// Ties keep insertion order (stable sort).
    pub fn search(&self, query: &str, k: usize, filter: &AccessFilter) -> Vec<ScoredChunk> {
        let terms = tokenize(query);
        if terms.is_empty() || self.entries.is_empty() {
            return Vec::new();
        }

        let n = self.entries.len() as f64;
        let avg_len = self.total_tokens as f64 / n;

        let mut results: Vec<ScoredChunk> = Vec::new();
        for entry in &self.entries {
            if !filter.allows(entry.chunk.metadata.access_level) {
                continue;
            }

            let mut score = 0.0;
            for term in &terms {
                let tf = match entry.term_freq.get(term) {
                    Some(tf) => *tf as f64,
                    None => continue,
                };
                let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let norm = 1.0 - B + B * (entry.token_len as f64 / avg_len);
                score += idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
            }

            if score > 0.0 {
                results.push(ScoredChunk {
                    content: entry.chunk.content.clone(),
                    metadata: entry.chunk.metadata.clone(),
                    score,
                });
            }
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessLevel, ChunkMetadata, SourceKind};

    fn chunk(content: &str, level: AccessLevel) -> Chunk {
        Chunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source_kind: SourceKind::Headline,
                source_id: 1,
                access_level: level,
                chunk_index: 0,
                file_type: None,
                page_number: None,
                content_hash: String::new(),
            },
        }
    }

    fn all_levels() -> AccessFilter {
        AccessFilter::up_to(AccessLevel::Admin)
    }

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        let tokens = tokenize("Die Bibliothek öffnet (werktags!) um 08:00 Uhr.");
        assert!(tokens.contains(&"bibliothek".to_string()));
        assert!(tokens.contains(&"öffnet".to_string()));
        assert!(tokens.contains(&"werktags".to_string()));
        assert!(tokens.contains(&"uhr".to_string()));
        // Stop word and single-char tokens are gone.
        assert!(!tokens.contains(&"die".to_string()));
        assert!(!tokens.contains(&"um".to_string()));
    }

    #[test]
    fn test_tokenize_keeps_umlauts_and_eszett() {
        let tokens = tokenize("Prüfungsordnung gemäß Straßenverzeichnis");
        assert_eq!(
            tokens,
            vec!["prüfungsordnung", "gemäß", "straßenverzeichnis"]
        );
    }

    #[test]
    fn test_empty_query_and_empty_index() {
        let mut index = KeywordIndex::new();
        assert!(index.search("library", 5, &all_levels()).is_empty());

        index.add_document(&chunk("library opening hours", AccessLevel::Public));
        assert!(index.search("", 5, &all_levels()).is_empty());
        // Query made entirely of stop words tokenizes to nothing.
        assert!(index.search("the and der und", 5, &all_levels()).is_empty());
    }

    #[test]
    fn test_basic_ranking_by_term_frequency() {
        let mut index = KeywordIndex::new();
        index.add_document(&chunk(
            "cafeteria menu cafeteria prices cafeteria news",
            AccessLevel::Public,
        ));
        index.add_document(&chunk(
            "cafeteria closed during semester break",
            AccessLevel::Public,
        ));
        index.add_document(&chunk("parking permits available", AccessLevel::Public));

        let results = index.search("cafeteria", 10, &all_levels());
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("menu"));
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_no_overlap_excluded() {
        let mut index = KeywordIndex::new();
        index.add_document(&chunk("exam registration deadline", AccessLevel::Public));
        let results = index.search("cafeteria", 10, &all_levels());
        assert!(results.is_empty());
    }

    #[test]
    fn test_deterministic_ranking() {
        let mut index = KeywordIndex::new();
        for i in 0..20 {
            index.add_document(&chunk(
                &format!("campus shuttle route {} schedule shuttle", i),
                AccessLevel::Public,
            ));
        }
        let a = index.search("shuttle schedule", 10, &all_levels());
        let b = index.search("shuttle schedule", 10, &all_levels());
        let order_a: Vec<&str> = a.iter().map(|r| r.content.as_str()).collect();
        let order_b: Vec<&str> = b.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn test_access_filter_excludes_before_scoring() {
        let mut index = KeywordIndex::new();
        index.add_document(&chunk("salary bands for staff", AccessLevel::Manager));
        index.add_document(&chunk("salary transparency report", AccessLevel::Public));

        let public_only = AccessFilter::new(vec![AccessLevel::Public]);
        let results = index.search("salary", 10, &public_only);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.access_level, AccessLevel::Public);

        // Regardless of relevance, the manager chunk never appears.
        let results = index.search("salary bands staff", 10, &public_only);
        assert!(results
            .iter()
            .all(|r| r.metadata.access_level == AccessLevel::Public));
    }

    #[test]
    fn test_filter_does_not_change_corpus_statistics() {
        let mut index = KeywordIndex::new();
        index.add_document(&chunk("tuition fees overview", AccessLevel::Public));
        index.add_document(&chunk("tuition waiver internal notes", AccessLevel::Manager));

        let unfiltered = index.search("tuition", 10, &all_levels());
        let filtered = index.search("tuition", 10, &AccessFilter::new(vec![AccessLevel::Public]));

        // The public chunk's score is identical either way: filtering does
        // not alter N, df, or the average document length.
        let pub_unfiltered = unfiltered
            .iter()
            .find(|r| r.metadata.access_level == AccessLevel::Public)
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert!((filtered[0].score - pub_unfiltered.score).abs() < 1e-12);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut index = KeywordIndex::new();
        index.add_document(&chunk("semester dates", AccessLevel::Public));
        assert_eq!(index.len(), 1);

        index.clear();
        assert!(index.is_empty());
        assert!(index.search("semester", 10, &all_levels()).is_empty());

        // Statistics start fresh: a re-added document scores as in a
        // single-document corpus.
        index.add_document(&chunk("semester dates", AccessLevel::Public));
        assert_eq!(index.len(), 1);
        let results = index.search("semester", 10, &all_levels());
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_rarer_terms_weigh_more() {
        let mut index = KeywordIndex::new();
        index.add_document(&chunk("wifi eduroam setup guide", AccessLevel::Public));
        index.add_document(&chunk("wifi troubleshooting basics", AccessLevel::Public));
        index.add_document(&chunk("wifi coverage map", AccessLevel::Public));

        // "eduroam" (df=1) should dominate "wifi" (df=3) for the doc
        // containing both.
        let results = index.search("wifi eduroam", 10, &all_levels());
        assert_eq!(results[0].content, "wifi eduroam setup guide");
    }

    #[test]
    fn test_top_k_truncation() {
        let mut index = KeywordIndex::new();
        for i in 0..10 {
            index.add_document(&chunk(&format!("sports course {}", i), AccessLevel::Public));
        }
        let results = index.search("sports", 3, &all_levels());
        assert_eq!(results.len(), 3);
    }
}
