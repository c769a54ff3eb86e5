//! Hybrid retrieval: dense-vector + full-text candidate fetch, scoring,
//! penalties, dedup, diversification, and auto-recovery.

pub mod cache;
pub mod dedupe;
pub mod retriever;
pub mod scoring;

pub use cache::RetrievalCache;
pub use retriever::{HybridRetriever, RetrieverMetrics};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Chunk;

/// A retrieval candidate with its score components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// 1 - cosine distance to the query embedding
    pub similarity: f64,
    /// Normalized lexical rank
    pub lexical: f64,
    /// Final blended score after penalties
    pub score: f64,
}

/// Pipeline toggles. Everything defaults on except the cache, which only
/// analytic callers opt into.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetrievalFlags {
    pub offtopic_guard: bool,
    pub category_penalties: bool,
    pub date_penalties: bool,
    pub diversify: bool,
    pub use_cache: bool,
}

impl Default for RetrievalFlags {
    fn default() -> Self {
        Self {
            offtopic_guard: true,
            category_penalties: true,
            date_penalties: true,
            diversify: true,
            use_cache: false,
        }
    }
}

/// One retrieval request
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub window_hours: i64,
    pub k: usize,
    pub lang: Option<String>,
    /// eTLD+1 source lock; empty means unrestricted
    pub sources: Vec<String>,
    /// Operator dates; SQL-enforced and exempt from window expansion
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    /// News intent enables category penalties
    pub news_intent: bool,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, window_hours: i64, k: usize) -> Self {
        Self {
            query: query.into(),
            window_hours,
            k,
            lang: None,
            sources: Vec::new(),
            after: None,
            before: None,
            news_intent: true,
        }
    }
}

/// Per-call observability, returned alongside the ranking
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub candidates_considered: usize,
    pub offtopic_dropped: usize,
    pub category_penalized: usize,
    pub duplicates_removed: usize,
    pub domains_capped: usize,
    pub window_expansions: usize,
    pub window_used_hours: i64,
    pub total_available: i64,
    pub from_cache: bool,
    pub warnings: Vec<String>,
}

/// Human label for a window size, used in diagnostics warnings
pub fn window_label(hours: i64) -> String {
    match hours {
        24 => "24h".to_string(),
        168 => "7d".to_string(),
        336 => "14d".to_string(),
        720 => "30d".to_string(),
        2160 => "3m".to_string(),
        4320 => "6m".to_string(),
        8760 => "1y".to_string(),
        h if h % 24 == 0 => format!("{}d", h / 24),
        h => format!("{h}h"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_labels() {
        assert_eq!(window_label(168), "7d");
        assert_eq!(window_label(2160), "3m");
        assert_eq!(window_label(48), "2d");
        assert_eq!(window_label(30), "30h");
    }

    #[test]
    fn test_default_flags() {
        let flags = RetrievalFlags::default();
        assert!(flags.offtopic_guard);
        assert!(!flags.use_cache);
    }
}
