//! Entity records shared across the pipeline stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Active,
    Paused,
    Dead,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Active => "active",
            FeedStatus::Paused => "paused",
            FeedStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paused" => FeedStatus::Paused,
            "dead" => FeedStatus::Dead,
            _ => FeedStatus::Active,
        }
    }
}

/// A registered RSS/Atom feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    /// Canonical feed URL, unique
    pub feed_url: String,
    pub lang: Option<String>,
    /// Lower polls sooner
    pub priority: i32,
    /// 0-100, editorial trust in the source
    pub trust_score: i32,
    /// HTTP cache validators
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// 0-100, derived from recent error/duplicate rates and failures
    pub health_score: i32,
    pub consecutive_failures: i32,
    pub daily_quota: i32,
    pub polled_today: i32,
    pub crawl_interval_secs: i64,
    pub status: FeedStatus,
    pub next_crawl_at: DateTime<Utc>,
    pub last_crawled_at: Option<DateTime<Utc>>,
}

/// Processing status of a raw article sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawStatus {
    Pending,
    Processing,
    Stored,
    Duplicate,
    Error,
    Skipped,
}

impl RawStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawStatus::Pending => "pending",
            RawStatus::Processing => "processing",
            RawStatus::Stored => "stored",
            RawStatus::Duplicate => "duplicate",
            RawStatus::Error => "error",
            RawStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => RawStatus::Processing,
            "stored" => RawStatus::Stored,
            "duplicate" => RawStatus::Duplicate,
            "error" => RawStatus::Error,
            "skipped" => RawStatus::Skipped,
            _ => RawStatus::Pending,
        }
    }
}

/// One (feed, canonical URL) sighting, the unit of worker processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArticle {
    pub id: i64,
    pub feed_id: i64,
    pub canonical_url: String,
    /// SHA-256 over the canonical URL
    pub url_hash: String,
    /// Title/summary/date as seen in the feed entry
    pub rss_meta: serde_json::Value,
    pub clean_text: Option<String>,
    /// SHA-256 over normalized clean text
    pub text_hash: Option<String>,
    pub lang: Option<String>,
    pub category: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub pub_is_estimated: bool,
    pub word_count: Option<i32>,
    pub quality_score: Option<f32>,
    pub status: RawStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Canonical article this sighting duplicates, when status = duplicate
    pub dup_original_id: Option<i64>,
    pub lock_owner: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// Canonical article: one per unique text hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub canonical_url: String,
    /// eTLD+1 of the canonical URL host
    pub source_domain: String,
    pub title: String,
    pub clean_text: String,
    pub text_hash: String,
    pub authors: Vec<String>,
    pub lang: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub quality_score: f32,
    pub published_at: Option<DateTime<Utc>>,
    pub ready_for_chunking: bool,
    pub chunking_completed: bool,
    pub processing_version: i32,
}

/// Coarse structural role of a chunk inside its article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Intro,
    Body,
    List,
    Conclusion,
    Quote,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Intro => "intro",
            SemanticType::Body => "body",
            SemanticType::List => "list",
            SemanticType::Conclusion => "conclusion",
            SemanticType::Quote => "quote",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "intro" => SemanticType::Intro,
            "list" => SemanticType::List,
            "conclusion" => SemanticType::Conclusion,
            "quote" => SemanticType::Quote,
            _ => SemanticType::Body,
        }
    }
}

/// The unit of embedding, indexing, and retrieval.
///
/// Denormalizes the article fields every retrieval needs so the hot path
/// never joins back to `articles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `{article_id}#{chunk_index}`
    pub chunk_id: String,
    pub article_id: i64,
    pub chunk_index: i32,
    pub processing_version: i32,
    pub text: String,
    pub char_start: i32,
    pub char_end: i32,
    pub semantic_type: SemanticType,
    pub importance: f32,
    pub source_domain: String,
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub lang: String,
    pub category: Option<String>,
    pub quality_score: f32,
    pub word_count: i32,
}

impl Chunk {
    pub fn make_id(article_id: i64, chunk_index: i32) -> String {
        format!("{article_id}#{chunk_index}")
    }
}

/// One batch execution by any stage; append-only diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub stage: String,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_count: i32,
    pub ok_count: i32,
    pub error_count: i32,
    /// Error-category buckets, e.g. {"http": 3, "extract": 1}
    pub errors: serde_json::Value,
    pub p50_ms: Option<i64>,
    pub p95_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(Chunk::make_id(42, 3), "42#3");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RawStatus::Pending,
            RawStatus::Processing,
            RawStatus::Stored,
            RawStatus::Duplicate,
            RawStatus::Error,
            RawStatus::Skipped,
        ] {
            assert_eq!(RawStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_semantic_type_defaults_to_body() {
        assert_eq!(SemanticType::parse("unknown"), SemanticType::Body);
    }
}
