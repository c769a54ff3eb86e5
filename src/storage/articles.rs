//! Raw-article queue and canonical-article operations.
//!
//! Work claiming uses `FOR UPDATE SKIP LOCKED` plus an expiring lock
//! column so two workers never process the same row and crashed workers
//! leak nothing past the lock TTL.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;

use super::Storage;
use crate::error::Result;
use crate::types::{Article, RawArticle, RawStatus};

/// Candidate produced by the feed poller
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub feed_id: i64,
    pub canonical_url: String,
    pub url_hash: String,
    pub rss_meta: serde_json::Value,
    pub published_at: Option<DateTime<Utc>>,
}

/// Canonical article payload produced by the worker
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub canonical_url: String,
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
}

/// Result of attempting to store a canonical article
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new canonical row was created
    Created(i64),
    /// The text hash already had a canonical; the sighting is a duplicate
    Duplicate(i64),
}

fn raw_from_row(row: &PgRow) -> RawArticle {
    RawArticle {
        id: row.get("id"),
        feed_id: row.get("feed_id"),
        canonical_url: row.get("canonical_url"),
        url_hash: row.get("url_hash"),
        rss_meta: row.get("rss_meta"),
        clean_text: row.get("clean_text"),
        text_hash: row.get("text_hash"),
        lang: row.get("lang"),
        category: row.get("category"),
        published_at: row.get("published_at"),
        pub_is_estimated: row.get("pub_is_estimated"),
        word_count: row.get("word_count"),
        quality_score: row.get("quality_score"),
        status: RawStatus::parse(row.get::<String, _>("status").as_str()),
        retry_count: row.get("retry_count"),
        last_error: row.get("last_error"),
        dup_original_id: row.get("dup_original_id"),
        lock_owner: row.get("lock_owner"),
        lock_expires_at: row.get("lock_expires_at"),
        fetched_at: row.get("fetched_at"),
    }
}

fn article_from_row(row: &PgRow) -> Article {
    let authors: serde_json::Value = row.get("authors");
    let tags: serde_json::Value = row.get("tags");
    let as_strings = |v: &serde_json::Value| -> Vec<String> {
        v.as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|x| x.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    Article {
        id: row.get("id"),
        canonical_url: row.get("canonical_url"),
        source_domain: row.get("source_domain"),
        title: row.get("title"),
        clean_text: row.get("clean_text"),
        text_hash: row.get("text_hash"),
        authors: as_strings(&authors),
        lang: row.get("lang"),
        category: row.get("category"),
        tags: as_strings(&tags),
        quality_score: row.get("quality_score"),
        published_at: row.get("published_at"),
        ready_for_chunking: row.get("ready_for_chunking"),
        chunking_completed: row.get("chunking_completed"),
        processing_version: row.get("processing_version"),
    }
}

impl Storage {
    /// Admit a poller candidate unless its URL hash was already seen inside
    /// the dedup window. Returns whether a row was inserted.
    pub async fn admit_candidate(
        &self,
        candidate: &NewCandidate,
        dedup_window_days: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO raw_articles (feed_id, canonical_url, url_hash, rss_meta, published_at) \
             SELECT $1, $2, $3, $4, $5 \
             WHERE NOT EXISTS (\
                 SELECT 1 FROM raw_articles \
                 WHERE url_hash = $3 AND fetched_at > now() - make_interval(days => $6))",
        )
        .bind(candidate.feed_id)
        .bind(&candidate.canonical_url)
        .bind(&candidate.url_hash)
        .bind(&candidate.rss_meta)
        .bind(candidate.published_at)
        .bind(dedup_window_days as i32)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim up to `batch_size` pending rows for `worker_id`.
    ///
    /// Claimed rows move to `processing` with an expiring lock; `SKIP
    /// LOCKED` keeps concurrent claimers from blocking on each other.
    pub async fn claim_pending(
        &self,
        batch_size: usize,
        worker_id: &str,
        lock_ttl_secs: i64,
    ) -> Result<Vec<RawArticle>> {
        let rows = sqlx::query(
            "UPDATE raw_articles SET \
                status = 'processing', \
                lock_owner = $2, \
                lock_expires_at = now() + make_interval(secs => $3) \
             WHERE id IN (\
                 SELECT id FROM raw_articles WHERE status = 'pending' \
                 ORDER BY fetched_at ASC LIMIT $1 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING *",
        )
        .bind(batch_size as i64)
        .bind(worker_id)
        .bind(lock_ttl_secs as f64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(raw_from_row).collect())
    }

    /// Sweep expired locks back to `pending`, bumping the retry counter.
    /// Returns the number of reclaimed rows.
    pub async fn reclaim_expired_locks(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE raw_articles SET \
                status = 'pending', lock_owner = NULL, lock_expires_at = NULL, \
                retry_count = retry_count + 1 \
             WHERE status = 'processing' AND lock_expires_at < now()",
        )
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Store a canonical article for a processed sighting, or attach the
    /// sighting to the existing canonical when the text hash collides.
    /// One transaction covers the article upsert and the status flip.
    pub async fn store_canonical(
        &self,
        raw_id: i64,
        article: &NewArticle,
    ) -> Result<StoreOutcome> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO articles \
                (canonical_url, source_domain, title, clean_text, text_hash, authors, lang, \
                 category, tags, quality_score, published_at, ready_for_chunking) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE) \
             ON CONFLICT (text_hash) DO NOTHING \
             RETURNING id",
        )
        .bind(&article.canonical_url)
        .bind(&article.source_domain)
        .bind(&article.title)
        .bind(&article.clean_text)
        .bind(&article.text_hash)
        .bind(serde_json::json!(article.authors))
        .bind(&article.lang)
        .bind(&article.category)
        .bind(serde_json::json!(article.tags))
        .bind(article.quality_score)
        .bind(article.published_at)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match inserted {
            Some(row) => {
                let article_id: i64 = row.get("id");
                sqlx::query(
                    "UPDATE raw_articles SET \
                        status = 'stored', clean_text = $2, text_hash = $3, lang = $4, \
                        category = $5, published_at = $6, pub_is_estimated = $7, \
                        word_count = $8, quality_score = $9, \
                        lock_owner = NULL, lock_expires_at = NULL \
                     WHERE id = $1",
                )
                .bind(raw_id)
                .bind(&article.clean_text)
                .bind(&article.text_hash)
                .bind(&article.lang)
                .bind(&article.category)
                .bind(article.published_at)
                .bind(article.published_at.is_none())
                .bind(article.clean_text.split_whitespace().count() as i32)
                .bind(article.quality_score)
                .execute(&mut *tx)
                .await?;
                StoreOutcome::Created(article_id)
            }
            None => {
                let row = sqlx::query("SELECT id FROM articles WHERE text_hash = $1")
                    .bind(&article.text_hash)
                    .fetch_one(&mut *tx)
                    .await?;
                let original_id: i64 = row.get("id");
                sqlx::query(
                    "UPDATE raw_articles SET \
                        status = 'duplicate', text_hash = $2, dup_original_id = $3, \
                        lock_owner = NULL, lock_expires_at = NULL \
                     WHERE id = $1",
                )
                .bind(raw_id)
                .bind(&article.text_hash)
                .bind(original_id)
                .execute(&mut *tx)
                .await?;
                StoreOutcome::Duplicate(original_id)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Mark a sighting as a duplicate of an existing canonical article
    pub async fn mark_duplicate(&self, raw_id: i64, original_id: i64, text_hash: &str) -> Result<()> {
        sqlx::query(
            "UPDATE raw_articles SET \
                status = 'duplicate', text_hash = $2, dup_original_id = $3, \
                lock_owner = NULL, lock_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(raw_id)
        .bind(text_hash)
        .bind(original_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Record a retryable failure; the row returns to `pending` until the
    /// retry budget runs out, then lands in `skipped`.
    pub async fn mark_error(&self, raw_id: i64, error: &str, max_retries: i32) -> Result<RawStatus> {
        let row = sqlx::query(
            "UPDATE raw_articles SET \
                retry_count = retry_count + 1, \
                last_error = $2, \
                lock_owner = NULL, lock_expires_at = NULL, \
                status = CASE WHEN retry_count + 1 >= $3 THEN 'skipped' ELSE 'pending' END \
             WHERE id = $1 \
             RETURNING status",
        )
        .bind(raw_id)
        .bind(error)
        .bind(max_retries)
        .fetch_one(self.pool())
        .await?;
        Ok(RawStatus::parse(row.get::<String, _>("status").as_str()))
    }

    /// Mark a sighting permanently skipped with a reason code
    pub async fn mark_skipped(&self, raw_id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE raw_articles SET \
                status = 'skipped', last_error = $2, \
                lock_owner = NULL, lock_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(raw_id)
        .bind(reason)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Look up the canonical article for a text hash
    pub async fn article_by_text_hash(&self, text_hash: &str) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE text_hash = $1")
            .bind(text_hash)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(article_from_row))
    }

    /// Same-domain canonical articles stored today, for soft (near-dup)
    /// detection before a new canonical is written
    pub async fn same_domain_today(&self, source_domain: &str) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT * FROM articles \
             WHERE source_domain = $1 \
               AND COALESCE(published_at, now()) > date_trunc('day', now())",
        )
        .bind(source_domain)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(article_from_row).collect())
    }

    /// Articles whose clean text is final but whose chunk set is not
    pub async fn articles_ready_for_chunking(&self, batch_size: usize) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT * FROM articles \
             WHERE ready_for_chunking AND NOT chunking_completed \
             ORDER BY id ASC LIMIT $1",
        )
        .bind(batch_size as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(article_from_row).collect())
    }
}
