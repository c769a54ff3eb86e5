//! Article worker: claims pending sightings, fetches and extracts content,
//! deduplicates, and writes canonical articles.
//!
//! A supervisor owns the claimed batch and a flume work queue; a small
//! worker pool does the fetch/extract IO. All state transitions happen on
//! the supervisor side so each row's outcome is one storage call.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::dedup;
use crate::error::{ErrorDisposition, ExtractError, NewswireError, Result};
use crate::ingest::extract::{self, Extracted};
use crate::ratelimit::OriginLimiter;
use crate::storage::{NewArticle, Storage, StoreOutcome};
use crate::types::{Article, BatchRun, RawArticle};
use crate::urls;

/// Outcome counters for one worker batch
#[derive(Debug, Default, Clone)]
pub struct WorkStats {
    pub claimed: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub errored: usize,
    pub skipped: usize,
    pub locks_reclaimed: u64,
}

struct FetchOutcome {
    raw: RawArticle,
    result: Result<(String, Extracted)>,
    elapsed_ms: u64,
}

pub struct ArticleWorker {
    storage: Storage,
    client: reqwest::Client,
    limiter: Arc<OriginLimiter>,
    config: WorkerConfig,
    worker_id: String,
}

impl ArticleWorker {
    pub fn new(storage: Storage, config: WorkerConfig, worker_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("newswire/0.2 article-worker")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            storage,
            client,
            limiter: Arc::new(OriginLimiter::new(1.0, 2.0)),
            config,
            worker_id,
        })
    }

    /// Claim and process one batch. Per-item failures are persisted as row
    /// state; only storage-level failures abort the batch.
    pub async fn process_batch(&self) -> Result<WorkStats> {
        let started_at = Utc::now();
        let mut stats = WorkStats {
            locks_reclaimed: self.storage.reclaim_expired_locks().await?,
            ..WorkStats::default()
        };
        if stats.locks_reclaimed > 0 {
            warn!(reclaimed = stats.locks_reclaimed, "reclaimed expired locks");
        }

        let claimed = self
            .storage
            .claim_pending(
                self.config.batch_size,
                &self.worker_id,
                self.config.lock_ttl_secs,
            )
            .await?;
        stats.claimed = claimed.len();
        if claimed.is_empty() {
            return Ok(stats);
        }
        debug!(claimed = claimed.len(), worker = %self.worker_id, "batch claimed");

        let (job_tx, job_rx) = flume::bounded::<RawArticle>(claimed.len());
        let (out_tx, out_rx) = flume::bounded::<FetchOutcome>(claimed.len());

        for raw in claimed {
            job_tx.send_async(raw).await.ok();
        }
        drop(job_tx);

        let pool_size = self.config.concurrency.max(1);
        let mut handles = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let jobs = job_rx.clone();
            let out = out_tx.clone();
            let client = self.client.clone();
            let limiter = Arc::clone(&self.limiter);
            let min_words = self.config.min_word_count;
            handles.push(tokio::spawn(async move {
                while let Ok(raw) = jobs.recv_async().await {
                    let started = Instant::now();
                    let result = fetch_and_extract(&client, &limiter, &raw, min_words).await;
                    let outcome = FetchOutcome {
                        raw,
                        result,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    if out.send_async(outcome).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(out_tx);

        let mut timings: Vec<u64> = Vec::with_capacity(stats.claimed);
        let mut error_buckets: std::collections::HashMap<String, u32> = Default::default();

        while let Ok(outcome) = out_rx.recv_async().await {
            timings.push(outcome.elapsed_ms);
            match outcome.result {
                Ok((final_url, extracted)) => {
                    match self.settle(&outcome.raw, final_url, extracted).await? {
                        Settled::Stored => stats.stored += 1,
                        Settled::Duplicate => stats.duplicates += 1,
                    }
                }
                Err(e) => {
                    *error_buckets.entry(e.category().to_string()).or_default() += 1;
                    match e.disposition() {
                        ErrorDisposition::Retry => {
                            let status = self
                                .storage
                                .mark_error(outcome.raw.id, &e.to_string(), self.config.max_retries)
                                .await?;
                            if status == crate::types::RawStatus::Skipped {
                                stats.skipped += 1;
                            } else {
                                stats.errored += 1;
                            }
                        }
                        _ => {
                            self.storage
                                .mark_skipped(outcome.raw.id, &e.to_string())
                                .await?;
                            stats.skipped += 1;
                        }
                    }
                }
            }
        }
        for handle in handles {
            handle.await.ok();
        }

        timings.sort_unstable();
        let pct = |p: f64| -> Option<i64> {
            if timings.is_empty() {
                return None;
            }
            let idx = ((timings.len() - 1) as f64 * p).round() as usize;
            Some(timings[idx] as i64)
        };

        info!(
            stored = stats.stored,
            duplicates = stats.duplicates,
            errored = stats.errored,
            skipped = stats.skipped,
            "worker batch finished"
        );

        self.storage
            .record_batch_run(&BatchRun {
                stage: "work".to_string(),
                worker_id: self.worker_id.clone(),
                started_at,
                finished_at: Utc::now(),
                input_count: stats.claimed as i32,
                ok_count: stats.stored as i32,
                error_count: stats.errored as i32,
                errors: serde_json::json!(error_buckets),
                p50_ms: pct(0.5),
                p95_ms: pct(0.95),
            })
            .await?;

        Ok(stats)
    }

    /// Decide the fate of an extracted sighting: hard dedup on text hash,
    /// soft dedup against same-domain same-day canonicals, else store.
    async fn settle(
        &self,
        raw: &RawArticle,
        final_url: String,
        extracted: Extracted,
    ) -> Result<Settled> {
        let text_hash = urls::text_hash(&extracted.clean_text);

        // Hard: exact text-hash collision.
        if let Some(existing) = self.storage.article_by_text_hash(&text_hash).await? {
            self.storage
                .mark_duplicate(raw.id, existing.id, &text_hash)
                .await?;
            return Ok(Settled::Duplicate);
        }

        let source_domain = urls::url_etld1(&final_url)
            .ok_or_else(|| ExtractError::InvalidUrl(final_url.clone()))?;
        // The non-English analyzer path needs a confident detection; weak
        // calls fall back to English before the language reaches chunks.
        let (lang, lang_confidence) = extract::detect_language(&extracted.clean_text);
        let lang = if lang == "en" || lang_confidence >= 0.8 {
            lang
        } else {
            debug!(raw_id = raw.id, lang, lang_confidence, "low-confidence language, using en");
            "en"
        };
        let category = extract::detect_category(&extracted.title, &extracted.clean_text);
        let paragraphs = extracted.clean_text.split("\n\n").count();
        let quality =
            extract::quality_score(extracted.word_count, !extracted.title.is_empty(), paragraphs);

        // RSS metadata date backstops a page without one; worker fetch time
        // is the estimated last resort and stays None on the article so the
        // date penalty applies at retrieval.
        let published_at = extracted.published_at.or(raw.published_at);

        // Soft: near-duplicate within the same eTLD+1 and day. The richer
        // sighting (has-date, quality, word count) keeps the canonical slot.
        let todays = self.storage.same_domain_today(&source_domain).await?;
        for existing in &todays {
            if !dedup::is_near_duplicate(
                &extracted.clean_text,
                &existing.clean_text,
                self.config.soft_dup_threshold,
            ) {
                continue;
            }
            if !new_wins(&extracted, published_at.is_some(), quality, existing) {
                debug!(raw_id = raw.id, original = existing.id, "soft duplicate, existing wins");
                self.storage
                    .mark_duplicate(raw.id, existing.id, &text_hash)
                    .await?;
                return Ok(Settled::Duplicate);
            }
            // The new sighting is richer; it becomes its own canonical and
            // retrieval-time dedup folds the pair.
            break;
        }

        let article = NewArticle {
            canonical_url: final_url,
            source_domain,
            title: extracted.title,
            clean_text: extracted.clean_text,
            text_hash,
            authors: extracted.authors,
            lang: lang.to_string(),
            category: category.map(str::to_string),
            tags: Vec::new(),
            quality_score: quality,
            published_at,
        };

        match self.storage.store_canonical(raw.id, &article).await? {
            StoreOutcome::Created(_) => Ok(Settled::Stored),
            StoreOutcome::Duplicate(_) => Ok(Settled::Duplicate),
        }
    }
}

enum Settled {
    Stored,
    Duplicate,
}

/// Winner rule for soft duplicates: (has-date, quality, word count),
/// compared lexicographically.
fn new_wins(new: &Extracted, new_has_date: bool, new_quality: f32, existing: &Article) -> bool {
    let new_key = (
        new_has_date,
        (new_quality * 1000.0) as i64,
        new.word_count as i64,
    );
    let existing_key = (
        existing.published_at.is_some(),
        (existing.quality_score * 1000.0) as i64,
        existing.clean_text.split_whitespace().count() as i64,
    );
    new_key > existing_key
}

/// Fetch the article page (honoring the per-origin budget) and extract
/// content. Redirects may move the canonical URL; the final URL is
/// re-canonicalized and returned.
async fn fetch_and_extract(
    client: &reqwest::Client,
    limiter: &OriginLimiter,
    raw: &RawArticle,
    min_word_count: usize,
) -> Result<(String, Extracted)> {
    let origin = urls::url_etld1(&raw.canonical_url).unwrap_or_else(|| "unknown".to_string());
    limiter.acquire(&origin).await;

    let response = client
        .get(&raw.canonical_url)
        .send()
        .await
        .map_err(|e| ExtractError::FetchFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ExtractError::FetchFailed(format!("status {status}")).into());
        }
        return Err(NewswireError::Extract(ExtractError::InvalidUrl(format!(
            "status {status} for {}",
            raw.canonical_url
        ))));
    }

    let final_url = urls::canonicalize(response.url().as_str())?;
    let html = response
        .text()
        .await
        .map_err(|e| ExtractError::FetchFailed(e.to_string()))?;

    let extracted = extract::extract(&html, min_word_count)?;
    Ok((final_url, extracted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(published: bool, quality: f32, words: usize) -> Article {
        Article {
            id: 1,
            canonical_url: "https://bbc.com/a".to_string(),
            source_domain: "bbc.com".to_string(),
            title: "t".to_string(),
            clean_text: vec!["word"; words].join(" "),
            text_hash: "h".to_string(),
            authors: vec![],
            lang: "en".to_string(),
            category: None,
            tags: vec![],
            quality_score: quality,
            published_at: published.then(Utc::now),
            ready_for_chunking: true,
            chunking_completed: false,
            processing_version: 1,
        }
    }

    fn extracted(words: usize) -> Extracted {
        Extracted {
            title: "t".to_string(),
            authors: vec![],
            published_at: None,
            clean_text: vec!["word"; words].join(" "),
            word_count: words,
        }
    }

    #[test]
    fn test_dated_sighting_beats_undated() {
        let existing = article(false, 0.9, 500);
        assert!(new_wins(&extracted(100), true, 0.1, &existing));
    }

    #[test]
    fn test_word_count_breaks_ties() {
        let existing = article(true, 0.5, 100);
        assert!(new_wins(&extracted(200), true, 0.5, &existing));
        assert!(!new_wins(&extracted(50), true, 0.5, &existing));
    }
}
