//! Feed poller: conditional GET over due feeds, candidate admission.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::error::{FeedError, Result};
use crate::ratelimit::OriginLimiter;
use crate::storage::{NewCandidate, Storage};
use crate::types::{BatchRun, Feed, FeedStatus};
use crate::urls;

/// Outcome counters for one poll cycle
#[derive(Debug, Default, Clone)]
pub struct PollStats {
    pub feeds_polled: usize,
    pub feeds_not_modified: usize,
    pub feeds_failed: usize,
    pub feeds_deferred: usize,
    pub candidates_admitted: usize,
    pub candidates_deduped: usize,
}

pub struct FeedPoller {
    storage: Storage,
    client: reqwest::Client,
    limiter: Arc<OriginLimiter>,
    config: PollerConfig,
    worker_id: String,
}

impl FeedPoller {
    pub fn new(storage: Storage, config: PollerConfig, worker_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let limiter = Arc::new(OriginLimiter::new(config.per_domain_rps, 2.0));
        Ok(Self {
            storage,
            client,
            limiter,
            config,
            worker_id,
        })
    }

    /// Poll one batch of due feeds. Every feed outcome is persisted; a
    /// failing feed never fails the cycle.
    pub async fn poll_once(&self) -> Result<PollStats> {
        let started_at = Utc::now();
        let feeds = self.storage.due_feeds(self.config.batch_size).await?;
        debug!(due = feeds.len(), "poll cycle starting");

        let mut stats = PollStats::default();
        for feed in feeds {
            let origin = urls::url_etld1(&feed.feed_url).unwrap_or_else(|| feed.feed_url.clone());
            if self.limiter.try_acquire(&origin).is_err() {
                // Out of budget for this origin; defer, do not fail.
                self.storage.defer_feed(feed.id, 60).await?;
                stats.feeds_deferred += 1;
                continue;
            }

            match self.poll_feed(&feed, &mut stats).await {
                Ok(()) => stats.feeds_polled += 1,
                Err(e) => {
                    stats.feeds_failed += 1;
                    let status = self
                        .storage
                        .record_poll_failure(feed.id, self.config.min_health)
                        .await?;
                    if status == FeedStatus::Paused {
                        warn!(feed = %feed.feed_url, "feed auto-paused on low health");
                    } else {
                        warn!(feed = %feed.feed_url, error = %e, "feed poll failed");
                    }
                }
            }
        }

        info!(
            polled = stats.feeds_polled,
            not_modified = stats.feeds_not_modified,
            failed = stats.feeds_failed,
            deferred = stats.feeds_deferred,
            admitted = stats.candidates_admitted,
            "poll cycle finished"
        );

        self.storage
            .record_batch_run(&BatchRun {
                stage: "poll".to_string(),
                worker_id: self.worker_id.clone(),
                started_at,
                finished_at: Utc::now(),
                input_count: (stats.feeds_polled + stats.feeds_failed + stats.feeds_deferred)
                    as i32,
                ok_count: stats.feeds_polled as i32,
                error_count: stats.feeds_failed as i32,
                errors: serde_json::json!({}),
                p50_ms: None,
                p95_ms: None,
            })
            .await?;

        Ok(stats)
    }

    async fn poll_feed(&self, feed: &Feed, stats: &mut PollStats) -> Result<()> {
        let body = match self.fetch_conditional(feed).await? {
            Some(body) => body,
            None => {
                // 304: validators held, nothing new.
                stats.feeds_not_modified += 1;
                self.storage
                    .record_poll_success(feed.id, None, None)
                    .await?;
                return Ok(());
            }
        };

        let (etag, last_modified, parsed) = body;
        let channel = feed_rs::parser::parse(parsed.as_slice()).map_err(|e| {
            FeedError::Malformed {
                url: feed.feed_url.clone(),
                reason: e.to_string(),
            }
        })?;

        for entry in &channel.entries {
            let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
                continue;
            };
            let Ok(canonical_url) = urls::canonicalize(&link) else {
                debug!(link, "skipping entry with uncanonicalizable link");
                continue;
            };

            let candidate = NewCandidate {
                feed_id: feed.id,
                canonical_url: canonical_url.clone(),
                url_hash: urls::url_hash(&canonical_url),
                rss_meta: serde_json::json!({
                    "title": entry.title.as_ref().map(|t| t.content.clone()),
                    "summary": entry.summary.as_ref().map(|s| s.content.clone()),
                    "feed_url": feed.feed_url,
                }),
                published_at: entry.published.or(entry.updated),
            };

            if self
                .storage
                .admit_candidate(&candidate, self.config.dedup_window_days)
                .await?
            {
                stats.candidates_admitted += 1;
            } else {
                stats.candidates_deduped += 1;
            }
        }

        self.storage
            .record_poll_success(feed.id, etag.as_deref(), last_modified.as_deref())
            .await?;
        Ok(())
    }

    /// Conditional GET with in-cycle retries. `Ok(None)` means 304.
    async fn fetch_conditional(
        &self,
        feed: &Feed,
    ) -> Result<Option<(Option<String>, Option<String>, Vec<u8>)>> {
        let mut last_error: Option<FeedError> = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 << attempt)).await;
            }

            let mut request = self.client.get(&feed.feed_url);
            if let Some(etag) = &feed.etag {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(lm) = &feed.last_modified {
                request = request.header(reqwest::header::IF_MODIFIED_SINCE, lm);
            }

            let started = Instant::now();
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(FeedError::FetchFailed {
                        url: feed.feed_url.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            debug!(feed = %feed.feed_url, elapsed_ms = started.elapsed().as_millis() as u64, status = response.status().as_u16(), "feed fetched");

            match response.status().as_u16() {
                304 => return Ok(None),
                200 => {
                    let headers = response.headers();
                    let etag = headers
                        .get(reqwest::header::ETAG)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let last_modified = headers
                        .get(reqwest::header::LAST_MODIFIED)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = response.bytes().await.map_err(|e| FeedError::FetchFailed {
                        url: feed.feed_url.clone(),
                        reason: e.to_string(),
                    })?;
                    return Ok(Some((etag, last_modified, body.to_vec())));
                }
                429 => {
                    // Honor Retry-After within the cycle when short enough.
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(2);
                    if retry_after <= 10 {
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        last_error = Some(FeedError::HttpStatus {
                            url: feed.feed_url.clone(),
                            status: 429,
                        });
                        continue;
                    }
                    return Err(FeedError::HttpStatus {
                        url: feed.feed_url.clone(),
                        status: 429,
                    }
                    .into());
                }
                status if status >= 500 => {
                    last_error = Some(FeedError::HttpStatus {
                        url: feed.feed_url.clone(),
                        status,
                    });
                    continue;
                }
                status => {
                    return Err(FeedError::HttpStatus {
                        url: feed.feed_url.clone(),
                        status,
                    }
                    .into())
                }
            }
        }

        Err(last_error
            .unwrap_or(FeedError::FetchFailed {
                url: feed.feed_url.clone(),
                reason: "retries exhausted".to_string(),
            })
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_stats_default() {
        let stats = PollStats::default();
        assert_eq!(stats.feeds_polled, 0);
        assert_eq!(stats.candidates_admitted, 0);
    }
}
