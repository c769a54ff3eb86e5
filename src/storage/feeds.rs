//! Feed table operations: registration, due-feed selection, cache
//! validators, health and quota accounting.

use sqlx::postgres::PgRow;
use sqlx::Row;

use super::Storage;
use crate::error::Result;
use crate::types::{Feed, FeedStatus};

fn feed_from_row(row: &PgRow) -> Feed {
    Feed {
        id: row.get("id"),
        feed_url: row.get("feed_url"),
        lang: row.get("lang"),
        priority: row.get("priority"),
        trust_score: row.get("trust_score"),
        etag: row.get("etag"),
        last_modified: row.get("last_modified"),
        health_score: row.get("health_score"),
        consecutive_failures: row.get("consecutive_failures"),
        daily_quota: row.get("daily_quota"),
        polled_today: row.get("polled_today"),
        crawl_interval_secs: row.get("crawl_interval_secs"),
        status: FeedStatus::parse(row.get::<String, _>("status").as_str()),
        next_crawl_at: row.get("next_crawl_at"),
        last_crawled_at: row.get("last_crawled_at"),
    }
}

impl Storage {
    /// Register a feed, or return the existing row for its URL
    pub async fn upsert_feed(
        &self,
        feed_url: &str,
        lang: Option<&str>,
        priority: i32,
        trust_score: i32,
    ) -> Result<Feed> {
        let row = sqlx::query(
            "INSERT INTO feeds (feed_url, lang, priority, trust_score) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (feed_url) DO UPDATE SET lang = EXCLUDED.lang \
             RETURNING *",
        )
        .bind(feed_url)
        .bind(lang)
        .bind(priority)
        .bind(trust_score)
        .fetch_one(self.pool())
        .await?;
        Ok(feed_from_row(&row))
    }

    /// Feeds due for polling, under quota, ordered by
    /// (priority asc, trust desc, last crawled asc).
    ///
    /// Rolls the daily quota counter over first so a feed polled 500 times
    /// yesterday is eligible again today.
    pub async fn due_feeds(&self, batch_size: usize) -> Result<Vec<Feed>> {
        sqlx::query(
            "UPDATE feeds SET polled_today = 0, quota_day = CURRENT_DATE \
             WHERE quota_day < CURRENT_DATE",
        )
        .execute(self.pool())
        .await?;

        let rows = sqlx::query(
            "SELECT * FROM feeds \
             WHERE status = 'active' AND next_crawl_at <= now() AND polled_today < daily_quota \
             ORDER BY priority ASC, trust_score DESC, last_crawled_at ASC NULLS FIRST \
             LIMIT $1",
        )
        .bind(batch_size as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(feed_from_row).collect())
    }

    /// Record a successful poll (200 or 304): advance the crawl clock,
    /// store validators, recover health, reset the failure streak.
    pub async fn record_poll_success(
        &self,
        feed_id: i64,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET \
                etag = COALESCE($2, etag), \
                last_modified = COALESCE($3, last_modified), \
                consecutive_failures = 0, \
                health_score = LEAST(100, health_score + 5), \
                polled_today = polled_today + 1, \
                last_crawled_at = now(), \
                next_crawl_at = now() + make_interval(secs => crawl_interval_secs) \
             WHERE id = $1",
        )
        .bind(feed_id)
        .bind(etag)
        .bind(last_modified)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Record a failed poll: bump the failure streak, degrade health, and
    /// pause the feed once health drops under `min_health`.
    pub async fn record_poll_failure(&self, feed_id: i64, min_health: i32) -> Result<FeedStatus> {
        let row = sqlx::query(
            "UPDATE feeds SET \
                consecutive_failures = consecutive_failures + 1, \
                health_score = GREATEST(0, health_score - 15), \
                last_crawled_at = now(), \
                next_crawl_at = now() + make_interval(secs => crawl_interval_secs), \
                status = CASE WHEN GREATEST(0, health_score - 15) < $2 THEN 'paused' ELSE status END \
             WHERE id = $1 \
             RETURNING status",
        )
        .bind(feed_id)
        .bind(min_health)
        .fetch_one(self.pool())
        .await?;
        Ok(FeedStatus::parse(row.get::<String, _>("status").as_str()))
    }

    /// Defer a feed to the next cycle without touching health (used when a
    /// per-domain rate budget ran out mid-cycle).
    pub async fn defer_feed(&self, feed_id: i64, secs: i64) -> Result<()> {
        sqlx::query("UPDATE feeds SET next_crawl_at = now() + make_interval(secs => $2) WHERE id = $1")
            .bind(feed_id)
            .bind(secs as f64)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Duplicate rate over the feed's recent sightings, for health scoring
    pub async fn feed_duplicate_rate(&self, feed_id: i64, days: i64) -> Result<f64> {
        let row = sqlx::query(
            "SELECT count(*) FILTER (WHERE status = 'duplicate')::float8 / GREATEST(count(*), 1)::float8 AS rate \
             FROM raw_articles WHERE feed_id = $1 AND fetched_at > now() - make_interval(days => $2)",
        )
        .bind(feed_id)
        .bind(days as i32)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<f64, _>("rate"))
    }
}
