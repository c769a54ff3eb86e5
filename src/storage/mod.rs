//! Postgres storage: durable state for feeds, articles, chunks, vectors,
//! FTS, runtime config, and batch diagnostics.
//!
//! All cross-process coordination happens here; services share no
//! in-process state. Queries are runtime-bound (`sqlx::query(...).bind`)
//! so the crate builds without a live database.

mod articles;
mod chunks;
mod feeds;

pub use articles::{NewArticle, NewCandidate, StoreOutcome};
pub use chunks::{CandidateFilter, CandidateRow, NewChunk, PendingChunk};

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::types::BatchRun;

/// Shared handle over the connection pool; cheap to clone
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    /// Connect the pool and ensure the schema exists.
    ///
    /// `embedding_dim` is the deployment-fixed vector dimension; mixing
    /// dimensions in one index is forbidden, so it is baked into the DDL.
    pub async fn connect(config: &DatabaseConfig, embedding_dim: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        let storage = Self { pool };
        storage.init_schema(embedding_dim).await?;
        info!(
            max_connections = config.max_connections,
            "storage pool initialized"
        );
        Ok(storage)
    }

    /// Wrap an existing pool (tests)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self, embedding_dim: usize) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id BIGSERIAL PRIMARY KEY,
                feed_url TEXT NOT NULL UNIQUE,
                lang TEXT,
                priority INT NOT NULL DEFAULT 100,
                trust_score INT NOT NULL DEFAULT 50,
                etag TEXT,
                last_modified TEXT,
                health_score INT NOT NULL DEFAULT 100,
                consecutive_failures INT NOT NULL DEFAULT 0,
                daily_quota INT NOT NULL DEFAULT 500,
                polled_today INT NOT NULL DEFAULT 0,
                quota_day DATE NOT NULL DEFAULT CURRENT_DATE,
                crawl_interval_secs BIGINT NOT NULL DEFAULT 1800,
                status TEXT NOT NULL DEFAULT 'active',
                next_crawl_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_crawled_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_due ON feeds (next_crawl_at) WHERE status = 'active'",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_articles (
                id BIGSERIAL PRIMARY KEY,
                feed_id BIGINT NOT NULL REFERENCES feeds(id),
                canonical_url TEXT NOT NULL,
                url_hash TEXT NOT NULL,
                rss_meta JSONB NOT NULL DEFAULT '{}',
                clean_text TEXT,
                text_hash TEXT,
                lang TEXT,
                category TEXT,
                published_at TIMESTAMPTZ,
                pub_is_estimated BOOLEAN NOT NULL DEFAULT FALSE,
                word_count INT,
                quality_score REAL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INT NOT NULL DEFAULT 0,
                last_error TEXT,
                dup_original_id BIGINT,
                lock_owner TEXT,
                lock_expires_at TIMESTAMPTZ,
                fetched_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_status ON raw_articles (status, fetched_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_url_hash ON raw_articles (url_hash, fetched_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id BIGSERIAL PRIMARY KEY,
                canonical_url TEXT NOT NULL,
                source_domain TEXT NOT NULL,
                title TEXT NOT NULL,
                clean_text TEXT NOT NULL,
                text_hash TEXT NOT NULL UNIQUE,
                authors JSONB NOT NULL DEFAULT '[]',
                lang TEXT NOT NULL DEFAULT 'en',
                category TEXT,
                tags JSONB NOT NULL DEFAULT '[]',
                quality_score REAL NOT NULL DEFAULT 0.5,
                published_at TIMESTAMPTZ,
                ready_for_chunking BOOLEAN NOT NULL DEFAULT FALSE,
                chunking_completed BOOLEAN NOT NULL DEFAULT FALSE,
                processing_version INT NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_chunking ON articles (ready_for_chunking, chunking_completed)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                article_id BIGINT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                chunk_index INT NOT NULL,
                processing_version INT NOT NULL DEFAULT 1,
                text TEXT NOT NULL,
                char_start INT NOT NULL,
                char_end INT NOT NULL,
                semantic_type TEXT NOT NULL DEFAULT 'body',
                importance REAL NOT NULL DEFAULT 0.5,
                source_domain TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                published_at TIMESTAMPTZ,
                lang TEXT NOT NULL DEFAULT 'en',
                category TEXT,
                quality_score REAL NOT NULL DEFAULT 0.5,
                word_count INT NOT NULL DEFAULT 0,
                embedding vector({embedding_dim}),
                embedding_model TEXT,
                embedding_failed BOOLEAN NOT NULL DEFAULT FALSE,
                embed_attempts INT NOT NULL DEFAULT 0,
                fts tsvector,
                UNIQUE (article_id, chunk_index, processing_version)
            )
            "#
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_pending_embed ON chunks (chunk_id) \
             WHERE embedding IS NULL AND NOT embedding_failed",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_fts ON chunks USING gin (fts)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_published ON chunks (published_at DESC NULLS LAST)",
        )
        .execute(&self.pool)
        .await?;
        // pgvector's HNSW caps full-precision vectors at 2000 dims; index the
        // halfvec cast and keep query expressions identical to this one.
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_chunks_embedding_hnsw ON chunks \
             USING hnsw ((embedding::halfvec({embedding_dim})) halfvec_cosine_ops)",
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batch_runs (
                id BIGSERIAL PRIMARY KEY,
                stage TEXT NOT NULL,
                worker_id TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ NOT NULL,
                input_count INT NOT NULL,
                ok_count INT NOT NULL,
                error_count INT NOT NULL,
                errors JSONB NOT NULL DEFAULT '{}',
                p50_ms BIGINT,
                p95_ms BIGINT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Liveness probe used by the health endpoint
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Load the hot-reload config overlay
    pub async fn load_config_overlay(&self) -> Result<HashMap<String, serde_json::Value>> {
        let rows = sqlx::query("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("key"), row.get::<serde_json::Value, _>("value")))
            .collect())
    }

    /// Write one runtime config key; readers pick it up within a cycle
    pub async fn set_config(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO config (key, value, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append one batch-run diagnostics row
    pub async fn record_batch_run(&self, run: &BatchRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO batch_runs \
             (stage, worker_id, started_at, finished_at, input_count, ok_count, error_count, errors, p50_ms, p95_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&run.stage)
        .bind(&run.worker_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.input_count)
        .bind(run.ok_count)
        .bind(run.error_count)
        .bind(&run.errors)
        .bind(run.p50_ms)
        .bind(run.p95_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
