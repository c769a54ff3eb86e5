//! Chunk store: transactional chunk-set writes, embedding and FTS
//! backfill queues, and the hybrid candidate query.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::Row;

use super::Storage;
use crate::error::Result;
use crate::types::{Chunk, SemanticType};

/// Chunk payload produced by the chunker, before denormalization
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub text: String,
    pub char_start: i32,
    pub char_end: i32,
    pub semantic_type: SemanticType,
    pub importance: f32,
}

/// A chunk awaiting embedding or FTS indexing
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk_id: String,
    pub title: String,
    pub text: String,
    pub lang: String,
}

/// SQL-enforced candidate filters (window and operator dates included)
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub published_after: Option<DateTime<Utc>>,
    pub published_before: Option<DateTime<Utc>>,
    pub lang: Option<String>,
    /// eTLD+1 domains; None means unrestricted
    pub sources: Option<Vec<String>>,
}

/// One hybrid candidate with its raw semantic and lexical components
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub chunk: Chunk,
    /// 1 - cosine distance, 0 when either side lacks an embedding
    pub similarity: f64,
    /// Cover-density rank normalized to [0,1), 0 when unindexed
    pub lexical: f64,
}

fn chunk_from_row(row: &PgRow) -> Chunk {
    Chunk {
        chunk_id: row.get("chunk_id"),
        article_id: row.get("article_id"),
        chunk_index: row.get("chunk_index"),
        processing_version: row.get("processing_version"),
        text: row.get("text"),
        char_start: row.get("char_start"),
        char_end: row.get("char_end"),
        semantic_type: SemanticType::parse(row.get::<String, _>("semantic_type").as_str()),
        importance: row.get("importance"),
        source_domain: row.get("source_domain"),
        url: row.get("url"),
        title: row.get("title"),
        published_at: row.get("published_at"),
        lang: row.get("lang"),
        category: row.get("category"),
        quality_score: row.get("quality_score"),
        word_count: row.get("word_count"),
    }
}

impl Storage {
    /// Write an article's chunk set and flip `chunking_completed` in one
    /// transaction. Chunks are inserted in index order; `ON CONFLICT DO
    /// NOTHING` makes a re-run at the same processing version a no-op.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_chunk_set(
        &self,
        article_id: i64,
        processing_version: i32,
        source_domain: &str,
        url: &str,
        title: &str,
        published_at: Option<DateTime<Utc>>,
        lang: &str,
        category: Option<&str>,
        quality_score: f32,
        chunks: &[NewChunk],
    ) -> Result<usize> {
        let mut tx = self.pool().begin().await?;
        let mut written = 0usize;

        for chunk in chunks {
            let chunk_id = Chunk::make_id(article_id, chunk.chunk_index);
            let result = sqlx::query(
                "INSERT INTO chunks \
                    (chunk_id, article_id, chunk_index, processing_version, text, \
                     char_start, char_end, semantic_type, importance, \
                     source_domain, url, title, published_at, lang, category, \
                     quality_score, word_count) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
                 ON CONFLICT (article_id, chunk_index, processing_version) DO NOTHING",
            )
            .bind(&chunk_id)
            .bind(article_id)
            .bind(chunk.chunk_index)
            .bind(processing_version)
            .bind(&chunk.text)
            .bind(chunk.char_start)
            .bind(chunk.char_end)
            .bind(chunk.semantic_type.as_str())
            .bind(chunk.importance)
            .bind(source_domain)
            .bind(url)
            .bind(title)
            .bind(published_at)
            .bind(lang)
            .bind(category)
            .bind(quality_score)
            .bind(chunk.text.split_whitespace().count() as i32)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }

        sqlx::query(
            "UPDATE articles SET chunking_completed = TRUE, processing_version = $2 WHERE id = $1",
        )
        .bind(article_id)
        .bind(processing_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(written)
    }

    /// Chunks with no embedding and no permanent-failure flag
    pub async fn chunks_missing_embedding(&self, batch_size: usize) -> Result<Vec<PendingChunk>> {
        let rows = sqlx::query(
            "SELECT chunk_id, title, text, lang FROM chunks \
             WHERE embedding IS NULL AND NOT embedding_failed \
             ORDER BY chunk_id ASC LIMIT $1",
        )
        .bind(batch_size as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| PendingChunk {
                chunk_id: row.get("chunk_id"),
                title: row.get("title"),
                text: row.get("text"),
                lang: row.get("lang"),
            })
            .collect())
    }

    /// Chunks embedded under a different model, for migration re-embedding
    pub async fn chunks_with_stale_model(
        &self,
        current_model: &str,
        batch_size: usize,
    ) -> Result<Vec<PendingChunk>> {
        let rows = sqlx::query(
            "SELECT chunk_id, title, text, lang FROM chunks \
             WHERE embedding IS NOT NULL AND embedding_model IS DISTINCT FROM $1 \
             ORDER BY chunk_id ASC LIMIT $2",
        )
        .bind(current_model)
        .bind(batch_size as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| PendingChunk {
                chunk_id: row.get("chunk_id"),
                title: row.get("title"),
                text: row.get("text"),
                lang: row.get("lang"),
            })
            .collect())
    }

    /// Attach an embedding. Conditional on `embedding IS NULL` so a
    /// concurrent double-write cannot happen; returns whether this call won.
    pub async fn set_embedding(
        &self,
        chunk_id: &str,
        embedding: Vector,
        model: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chunks SET embedding = $2, embedding_model = $3, embed_attempts = 0 \
             WHERE chunk_id = $1 AND embedding IS NULL",
        )
        .bind(chunk_id)
        .bind(embedding)
        .bind(model)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite an embedding during model migration (not conditional)
    pub async fn replace_embedding(
        &self,
        chunk_id: &str,
        embedding: Vector,
        model: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE chunks SET embedding = $2, embedding_model = $3, embed_attempts = 0 \
             WHERE chunk_id = $1",
        )
        .bind(chunk_id)
        .bind(embedding)
        .bind(model)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Count one failed embedding attempt; after `max_attempts` the chunk
    /// is flagged and excluded until an operator clears the flag.
    pub async fn note_embed_failure(&self, chunk_id: &str, max_attempts: i32) -> Result<bool> {
        let row = sqlx::query(
            "UPDATE chunks SET \
                embed_attempts = embed_attempts + 1, \
                embedding_failed = (embed_attempts + 1 >= $2) \
             WHERE chunk_id = $1 \
             RETURNING embedding_failed",
        )
        .bind(chunk_id)
        .bind(max_attempts)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("embedding_failed"))
    }

    /// Update FTS vectors for up to `batch_size` unindexed chunks, choosing
    /// the analyzer by detected language. Returns rows updated.
    pub async fn index_fts_batch(&self, batch_size: usize) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE chunks SET fts = to_tsvector(\
                 CASE WHEN lang = 'ru' THEN 'russian' ELSE 'english' END::regconfig, \
                 title || ' ' || text) \
             WHERE chunk_id IN (\
                 SELECT chunk_id FROM chunks WHERE fts IS NULL LIMIT $1)",
        )
        .bind(batch_size as i64)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// The hybrid candidate fetch: top `limit` chunks by the weighted
    /// semantic+lexical score, under SQL-enforced window/lang/source
    /// filters. Passing no query embedding degrades to FTS-only scoring;
    /// the caller handles the empty-query freshness fallback separately.
    #[allow(clippy::too_many_arguments)]
    pub async fn hybrid_candidates(
        &self,
        query_embedding: Option<Vector>,
        query_text: &str,
        filter: &CandidateFilter,
        w_semantic: f64,
        w_lexical: f64,
        limit: usize,
        embedding_dim: usize,
    ) -> Result<Vec<CandidateRow>> {
        let sql = format!(
            "SELECT * FROM (\
                 SELECT c.*, \
                    CASE WHEN $1::vector IS NULL OR c.embedding IS NULL THEN 0.0 \
                         ELSE 1.0 - (c.embedding::halfvec({dim}) <=> $1::vector::halfvec({dim}))::float8 \
                    END AS similarity, \
                    CASE WHEN c.fts IS NULL OR $2 = '' THEN 0.0 \
                         ELSE ts_rank_cd(c.fts, websearch_to_tsquery(\
                             CASE WHEN c.lang = 'ru' THEN 'russian' ELSE 'english' END::regconfig, $2), 32)::float8 \
                    END AS lexical \
                 FROM chunks c \
                 WHERE ($3::timestamptz IS NULL OR c.published_at >= $3) \
                   AND ($4::timestamptz IS NULL OR c.published_at <= $4) \
                   AND ($5::text IS NULL OR c.lang = $5) \
                   AND ($6::text[] IS NULL OR c.source_domain = ANY($6))\
             ) ranked \
             ORDER BY (ranked.similarity * $7 + ranked.lexical * $8) DESC \
             LIMIT $9",
            dim = embedding_dim
        );

        let rows = sqlx::query(&sql)
            .bind(query_embedding)
            .bind(query_text)
            .bind(filter.published_after)
            .bind(filter.published_before)
            .bind(&filter.lang)
            .bind(&filter.sources)
            .bind(w_semantic)
            .bind(w_lexical)
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .iter()
            .map(|row| CandidateRow {
                chunk: chunk_from_row(row),
                similarity: row.get("similarity"),
                lexical: row.get("lexical"),
            })
            .collect())
    }

    /// Empty-query fallback: most recent chunks in the window
    pub async fn recent_chunks(
        &self,
        filter: &CandidateFilter,
        limit: usize,
    ) -> Result<Vec<CandidateRow>> {
        let rows = sqlx::query(
            "SELECT c.* FROM chunks c \
             WHERE ($1::timestamptz IS NULL OR c.published_at >= $1) \
               AND ($2::timestamptz IS NULL OR c.published_at <= $2) \
               AND ($3::text IS NULL OR c.lang = $3) \
               AND ($4::text[] IS NULL OR c.source_domain = ANY($4)) \
             ORDER BY c.published_at DESC NULLS LAST, c.chunk_id ASC \
             LIMIT $5",
        )
        .bind(filter.published_after)
        .bind(filter.published_before)
        .bind(&filter.lang)
        .bind(&filter.sources)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .iter()
            .map(|row| CandidateRow {
                chunk: chunk_from_row(row),
                similarity: 0.0,
                lexical: 0.0,
            })
            .collect())
    }

    /// Total chunks matching a window filter, for RPC diagnostics
    pub async fn count_chunks_in_window(&self, filter: &CandidateFilter) -> Result<i64> {
        let row = sqlx::query(
            "SELECT count(*) AS n FROM chunks c \
             WHERE ($1::timestamptz IS NULL OR c.published_at >= $1) \
               AND ($2::timestamptz IS NULL OR c.published_at <= $2) \
               AND ($3::text IS NULL OR c.lang = $3) \
               AND ($4::text[] IS NULL OR c.source_domain = ANY($4))",
        )
        .bind(filter.published_after)
        .bind(filter.published_before)
        .bind(&filter.lang)
        .bind(&filter.sources)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("n"))
    }
}
