//! Embedder: attaches dense vectors to chunks that lack one.
//!
//! Inputs are truncated to the provider's token limit with the model's own
//! tokenizer, never by character count. Writes are conditional on
//! `embedding IS NULL`, so a concurrent embedder cannot double-write.

use chrono::Utc;
use pgvector::Vector;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, error, info, warn};

use crate::config::EmbedConfig;
use crate::error::{ErrorDisposition, LlmError, NewswireError, Result};
use crate::llm::ProviderManager;
use crate::storage::{PendingChunk, Storage};
use crate::types::BatchRun;

/// Outcome counters for one embedding batch
#[derive(Debug, Default, Clone)]
pub struct EmbedStats {
    pub requested: usize,
    pub embedded: usize,
    pub truncated: usize,
    pub failed: usize,
    pub flagged_permanent: usize,
}

pub struct Embedder {
    storage: Storage,
    provider: Arc<ProviderManager>,
    config: EmbedConfig,
    bpe: CoreBPE,
    worker_id: String,
}

impl Embedder {
    pub fn new(
        storage: Storage,
        provider: Arc<ProviderManager>,
        config: EmbedConfig,
        worker_id: String,
    ) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| NewswireError::Config(format!("tokenizer init failed: {e}")))?;
        Ok(Self {
            storage,
            provider,
            config,
            bpe,
            worker_id,
        })
    }

    /// Embed one batch of chunks missing a vector.
    ///
    /// Fatal provider errors (persistent auth) propagate and halt the
    /// service; everything else is absorbed into per-chunk attempt counts.
    pub async fn process_batch(&self) -> Result<EmbedStats> {
        let pending = self
            .storage
            .chunks_missing_embedding(self.config.batch_size)
            .await?;
        self.embed_pending(pending, false).await
    }

    /// Migration pass: re-embed chunks whose stored vector came from a
    /// different model than the configured one.
    pub async fn migrate_batch(&self) -> Result<EmbedStats> {
        let pending = self
            .storage
            .chunks_with_stale_model(&self.config.model, self.config.batch_size)
            .await?;
        self.embed_pending(pending, true).await
    }

    async fn embed_pending(&self, pending: Vec<PendingChunk>, replace: bool) -> Result<EmbedStats> {
        let started_at = Utc::now();
        let mut stats = EmbedStats {
            requested: pending.len(),
            ..EmbedStats::default()
        };
        if pending.is_empty() {
            return Ok(stats);
        }

        let mut inputs = Vec::with_capacity(pending.len());
        for chunk in &pending {
            let text = format!("{}\n{}", chunk.title, chunk.text);
            let (text, was_truncated) = self.truncate_to_limit(&text);
            if was_truncated {
                stats.truncated += 1;
            }
            inputs.push(text);
        }

        let response = match self.provider.embed(&self.config.model, &inputs).await {
            Ok(r) => r,
            Err(e) if e.disposition() == ErrorDisposition::Fatal => {
                error!(error = %e, "fatal embedding provider error, halting embedder");
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, batch = pending.len(), "embedding batch failed");
                for chunk in &pending {
                    let flagged = self
                        .storage
                        .note_embed_failure(&chunk.chunk_id, self.config.max_attempts)
                        .await?;
                    stats.failed += 1;
                    if flagged {
                        stats.flagged_permanent += 1;
                        warn!(chunk_id = %chunk.chunk_id, "chunk flagged permanently failed");
                    }
                }
                self.record(&stats, started_at).await?;
                return Ok(stats);
            }
        };

        for (chunk, vector) in pending.iter().zip(response.vectors.into_iter()) {
            if vector.len() != self.config.dimension {
                // Dimension drift would poison the index; treat as fatal.
                return Err(NewswireError::Llm(LlmError::InvalidResponse(format!(
                    "embedding dimension {} != deployment dimension {}",
                    vector.len(),
                    self.config.dimension
                ))));
            }
            let vector = Vector::from(vector);
            if replace {
                self.storage
                    .replace_embedding(&chunk.chunk_id, vector, &self.config.model)
                    .await?;
                stats.embedded += 1;
            } else if self
                .storage
                .set_embedding(&chunk.chunk_id, vector, &self.config.model)
                .await?
            {
                stats.embedded += 1;
            } else {
                debug!(chunk_id = %chunk.chunk_id, "embedding already present, write skipped");
            }
        }

        info!(
            embedded = stats.embedded,
            truncated = stats.truncated,
            "embedding batch finished"
        );
        self.record(&stats, started_at).await?;
        Ok(stats)
    }

    /// Token-accurate truncation to the provider limit
    fn truncate_to_limit(&self, text: &str) -> (String, bool) {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= self.config.token_limit {
            return (text.to_string(), false);
        }
        let truncated = self
            .bpe
            .decode(tokens[..self.config.token_limit].to_vec())
            .unwrap_or_else(|_| text.chars().take(self.config.token_limit * 2).collect());
        (truncated, true)
    }

    async fn record(&self, stats: &EmbedStats, started_at: chrono::DateTime<Utc>) -> Result<()> {
        self.storage
            .record_batch_run(&BatchRun {
                stage: "embedding".to_string(),
                worker_id: self.worker_id.clone(),
                started_at,
                finished_at: Utc::now(),
                input_count: stats.requested as i32,
                ok_count: stats.embedded as i32,
                error_count: stats.failed as i32,
                errors: serde_json::json!({}),
                p50_ms: None,
                p95_ms: None,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_is_token_accurate() {
        let bpe = tiktoken_rs::cl100k_base().unwrap();
        let text = vec!["token"; 200].join(" ");
        let config = EmbedConfig {
            token_limit: 50,
            ..EmbedConfig::default()
        };
        // Exercise the truncation arithmetic without a storage handle.
        let tokens = bpe.encode_with_special_tokens(&text);
        assert!(tokens.len() > config.token_limit);
        let cut = bpe.decode(tokens[..config.token_limit].to_vec()).unwrap();
        assert!(bpe.encode_with_special_tokens(&cut).len() <= config.token_limit);
        assert!(text.starts_with(cut.trim_end()));
    }
}
