//! FTS indexer: backfills tsvector columns over title + text.
//!
//! The analyzer is chosen per chunk by detected language (english with
//! unicode folding by default, russian at high-confidence detections);
//! the choice is baked into the UPDATE statement in the storage layer.

use chrono::Utc;
use tracing::info;

use crate::config::FtsConfig;
use crate::error::Result;
use crate::storage::Storage;
use crate::types::BatchRun;

pub struct FtsIndexer {
    storage: Storage,
    config: FtsConfig,
    worker_id: String,
}

impl FtsIndexer {
    pub fn new(storage: Storage, config: FtsConfig, worker_id: String) -> Self {
        Self {
            storage,
            config,
            worker_id,
        }
    }

    /// Index one batch of unindexed chunks; returns rows updated
    pub async fn process_batch(&self) -> Result<u64> {
        let started_at = Utc::now();
        let updated = self.storage.index_fts_batch(self.config.batch_size).await?;
        if updated > 0 {
            info!(updated, "fts batch finished");
        }
        self.storage
            .record_batch_run(&BatchRun {
                stage: "fts".to_string(),
                worker_id: self.worker_id.clone(),
                started_at,
                finished_at: Utc::now(),
                input_count: updated as i32,
                ok_count: updated as i32,
                error_count: 0,
                errors: serde_json::json!({}),
                p50_ms: None,
                p95_ms: None,
            })
            .await?;
        Ok(updated)
    }
}
