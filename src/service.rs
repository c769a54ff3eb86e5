//! Service launcher: builds components for the configured `SERVICE_MODE`
//! and runs the matching one-shot batch or continuous loop.
//!
//! Continuous loops finish the current batch on shutdown; locks either
//! release explicitly or lapse through their expiry.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::ask::AskOrchestrator;
use crate::commands::CommandHandler;
use crate::config::{AppConfig, ServiceMode};
use crate::error::{ErrorDisposition, Result};
use crate::ingest::{ArticleWorker, Chunker, Embedder, FeedPoller, FtsIndexer};
use crate::llm::{OpenAiClient, ProviderManager};
use crate::retrieve::{HybridRetriever, RetrievalCache};
use crate::storage::Storage;

/// Per-process worker identifier baked into locks and batch-run rows
fn worker_id(stage: &str) -> String {
    format!("{stage}-{}", uuid::Uuid::new_v4().simple())
}

fn build_provider(config: &AppConfig) -> Result<Arc<ProviderManager>> {
    let client = Arc::new(OpenAiClient::new(
        config.ask.api_base.clone(),
        config.ask.api_key.clone(),
    )?);
    Ok(Arc::new(ProviderManager::new(
        client.clone(),
        client,
        config.ask.primary_model.clone(),
        config.ask.fallback_models.clone(),
    )))
}

/// Run the process in the given mode until completion or shutdown
pub async fn run(mode: ServiceMode, config: AppConfig) -> Result<()> {
    info!(mode = mode.as_str(), "starting service");
    let storage = Storage::connect(&config.database, config.embedding.dimension).await?;

    match mode {
        ServiceMode::Poll => {
            let poller = Arc::new(FeedPoller::new(
                storage,
                config.poller.clone(),
                worker_id("poll"),
            )?);
            let interval = config.poller.interval_secs;
            run_continuous("poll", interval, move || {
                let poller = Arc::clone(&poller);
                async move { poller.poll_once().await.map(|_| ()) }
            })
            .await
        }
        ServiceMode::Work => {
            let worker = ArticleWorker::new(storage, config.worker.clone(), worker_id("work"))?;
            worker.process_batch().await.map(|stats| {
                info!(?stats, "one-shot worker batch done");
            })
        }
        ServiceMode::WorkContinuous => {
            let worker = Arc::new(ArticleWorker::new(
                storage,
                config.worker.clone(),
                worker_id("work"),
            )?);
            let interval = config.worker.interval_secs;
            run_continuous("work", interval, move || {
                let worker = Arc::clone(&worker);
                async move { worker.process_batch().await.map(|_| ()) }
            })
            .await
        }
        ServiceMode::Chunking | ServiceMode::ChunkContinuous => {
            let splitter = if config.chunking.use_semantic_splitter {
                Some(build_provider(&config)?)
            } else {
                None
            };
            let chunker = Chunker::new(
                storage,
                splitter,
                config.chunking.clone(),
                worker_id("chunk"),
            )?;
            if mode == ServiceMode::Chunking {
                return chunker.process_batch().await.map(|stats| {
                    info!(?stats, "one-shot chunking batch done");
                });
            }
            let chunker = Arc::new(chunker);
            let interval = config.chunking.interval_secs;
            run_continuous("chunking", interval, move || {
                let chunker = Arc::clone(&chunker);
                async move { chunker.process_batch().await.map(|_| ()) }
            })
            .await
        }
        ServiceMode::Embedding => {
            let provider = build_provider(&config)?;
            let embedder = Embedder::new(
                storage,
                provider,
                config.embedding.clone(),
                worker_id("embed"),
            )?;
            let embedder = Arc::new(embedder);
            let interval = config.embedding.interval_secs;
            run_continuous("embedding", interval, move || {
                let embedder = Arc::clone(&embedder);
                async move { embedder.process_batch().await.map(|_| ()) }
            })
            .await
        }
        ServiceMode::OpenaiMigration => {
            let provider = build_provider(&config)?;
            let embedder = Embedder::new(
                storage,
                provider,
                config.embedding.clone(),
                worker_id("migrate"),
            )?;
            // Run to completion: stop once a pass finds nothing stale.
            loop {
                let stats = embedder.migrate_batch().await?;
                if stats.requested == 0 {
                    info!("embedding migration complete");
                    return Ok(());
                }
                info!(migrated = stats.embedded, "migration batch done");
            }
        }
        ServiceMode::Fts => {
            let indexer = FtsIndexer::new(storage, config.fts.clone(), worker_id("fts"));
            indexer.process_batch().await.map(|updated| {
                info!(updated, "one-shot fts batch done");
            })
        }
        ServiceMode::FtsContinuous => {
            let indexer = Arc::new(FtsIndexer::new(storage, config.fts.clone(), worker_id("fts")));
            let interval = config.fts.interval_secs;
            run_continuous("fts", interval, move || {
                let indexer = Arc::clone(&indexer);
                async move { indexer.process_batch().await.map(|_| ()) }
            })
            .await
        }
        ServiceMode::Bot => run_bot(storage, config).await,
    }
}

/// Bot mode: retrieval RPC, health endpoint, and the structured command
/// surface behind one HTTP server.
async fn run_bot(storage: Storage, config: AppConfig) -> Result<()> {
    let provider = build_provider(&config)?;
    let retriever = Arc::new(HybridRetriever::new(
        storage.clone(),
        Some(Arc::clone(&provider)),
        config.rank.clone(),
        config.embedding.model.clone(),
        config.embedding.dimension,
        config.ask.trusted_domains.clone(),
    ));
    let orchestrator = Arc::new(AskOrchestrator::new(
        Arc::clone(&retriever),
        Arc::clone(&provider),
        config.ask.clone(),
        config.rank.default_window_hours,
        config.rank.default_k,
    ));
    let commands = Arc::new(CommandHandler::new(
        storage.clone(),
        Arc::clone(&retriever),
        orchestrator,
        Arc::clone(&provider),
        config.rank.clone(),
        config
            .ask
            .fallback_models
            .first()
            .cloned()
            .unwrap_or_else(|| config.ask.primary_model.clone()),
    ));

    let state = AppState {
        storage,
        retriever,
        cache: Arc::new(RetrievalCache::new(config.rank.cache_ttl_secs)),
        commands: Some(commands),
        default_window_hours: config.rank.default_window_hours,
        default_k: config.rank.default_k,
    };

    tokio::select! {
        result = api::serve(state, &config.api.host, config.api.port) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}

/// Generic continuous-service loop: one batch per cycle, sleep between
/// cycles, stop cleanly on ctrl-c. Fatal errors stop the service;
/// everything else is logged and the loop continues.
async fn run_continuous<F, Fut>(name: &str, interval_secs: u64, mut tick: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        match tick().await {
            Ok(()) => {}
            Err(e) if e.disposition() == ErrorDisposition::Fatal => {
                error!(service = name, error = %e, "fatal error, stopping service");
                return Err(e);
            }
            Err(e) => {
                warn!(service = name, error = %e, "batch failed, continuing");
            }
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!(service = name, "shutdown signal received, exiting after batch");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
        }
    }
}
