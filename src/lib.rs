//! newswire: continuous RSS ingestion, hybrid semantic+lexical retrieval,
//! and agentic RAG over a Postgres chunk store.
//!
//! The pipeline is a fleet of independent long-running processes sharing
//! one binary; `SERVICE_MODE` selects the service. Coordination happens
//! entirely through storage: work is claimed with expiring optimistic
//! locks, state transitions are persisted per item, and every stage is
//! crash-safe and idempotent.
//!
//! # Stages
//!
//! - [`ingest::FeedPoller`]: conditional GET over due feeds, candidate admission
//! - [`ingest::ArticleWorker`]: fetch, extract, dedup, canonical store
//! - [`ingest::Chunker`]: semantic/deterministic splitting into chunks
//! - [`ingest::Embedder`]: batched dense-vector embedding
//! - [`ingest::FtsIndexer`]: lexical index backfill
//! - [`retrieve::HybridRetriever`]: scored hybrid retrieval with auto-recovery
//! - [`ask::AskOrchestrator`]: intent-routed agentic question answering

pub mod api;
pub mod ask;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod ratelimit;
pub mod retrieve;
pub mod service;
pub mod storage;
pub mod types;
pub mod urls;

pub use config::{AppConfig, ServiceMode};
pub use error::{NewswireError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
