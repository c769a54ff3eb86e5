//! Configuration for all pipeline services.
//!
//! Structure comes from an optional `newswire.toml`; the documented
//! environment knobs (`FEED_*`, `CHUNK_*`, `EMBED_*`, `FTS_*`, `RANK_*`,
//! `ASK_*`, `DATABASE_URL`, `OPENAI_API_KEY`, `SERVICE_MODE`) override it.
//! Scoring weights and thresholds are additionally hot-reloadable through
//! the persisted `config` table; services overlay those each polling cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{NewswireError, Result};

/// Which continuous service (or serving mode) this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// Feed poller, one cycle
    Poll,
    /// Article worker, one batch
    Work,
    /// Article worker, continuous
    WorkContinuous,
    /// Chunker, one batch
    Chunking,
    /// Chunker, continuous
    ChunkContinuous,
    /// Embedder, continuous
    Embedding,
    /// Re-embed chunks carrying a stale embedding model tag
    OpenaiMigration,
    /// FTS indexer, one batch
    Fts,
    /// FTS indexer, continuous
    FtsContinuous,
    /// Conversational command surface + retrieval RPC + health endpoint
    Bot,
}

impl ServiceMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "poll" => Ok(ServiceMode::Poll),
            "work" => Ok(ServiceMode::Work),
            "work-continuous" => Ok(ServiceMode::WorkContinuous),
            "chunking" => Ok(ServiceMode::Chunking),
            "chunk-continuous" => Ok(ServiceMode::ChunkContinuous),
            "embedding" => Ok(ServiceMode::Embedding),
            "openai-migration" => Ok(ServiceMode::OpenaiMigration),
            "fts" => Ok(ServiceMode::Fts),
            "fts-continuous" => Ok(ServiceMode::FtsContinuous),
            "bot" => Ok(ServiceMode::Bot),
            other => Err(NewswireError::Config(format!(
                "unknown SERVICE_MODE: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::Poll => "poll",
            ServiceMode::Work => "work",
            ServiceMode::WorkContinuous => "work-continuous",
            ServiceMode::Chunking => "chunking",
            ServiceMode::ChunkContinuous => "chunk-continuous",
            ServiceMode::Embedding => "embedding",
            ServiceMode::OpenaiMigration => "openai-migration",
            ServiceMode::Fts => "fts",
            ServiceMode::FtsContinuous => "fts-continuous",
            ServiceMode::Bot => "bot",
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/newswire".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 10,
        }
    }
}

/// Feed poller settings (`FEED_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Feeds considered per cycle
    pub batch_size: usize,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    /// In-cycle retries for transient fetch errors
    pub max_retries: u32,
    /// Admission dedup window for URL hashes
    pub dedup_window_days: i64,
    /// Feeds below this health score are auto-paused
    pub min_health: i32,
    /// Outbound requests per second per origin
    pub per_domain_rps: f64,
    pub user_agent: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            interval_secs: 300,
            request_timeout_secs: 30,
            max_retries: 3,
            dedup_window_days: 7,
            min_health: 50,
            per_domain_rps: 1.0,
            user_agent: "newswire/0.2 (+https://github.com/newswire)".to_string(),
        }
    }
}

/// Article worker settings (`FEED_WORKER_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub interval_secs: u64,
    /// Optimistic lock TTL
    pub lock_ttl_secs: i64,
    pub max_retries: i32,
    /// Articles under this word count are skipped
    pub min_word_count: usize,
    /// Jaccard threshold for same-domain same-day soft dedup
    pub soft_dup_threshold: f64,
    pub fetch_timeout_secs: u64,
    /// In-process fetch/extract workers per batch
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            interval_secs: 30,
            lock_ttl_secs: 3600,
            max_retries: 3,
            min_word_count: 80,
            soft_dup_threshold: 0.85,
            fetch_timeout_secs: 30,
            concurrency: 5,
        }
    }
}

/// Chunker settings (`CHUNK_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub batch_size: usize,
    pub interval_secs: u64,
    /// Ask the LLM for semantic boundaries before falling back to
    /// deterministic paragraph splitting
    pub use_semantic_splitter: bool,
    pub splitter_model: String,
    pub splitter_timeout_secs: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 6000,
            overlap_tokens: 50,
            batch_size: 20,
            interval_secs: 30,
            use_semantic_splitter: true,
            splitter_model: "gpt-5-mini".to_string(),
            splitter_timeout_secs: 30,
        }
    }
}

/// Embedder settings (`EMBED_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    pub model: String,
    /// Deployment-fixed vector dimension; mixing dimensions is forbidden
    pub dimension: usize,
    pub batch_size: usize,
    pub interval_secs: u64,
    /// Provider token limit per input; truncation is tokenizer-accurate
    pub token_limit: usize,
    /// Attempts before a chunk is flagged permanently failed
    pub max_attempts: i32,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-large".to_string(),
            dimension: 3072,
            batch_size: 100,
            interval_secs: 30,
            token_limit: 8191,
            max_attempts: 3,
        }
    }
}

/// FTS indexer settings (`FTS_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsConfig {
    pub batch_size: usize,
    pub interval_secs: u64,
}

impl Default for FtsConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            interval_secs: 60,
        }
    }
}

/// Retrieval scoring settings (`RANK_*`), hot-reloadable via the config table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankConfig {
    pub w_semantic: f64,
    pub w_lexical: f64,
    pub w_freshness: f64,
    pub w_source: f64,
    /// Off-topic guard floor on cosine similarity
    pub min_cosine: f64,
    /// Freshness decay constant, hours
    pub freshness_tau_hours: f64,
    /// Domain diversification cap per eTLD+1
    pub max_per_domain: usize,
    /// Auto-recovery floor: widen the window below this many results
    pub min_results: usize,
    pub default_window_hours: i64,
    pub default_k: usize,
    /// k ceiling used by the last auto-recovery stage
    pub max_k: usize,
    pub lsh_threshold: f64,
    pub cache_ttl_secs: u64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            w_semantic: 0.45,
            w_lexical: 0.30,
            w_freshness: 0.20,
            w_source: 0.05,
            min_cosine: 0.28,
            freshness_tau_hours: 72.0,
            max_per_domain: 2,
            min_results: 3,
            default_window_hours: 7 * 24,
            default_k: 10,
            max_k: 50,
            lsh_threshold: 0.85,
            cache_ttl_secs: 300,
        }
    }
}

impl RankConfig {
    /// Overlay hot-reloadable keys from the persisted config table
    pub fn apply_overlay(&mut self, overlay: &HashMap<String, serde_json::Value>) {
        let f = |v: &serde_json::Value| v.as_f64();
        for (key, value) in overlay {
            match key.as_str() {
                "rank.w_semantic" => self.w_semantic = f(value).unwrap_or(self.w_semantic),
                "rank.w_lexical" => self.w_lexical = f(value).unwrap_or(self.w_lexical),
                "rank.w_freshness" => self.w_freshness = f(value).unwrap_or(self.w_freshness),
                "rank.w_source" => self.w_source = f(value).unwrap_or(self.w_source),
                "rank.min_cosine" => self.min_cosine = f(value).unwrap_or(self.min_cosine),
                "rank.freshness_tau_hours" => {
                    self.freshness_tau_hours = f(value).unwrap_or(self.freshness_tau_hours)
                }
                "rank.max_per_domain" => {
                    if let Some(n) = value.as_u64() {
                        self.max_per_domain = n as usize;
                    }
                }
                "rank.min_results" => {
                    if let Some(n) = value.as_u64() {
                        self.min_results = n as usize;
                    }
                }
                "rank.default_window_hours" => {
                    if let Some(n) = value.as_i64() {
                        self.default_window_hours = n;
                    }
                }
                "rank.lsh_threshold" => self.lsh_threshold = f(value).unwrap_or(self.lsh_threshold),
                _ => {}
            }
        }
    }
}

/// Ask/orchestrator settings (`ASK_*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskConfig {
    pub primary_model: String,
    pub fallback_models: Vec<String>,
    pub max_tokens: u32,
    pub budget_cents: u32,
    pub timeout_secs: u64,
    /// Default agentic depth (1-3)
    pub depth: u8,
    /// General-QA floor budget
    pub general_max_tokens: u32,
    pub general_budget_cents: u32,
    pub general_timeout_secs: u64,
    /// `site:` allow-list of trusted eTLD+1 domains
    pub trusted_domains: Vec<String>,
    pub api_base: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub reasoning_effort: String,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-5".to_string(),
            fallback_models: vec!["gpt-5-mini".to_string(), "gpt-4o-mini".to_string()],
            max_tokens: 8000,
            budget_cents: 50,
            timeout_secs: 60,
            depth: 3,
            general_max_tokens: 2000,
            general_budget_cents: 10,
            general_timeout_secs: 15,
            trusted_domains: default_trusted_domains(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            reasoning_effort: "medium".to_string(),
        }
    }
}

/// Serving surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Top-level configuration shared by every service mode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub chunking: ChunkConfig,
    #[serde(default)]
    pub embedding: EmbedConfig,
    #[serde(default)]
    pub fts: FtsConfig,
    #[serde(default)]
    pub rank: RankConfig,
    #[serde(default)]
    pub ask: AskConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load configuration: optional `newswire.toml`, then environment knobs.
    pub fn load() -> Result<Self> {
        let mut cfg: AppConfig = config::Config::builder()
            .add_source(config::File::with_name("newswire").required(false))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| NewswireError::Config(e.to_string()))?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Apply the documented environment-variable knobs on top of whatever
    /// the file provided.
    pub fn apply_env(&mut self) {
        fn set<T: std::str::FromStr>(slot: &mut T, var: &str) {
            if let Ok(raw) = std::env::var(var) {
                if let Ok(parsed) = raw.parse::<T>() {
                    *slot = parsed;
                }
            }
        }

        set(&mut self.database.url, "DATABASE_URL");
        set(&mut self.database.max_connections, "DATABASE_MAX_CONNECTIONS");

        set(&mut self.poller.batch_size, "FEED_BATCH_SIZE");
        set(&mut self.poller.interval_secs, "FEED_INTERVAL_SECS");
        set(&mut self.poller.dedup_window_days, "FEED_DEDUP_WINDOW_DAYS");
        set(&mut self.poller.per_domain_rps, "FEED_PER_DOMAIN_RPS");
        set(&mut self.poller.min_health, "FEED_MIN_HEALTH");

        set(&mut self.worker.batch_size, "FEED_WORKER_BATCH_SIZE");
        set(&mut self.worker.interval_secs, "FEED_WORKER_INTERVAL_SECS");
        set(&mut self.worker.lock_ttl_secs, "FEED_WORKER_LOCK_TTL_SECS");
        set(&mut self.worker.min_word_count, "FEED_WORKER_MIN_WORDS");

        set(&mut self.chunking.max_tokens, "CHUNK_MAX_TOKENS");
        set(&mut self.chunking.overlap_tokens, "CHUNK_OVERLAP_TOKENS");
        set(&mut self.chunking.batch_size, "CHUNK_BATCH_SIZE");
        set(&mut self.chunking.interval_secs, "CHUNK_INTERVAL_SECS");
        set(
            &mut self.chunking.use_semantic_splitter,
            "CHUNK_USE_SEMANTIC_SPLITTER",
        );

        set(&mut self.embedding.model, "EMBED_MODEL");
        set(&mut self.embedding.dimension, "EMBED_DIMENSION");
        set(&mut self.embedding.batch_size, "EMBED_BATCH_SIZE");
        set(&mut self.embedding.interval_secs, "EMBED_INTERVAL_SECS");
        set(&mut self.embedding.token_limit, "EMBED_TOKEN_LIMIT");

        set(&mut self.fts.batch_size, "FTS_BATCH_SIZE");
        set(&mut self.fts.interval_secs, "FTS_INTERVAL_SECS");

        set(&mut self.rank.w_semantic, "RANK_W_SEMANTIC");
        set(&mut self.rank.w_lexical, "RANK_W_LEXICAL");
        set(&mut self.rank.w_freshness, "RANK_W_FRESHNESS");
        set(&mut self.rank.w_source, "RANK_W_SOURCE");
        set(&mut self.rank.min_cosine, "RANK_MIN_COSINE");
        set(&mut self.rank.max_per_domain, "RANK_MAX_PER_DOMAIN");
        set(&mut self.rank.min_results, "RANK_MIN_RESULTS");
        set(&mut self.rank.default_window_hours, "RANK_DEFAULT_WINDOW_HOURS");
        set(&mut self.rank.default_k, "RANK_DEFAULT_K");
        set(&mut self.rank.cache_ttl_secs, "RANK_CACHE_TTL_SECS");

        set(&mut self.ask.primary_model, "ASK_PRIMARY_MODEL");
        set(&mut self.ask.max_tokens, "ASK_MAX_TOKENS");
        set(&mut self.ask.budget_cents, "ASK_BUDGET_CENTS");
        set(&mut self.ask.timeout_secs, "ASK_TIMEOUT_SECS");
        set(&mut self.ask.depth, "ASK_DEPTH");
        set(&mut self.ask.api_base, "ASK_API_BASE");
        set(&mut self.ask.reasoning_effort, "ASK_REASONING_EFFORT");
        set(&mut self.ask.api_key, "OPENAI_API_KEY");
        if let Ok(models) = std::env::var("ASK_FALLBACK_MODELS") {
            self.ask.fallback_models = models
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }

        set(&mut self.api.host, "API_HOST");
        set(&mut self.api.port, "API_PORT");
    }

    /// Read SERVICE_MODE from the environment
    pub fn service_mode() -> Result<ServiceMode> {
        let raw = std::env::var("SERVICE_MODE")
            .map_err(|_| NewswireError::Config("SERVICE_MODE is not set".to_string()))?;
        ServiceMode::parse(&raw)
    }
}

/// Default `site:` allow-list. Subdomains are normalized to eTLD+1 before
/// matching, so entries are bare registrable domains.
fn default_trusted_domains() -> Vec<String> {
    [
        "bbc.com", "bbc.co.uk", "cnn.com", "reuters.com", "apnews.com", "bloomberg.com",
        "ft.com", "wsj.com", "nytimes.com", "washingtonpost.com", "theguardian.com",
        "economist.com", "politico.com", "politico.eu", "axios.com", "npr.org", "pbs.org",
        "aljazeera.com", "dw.com", "france24.com", "euronews.com", "europa.eu", "un.org",
        "whitehouse.gov", "congress.gov", "supremecourt.gov", "state.gov", "treasury.gov",
        "sec.gov", "fda.gov", "cdc.gov", "who.int", "imf.org", "worldbank.org", "oecd.org",
        "nature.com", "science.org", "scientificamerican.com", "technologyreview.com",
        "wired.com", "arstechnica.com", "theverge.com", "techcrunch.com", "venturebeat.com",
        "theinformation.com", "semafor.com", "forbes.com", "fortune.com", "cnbc.com",
        "marketwatch.com", "barrons.com", "latimes.com", "chicagotribune.com", "bostonglobe.com",
        "seattletimes.com", "usatoday.com", "time.com", "newsweek.com", "theatlantic.com",
        "newyorker.com", "vox.com", "slate.com", "propublica.org", "theintercept.com",
        "foreignpolicy.com", "foreignaffairs.com", "defense.gov", "nasa.gov", "esa.int",
        "meduza.io", "rbc.ru", "kommersant.ru", "interfax.ru", "tass.ru",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_mode_round_trip() {
        for mode in [
            ServiceMode::Poll,
            ServiceMode::Work,
            ServiceMode::WorkContinuous,
            ServiceMode::Chunking,
            ServiceMode::ChunkContinuous,
            ServiceMode::Embedding,
            ServiceMode::OpenaiMigration,
            ServiceMode::Fts,
            ServiceMode::FtsContinuous,
            ServiceMode::Bot,
        ] {
            assert_eq!(ServiceMode::parse(mode.as_str()).unwrap(), mode);
        }
        assert!(ServiceMode::parse("nope").is_err());
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let rank = RankConfig::default();
        let sum = rank.w_semantic + rank.w_lexical + rank.w_freshness + rank.w_source;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rank_overlay() {
        let mut rank = RankConfig::default();
        let mut overlay = HashMap::new();
        overlay.insert("rank.min_cosine".to_string(), serde_json::json!(0.4));
        overlay.insert("rank.max_per_domain".to_string(), serde_json::json!(3));
        overlay.insert("rank.unknown_key".to_string(), serde_json::json!("ignored"));
        rank.apply_overlay(&overlay);
        assert!((rank.min_cosine - 0.4).abs() < 1e-9);
        assert_eq!(rank.max_per_domain, 3);
    }

    #[test]
    fn test_trusted_domains_have_roughly_seventy_entries() {
        let domains = default_trusted_domains();
        assert!(domains.len() >= 60 && domains.len() <= 80);
    }
}
