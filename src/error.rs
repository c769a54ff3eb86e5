//! Error handling for the newswire pipeline

use thiserror::Error;

/// Result type alias for the pipeline
pub type Result<T> = std::result::Result<T, NewswireError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum NewswireError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Budget exhausted: {0}")]
    Budget(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors from chat/embedding provider calls, carrying the upstream kind
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: operation took too long")]
    Timeout,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("All providers failed")]
    AllProvidersFailed,
}

/// Errors from feed polling and parsing
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Malformed feed at {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Per-domain rate budget exceeded for {0}")]
    RateDeferred(String),
}

/// Errors from article fetch and content extraction
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Empty or unparseable body")]
    EmptyBody,

    #[error("Body below minimum length: {words} words")]
    UnderLength { words: usize },

    #[error("Paywall detected")]
    Paywall,
}

/// What a failure means for the work item that produced it (spec-level
/// taxonomy, not a type hierarchy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Transient upstream failure: retry with backoff, degrade health.
    Retry,
    /// Permanent failure: mark skipped with a reason, no retry.
    Skip,
    /// Budget/governor decision: structured error, partial result allowed.
    Budget,
    /// Caller sent a malformed request: structured 400.
    Validation,
    /// Persistent provider failure: stop the affected service.
    Fatal,
}

impl NewswireError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.disposition(), ErrorDisposition::Retry)
    }

    /// Map the error onto the failure taxonomy
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            NewswireError::Llm(LlmError::RateLimit(_))
            | NewswireError::Llm(LlmError::Timeout)
            | NewswireError::Llm(LlmError::ConnectionFailed(_))
            | NewswireError::Http(_)
            | NewswireError::Database(_) => ErrorDisposition::Retry,

            NewswireError::Llm(LlmError::Auth(_)) => ErrorDisposition::Fatal,

            NewswireError::Feed(FeedError::FetchFailed { .. }) => ErrorDisposition::Retry,
            NewswireError::Feed(FeedError::HttpStatus { status, .. }) => {
                if *status == 429 || *status >= 500 {
                    ErrorDisposition::Retry
                } else {
                    ErrorDisposition::Skip
                }
            }
            NewswireError::Feed(_) => ErrorDisposition::Skip,

            NewswireError::Extract(ExtractError::FetchFailed(_)) => ErrorDisposition::Retry,
            NewswireError::Extract(_) => ErrorDisposition::Skip,

            NewswireError::Budget(_) => ErrorDisposition::Budget,
            NewswireError::Validation(_) => ErrorDisposition::Validation,

            _ => ErrorDisposition::Skip,
        }
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            NewswireError::Llm(_) => "llm",
            NewswireError::Feed(_) => "feed",
            NewswireError::Extract(_) => "extract",
            NewswireError::Config(_) => "config",
            NewswireError::Budget(_) => "budget",
            NewswireError::Validation(_) => "validation",
            NewswireError::Io(_) => "io",
            NewswireError::Serialization(_) => "serialization",
            NewswireError::Http(_) => "http",
            NewswireError::Database(_) => "database",
            NewswireError::Generic(_) => "generic",
            NewswireError::NotFound(_) => "not_found",
        }
    }
}
