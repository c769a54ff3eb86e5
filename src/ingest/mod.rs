//! Ingestion pipeline: feed polling, article processing, chunking,
//! embedding, and FTS indexing. Each stage is a continuous service
//! coordinated only through storage.

pub mod chunker;
pub mod embedder;
pub mod extract;
pub mod fts;
pub mod poller;
pub mod worker;

pub use chunker::Chunker;
pub use embedder::Embedder;
pub use fts::FtsIndexer;
pub use poller::FeedPoller;
pub use worker::ArticleWorker;
