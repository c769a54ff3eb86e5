//! Chunker: splits finalized article text into retrieval chunks.
//!
//! A semantic splitter (LLM) is tried first when configured; any parsing
//! or validation failure falls back to deterministic paragraph splitting.
//! Either way the chunk set is committed in one transaction and the
//! operation is idempotent per `(article_id, processing_version)`.

use chrono::Utc;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, info, warn};

use crate::config::ChunkConfig;
use crate::error::{NewswireError, Result};
use crate::llm::{system_message, user_message, GenerationOptions, ProviderManager};
use crate::storage::{NewChunk, Storage};
use crate::types::{Article, BatchRun, SemanticType};

/// Outcome counters for one chunking batch
#[derive(Debug, Default, Clone)]
pub struct ChunkStats {
    pub articles: usize,
    pub chunks_written: usize,
    pub semantic_splits: usize,
    pub fallback_splits: usize,
    pub failures: usize,
}

pub struct Chunker {
    storage: Storage,
    splitter: Option<Arc<ProviderManager>>,
    config: ChunkConfig,
    bpe: CoreBPE,
    worker_id: String,
}

impl Chunker {
    pub fn new(
        storage: Storage,
        splitter: Option<Arc<ProviderManager>>,
        config: ChunkConfig,
        worker_id: String,
    ) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| NewswireError::Config(format!("tokenizer init failed: {e}")))?;
        Ok(Self {
            storage,
            splitter,
            config,
            bpe,
            worker_id,
        })
    }

    /// Chunk one batch of ready articles
    pub async fn process_batch(&self) -> Result<ChunkStats> {
        let started_at = Utc::now();
        let articles = self
            .storage
            .articles_ready_for_chunking(self.config.batch_size)
            .await?;
        let mut stats = ChunkStats {
            articles: articles.len(),
            ..ChunkStats::default()
        };

        for article in &articles {
            match self.chunk_article(article, &mut stats).await {
                Ok(written) => stats.chunks_written += written,
                Err(e) => {
                    stats.failures += 1;
                    warn!(article_id = article.id, error = %e, "chunking failed");
                }
            }
        }

        if stats.articles > 0 {
            info!(
                articles = stats.articles,
                chunks = stats.chunks_written,
                semantic = stats.semantic_splits,
                fallback = stats.fallback_splits,
                "chunking batch finished"
            );
        }

        self.storage
            .record_batch_run(&BatchRun {
                stage: "chunking".to_string(),
                worker_id: self.worker_id.clone(),
                started_at,
                finished_at: Utc::now(),
                input_count: stats.articles as i32,
                ok_count: (stats.articles - stats.failures) as i32,
                error_count: stats.failures as i32,
                errors: serde_json::json!({}),
                p50_ms: None,
                p95_ms: None,
            })
            .await?;

        Ok(stats)
    }

    async fn chunk_article(&self, article: &Article, stats: &mut ChunkStats) -> Result<usize> {
        if article.clean_text.trim().is_empty() {
            return Err(NewswireError::Validation(format!(
                "article {} has no text to chunk",
                article.id
            )));
        }

        let mut chunks = match self.semantic_split(article).await {
            Some(chunks) => {
                stats.semantic_splits += 1;
                chunks
            }
            None => {
                stats.fallback_splits += 1;
                split_paragraphs(
                    &self.bpe,
                    &article.clean_text,
                    self.config.max_tokens,
                    self.config.overlap_tokens,
                )
            }
        };
        assign_structural_types(&mut chunks);

        debug!(article_id = article.id, chunks = chunks.len(), "chunk set ready");
        self.storage
            .insert_chunk_set(
                article.id,
                article.processing_version,
                &article.source_domain,
                &article.canonical_url,
                &article.title,
                article.published_at,
                &article.lang,
                article.category.as_deref(),
                article.quality_score,
                &chunks,
            )
            .await
    }

    /// Ask the configured splitter model for semantic boundaries. Returns
    /// None (fall back) on any transport, parse, or validation problem.
    async fn semantic_split(&self, article: &Article) -> Option<Vec<NewChunk>> {
        if !self.config.use_semantic_splitter {
            return None;
        }
        let splitter = self.splitter.as_ref()?;

        let options = GenerationOptions {
            model: self.config.splitter_model.clone(),
            max_tokens: 8000,
            timeout_secs: self.config.splitter_timeout_secs,
            reasoning_effort: None,
        };
        let messages = [
            system_message(
                "Split the article into semantically coherent chunks. Respond with JSON: \
                 an array of objects with fields `text` (required), `type` (one of intro, \
                 body, list, conclusion, quote) and `importance` (0..1). Do not rewrite \
                 or summarize; chunk texts must be verbatim spans of the input.",
            ),
            user_message(article.clean_text.clone()),
        ];

        let response = match splitter.generate(&messages, &options).await {
            Ok(r) => r,
            Err(e) => {
                debug!(article_id = article.id, error = %e, "semantic splitter unavailable");
                return None;
            }
        };

        let chunks = parse_splitter_output(&response.text)?;
        self.validate_semantic_chunks(article, chunks)
    }

    /// Accept the splitter output only if every chunk is non-empty, within
    /// the token bound, and offsets can be anchored in the article text.
    fn validate_semantic_chunks(
        &self,
        article: &Article,
        parsed: Vec<SplitterChunk>,
    ) -> Option<Vec<NewChunk>> {
        if parsed.is_empty() {
            return None;
        }

        let mut chunks = Vec::with_capacity(parsed.len());
        let mut cursor = 0usize;
        for (index, piece) in parsed.into_iter().enumerate() {
            let text = piece.text.trim().to_string();
            if text.is_empty() {
                return None;
            }
            if self.bpe.encode_with_special_tokens(&text).len() > self.config.max_tokens {
                return None;
            }
            let start = match article.clean_text[cursor.min(article.clean_text.len())..]
                .find(&text)
            {
                Some(offset) => cursor + offset,
                None => article.clean_text.find(&text)?,
            };
            cursor = start + text.len();

            chunks.push(NewChunk {
                chunk_index: index as i32,
                char_start: start as i32,
                char_end: (start + text.len()) as i32,
                semantic_type: piece
                    .kind
                    .as_deref()
                    .map(SemanticType::parse)
                    .unwrap_or(SemanticType::Body),
                importance: piece.importance.unwrap_or(0.5).clamp(0.0, 1.0),
                text,
            });
        }
        Some(chunks)
    }
}

#[derive(Debug)]
struct SplitterChunk {
    text: String,
    kind: Option<String>,
    importance: Option<f32>,
}

fn splitter_chunk_from_value(value: &serde_json::Value) -> Option<SplitterChunk> {
    let obj = value.as_object()?;
    Some(SplitterChunk {
        text: obj.get("text")?.as_str()?.to_string(),
        kind: obj.get("type").and_then(|t| t.as_str()).map(str::to_string),
        importance: obj
            .get("importance")
            .and_then(|i| i.as_f64())
            .map(|i| i as f32),
    })
}

/// Parse splitter output, accepting all three shapes the model is known to
/// produce: a JSON array of chunk objects, an object with a `chunks`
/// array, or a single chunk object.
fn parse_splitter_output(raw: &str) -> Option<Vec<SplitterChunk>> {
    // Models wrap JSON in fences often enough to be worth stripping.
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    match &value {
        serde_json::Value::Array(items) => items.iter().map(splitter_chunk_from_value).collect(),
        serde_json::Value::Object(obj) => {
            if let Some(serde_json::Value::Array(items)) = obj.get("chunks") {
                items.iter().map(splitter_chunk_from_value).collect()
            } else {
                splitter_chunk_from_value(&value).map(|c| vec![c])
            }
        }
        _ => None,
    }
}

/// First chunk is the intro; the last is the conclusion once there are more
/// than two. Splitter-assigned list/quote types are preserved.
fn assign_structural_types(chunks: &mut [NewChunk]) {
    let n = chunks.len();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        if matches!(chunk.semantic_type, SemanticType::List | SemanticType::Quote) {
            continue;
        }
        chunk.semantic_type = if i == 0 {
            SemanticType::Intro
        } else if i == n - 1 && n > 2 {
            SemanticType::Conclusion
        } else {
            SemanticType::Body
        };
    }
}

/// Deterministic splitter: accumulate paragraphs up to the token budget,
/// breaking oversized paragraphs on sentence boundaries, with a fixed
/// token overlap carried between adjacent chunks.
pub fn split_paragraphs(
    bpe: &CoreBPE,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<NewChunk> {
    let token_len = |s: &str| bpe.encode_with_special_tokens(s).len();

    // Reserve room for the decoded overlap prefix (and its re-encoding
    // slack) so a composed chunk never crosses `max_tokens`.
    let overlap = overlap_tokens.min(max_tokens / 4);
    let budget = max_tokens.saturating_sub(overlap * 2).max(1);

    // Pieces are (char_start, text) spans that never exceed the budget.
    let mut pieces: Vec<(usize, String)> = Vec::new();
    let mut offset = 0usize;
    for paragraph in text.split("\n\n") {
        let para_start = offset;
        offset += paragraph.len() + 2;
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lead = paragraph.len() - paragraph.trim_start().len();
        if token_len(trimmed) <= budget {
            pieces.push((para_start + lead, trimmed.to_string()));
        } else {
            pieces.extend(split_sentences(bpe, trimmed, budget, para_start + lead));
        }
    }

    let mut chunks: Vec<NewChunk> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_start = 0usize;
    let mut buffer_end = 0usize;
    let mut overlap_prefix = String::new();

    let flush = |chunks: &mut Vec<NewChunk>,
                 buffer: &str,
                 overlap_prefix: &str,
                 start: usize,
                 end: usize| {
        let body = buffer.trim();
        if body.is_empty() {
            return;
        }
        let text = if overlap_prefix.is_empty() {
            body.to_string()
        } else {
            format!("{overlap_prefix}\n{body}")
        };
        chunks.push(NewChunk {
            chunk_index: chunks.len() as i32,
            char_start: start.saturating_sub(overlap_prefix.len()) as i32,
            char_end: end as i32,
            semantic_type: SemanticType::Body,
            importance: 0.5,
            text,
        });
    };

    for (start, piece) in pieces {
        let candidate = if buffer.is_empty() {
            piece.clone()
        } else {
            format!("{buffer}\n\n{piece}")
        };
        if !buffer.is_empty() && token_len(&candidate) > budget {
            flush(&mut chunks, &buffer, &overlap_prefix, buffer_start, buffer_end);
            overlap_prefix = token_tail(bpe, &buffer, overlap);
            buffer = piece.clone();
            buffer_start = start;
        } else {
            if buffer.is_empty() {
                buffer_start = start;
            }
            buffer = candidate;
        }
        buffer_end = start + piece.len();
    }
    flush(&mut chunks, &buffer, &overlap_prefix, buffer_start, buffer_end);

    chunks
}

/// Sentence-level split for paragraphs over the budget; a single oversized
/// sentence is hard-cut on token windows.
fn split_sentences(
    bpe: &CoreBPE,
    paragraph: &str,
    max_tokens: usize,
    base_offset: usize,
) -> Vec<(usize, String)> {
    let mut sentences: Vec<(usize, String)> = Vec::new();
    let mut start = 0usize;
    let bytes = paragraph.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        let at_break = matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).map_or(true, |n| n.is_ascii_whitespace());
        if at_break {
            let end = i + 1;
            if paragraph.is_char_boundary(start) && paragraph.is_char_boundary(end) {
                let s = paragraph[start..end].trim();
                if !s.is_empty() {
                    sentences.push((base_offset + start, s.to_string()));
                }
                start = end;
            }
        }
    }
    if start < paragraph.len() {
        let s = paragraph[start..].trim();
        if !s.is_empty() {
            sentences.push((base_offset + start, s.to_string()));
        }
    }

    let mut out: Vec<(usize, String)> = Vec::new();
    for (offset, sentence) in sentences {
        let tokens = bpe.encode_with_special_tokens(&sentence);
        if tokens.len() <= max_tokens {
            out.push((offset, sentence));
        } else {
            for window in tokens.chunks(max_tokens) {
                if let Ok(piece) = bpe.decode(window.to_vec()) {
                    let trimmed = piece.trim();
                    if !trimmed.is_empty() {
                        // Offsets are approximate inside a hard cut.
                        out.push((offset, trimmed.to_string()));
                    }
                }
            }
        }
    }
    out
}

/// The last `n` tokens of a text, decoded; used as the inter-chunk overlap
fn token_tail(bpe: &CoreBPE, text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let tokens = bpe.encode_with_special_tokens(text);
    if tokens.is_empty() {
        return String::new();
    }
    let tail = &tokens[tokens.len().saturating_sub(n)..];
    bpe.decode(tail.to_vec()).unwrap_or_default().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpe() -> CoreBPE {
        tiktoken_rs::cl100k_base().unwrap()
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = split_paragraphs(&bpe(), "One short paragraph about nothing much.", 6000, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].char_start, 0);
    }

    #[test]
    fn test_long_text_splits_with_overlap() {
        let paragraph = "The committee discussed the proposal at length before voting. ";
        let text = vec![paragraph.trim(); 40].join("\n\n");
        let chunks = split_paragraphs(&bpe(), &text, 120, 20);
        assert!(chunks.len() > 1, "expected multiple chunks");
        let b = bpe();
        for chunk in &chunks {
            assert!(b.encode_with_special_tokens(&chunk.text).len() <= 120);
            assert!(!chunk.text.trim().is_empty());
        }
        // Overlap: the second chunk begins with the tail of the first.
        let tail = token_tail(&b, &chunks[0].text, 20);
        assert!(chunks[1].text.starts_with(tail.split_whitespace().next().unwrap()));
    }

    #[test]
    fn test_indices_are_sequential() {
        let text = vec!["A paragraph with enough words to count for something."; 30].join("\n\n");
        let chunks = split_paragraphs(&bpe(), &text, 100, 10);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i32);
        }
    }

    #[test]
    fn test_parse_array_shape() {
        let parsed = parse_splitter_output(r#"[{"text": "a"}, {"text": "b", "type": "quote"}]"#)
            .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].kind.as_deref(), Some("quote"));
    }

    #[test]
    fn test_parse_object_with_chunks_shape() {
        let parsed =
            parse_splitter_output(r#"{"chunks": [{"text": "a", "importance": 0.9}]}"#).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].importance, Some(0.9));
    }

    #[test]
    fn test_parse_single_object_shape() {
        let parsed = parse_splitter_output(r#"{"text": "only"}"#).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "only");
    }

    #[test]
    fn test_parse_fenced_json() {
        let parsed = parse_splitter_output("```json\n[{\"text\": \"a\"}]\n```").unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_splitter_output("not json at all").is_none());
        assert!(parse_splitter_output("42").is_none());
    }

    #[test]
    fn test_structural_types() {
        let mk = |i: i32| NewChunk {
            chunk_index: i,
            text: "x".to_string(),
            char_start: 0,
            char_end: 1,
            semantic_type: SemanticType::Body,
            importance: 0.5,
        };
        let mut chunks = vec![mk(0), mk(1), mk(2)];
        assign_structural_types(&mut chunks);
        assert_eq!(chunks[0].semantic_type, SemanticType::Intro);
        assert_eq!(chunks[1].semantic_type, SemanticType::Body);
        assert_eq!(chunks[2].semantic_type, SemanticType::Conclusion);

        // Two chunks: no conclusion.
        let mut two = vec![mk(0), mk(1)];
        assign_structural_types(&mut two);
        assert_eq!(two[1].semantic_type, SemanticType::Body);
    }
}
