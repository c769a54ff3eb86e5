//! The hybrid retriever pipeline (candidate fetch through final ranking)
//! with window auto-recovery.

use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    dedupe, scoring, window_label, Diagnostics, RetrievalCache, RetrievalFlags, RetrievalRequest,
    ScoredChunk,
};
use crate::config::RankConfig;
use crate::error::Result;
use crate::llm::ProviderManager;
use crate::storage::{CandidateFilter, CandidateRow, Storage};
use crate::urls;

/// Fixed window expansion chain: 7d → 14d → 30d → 3m → 6m → 1y
const EXPANSION_CHAIN_HOURS: [i64; 6] = [168, 336, 720, 2160, 4320, 8760];

/// Process-lifetime counters, observable from the health surface
#[derive(Debug, Default)]
pub struct RetrieverMetrics {
    pub retrievals_total: AtomicU64,
    pub candidates_considered_total: AtomicU64,
    pub offtopic_dropped_total: AtomicU64,
    pub category_penalized_total: AtomicU64,
    pub duplicates_removed_total: AtomicU64,
    pub domains_capped_total: AtomicU64,
    pub window_expansions_total: AtomicU64,
    pub embed_failures_total: AtomicU64,
}

impl RetrieverMetrics {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "retrievals_total": self.retrievals_total.load(Ordering::Relaxed),
            "candidates_considered_total": self.candidates_considered_total.load(Ordering::Relaxed),
            "offtopic_dropped_total": self.offtopic_dropped_total.load(Ordering::Relaxed),
            "category_penalized_total": self.category_penalized_total.load(Ordering::Relaxed),
            "duplicates_removed_total": self.duplicates_removed_total.load(Ordering::Relaxed),
            "domains_capped_total": self.domains_capped_total.load(Ordering::Relaxed),
            "window_expansions_total": self.window_expansions_total.load(Ordering::Relaxed),
            "embed_failures_total": self.embed_failures_total.load(Ordering::Relaxed),
        })
    }
}

pub struct HybridRetriever {
    storage: Storage,
    /// Query embedding provider; None forces FTS-only retrieval
    provider: Option<Arc<ProviderManager>>,
    rank: RankConfig,
    embed_model: String,
    embedding_dim: usize,
    trusted_domains: Vec<String>,
    metrics: Arc<RetrieverMetrics>,
}

impl HybridRetriever {
    pub fn new(
        storage: Storage,
        provider: Option<Arc<ProviderManager>>,
        rank: RankConfig,
        embed_model: String,
        embedding_dim: usize,
        trusted_domains: Vec<String>,
    ) -> Self {
        Self {
            storage,
            provider,
            rank,
            embed_model,
            embedding_dim,
            trusted_domains,
            metrics: Arc::new(RetrieverMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<RetrieverMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Execute one retrieval. Identical inputs over identical storage
    /// state produce identical ordered results (cache aside).
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
        flags: RetrievalFlags,
        cache: Option<&RetrievalCache>,
    ) -> Result<(Vec<ScoredChunk>, Diagnostics)> {
        self.metrics.retrievals_total.fetch_add(1, Ordering::Relaxed);

        let cache_key = RetrievalCache::key(&(request, &flags));
        if flags.use_cache {
            if let Some(cache) = cache {
                if let Some(results) = cache.get(&cache_key).await {
                    let diagnostics = Diagnostics {
                        window_used_hours: request.window_hours,
                        from_cache: true,
                        ..Diagnostics::default()
                    };
                    return Ok((results, diagnostics));
                }
            }
        }

        // Hot-reload overlay: config-table writes land within a cycle.
        let mut rank = self.rank.clone();
        if let Ok(overlay) = self.storage.load_config_overlay().await {
            rank.apply_overlay(&overlay);
        }

        let mut diagnostics = Diagnostics {
            window_used_hours: request.window_hours,
            ..Diagnostics::default()
        };

        // After > before cannot match anything; report, don't error.
        if let (Some(after), Some(before)) = (request.after, request.before) {
            if after > before {
                diagnostics.warnings.push("filter_conflict".to_string());
                return Ok((Vec::new(), diagnostics));
            }
        }

        if request.k == 0 {
            let filter = self.filter_for(request, request.window_hours, &request.lang, &source_list(request));
            diagnostics.total_available = self.storage.count_chunks_in_window(&filter).await?;
            return Ok((Vec::new(), diagnostics));
        }

        // Empty query: freshness order, no scoring pipeline.
        if request.query.trim().is_empty() {
            let filter = self.filter_for(request, request.window_hours, &request.lang, &source_list(request));
            let rows = self.storage.recent_chunks(&filter, request.k).await?;
            diagnostics.total_available = self.storage.count_chunks_in_window(&filter).await?;
            let results = rows
                .into_iter()
                .map(|row| ScoredChunk {
                    chunk: row.chunk,
                    similarity: 0.0,
                    lexical: 0.0,
                    score: 0.0,
                })
                .collect();
            return Ok((results, diagnostics));
        }

        let query_embedding = self.embed_query(&request.query).await;

        // Auto-recovery ladder: widen the window along the chain, then
        // relax lang/sources, then drop the off-topic guard with a larger k.
        let mut window = request.window_hours;
        let mut lang = request.lang.clone();
        let mut sources = source_list(request);
        let mut guard_on = flags.offtopic_guard;
        let mut k = request.k;

        let results = loop {
            let filter = self.filter_for(request, window, &lang, &sources);
            let candidates = self
                .storage
                .hybrid_candidates(
                    query_embedding.clone(),
                    &request.query,
                    &filter,
                    rank.w_semantic,
                    rank.w_lexical,
                    2 * k,
                    self.embedding_dim,
                )
                .await?;

            let results = self.rank_candidates(
                candidates,
                request,
                &rank,
                flags,
                guard_on,
                query_embedding.is_some(),
                k,
                &mut diagnostics,
            );

            if results.len() >= rank.min_results {
                diagnostics.total_available = self.storage.count_chunks_in_window(&filter).await?;
                break results;
            }

            // Operator dates are authoritative; no recovery applies.
            if request.after.is_some() {
                diagnostics.total_available = self.storage.count_chunks_in_window(&filter).await?;
                break results;
            }

            if let Some(next) = EXPANSION_CHAIN_HOURS.iter().copied().find(|h| *h > window) {
                window = next;
                diagnostics.window_expansions += 1;
                diagnostics.window_used_hours = window;
                let warning = format!("expanded_window_to_{}", window_label(window));
                warn!(query = %request.query, %warning, "retrieval auto-recovery");
                diagnostics.warnings.push(warning);
                self.metrics
                    .window_expansions_total
                    .fetch_add(1, Ordering::Relaxed);
                continue;
            }

            if lang.is_some() || sources.is_some() {
                lang = None;
                sources = None;
                diagnostics
                    .warnings
                    .push("relaxed_lang_and_sources".to_string());
                continue;
            }

            if guard_on {
                guard_on = false;
                k = rank.max_k.max(k);
                diagnostics
                    .warnings
                    .push("offtopic_guard_disabled".to_string());
                continue;
            }

            let filter = self.filter_for(request, window, &lang, &sources);
            diagnostics.total_available = self.storage.count_chunks_in_window(&filter).await?;
            break results;
        };

        let results: Vec<ScoredChunk> = results.into_iter().take(request.k).collect();

        if flags.use_cache {
            if let Some(cache) = cache {
                cache.put(cache_key, results.clone()).await;
            }
        }
        Ok((results, diagnostics))
    }

    /// Score, penalize, dedup, diversify, and order one candidate set
    #[allow(clippy::too_many_arguments)]
    fn rank_candidates(
        &self,
        candidates: Vec<CandidateRow>,
        request: &RetrievalRequest,
        rank: &RankConfig,
        flags: RetrievalFlags,
        guard_on: bool,
        have_embedding: bool,
        k: usize,
        diagnostics: &mut Diagnostics,
    ) -> Vec<ScoredChunk> {
        let now = Utc::now();
        diagnostics.candidates_considered += candidates.len();
        self.metrics
            .candidates_considered_total
            .fetch_add(candidates.len() as u64, Ordering::Relaxed);

        let mut scored: Vec<ScoredChunk> = Vec::with_capacity(candidates.len());
        for row in candidates {
            // Off-topic guard only makes sense when a query embedding exists.
            if guard_on && have_embedding && row.similarity < rank.min_cosine {
                diagnostics.offtopic_dropped += 1;
                self.metrics
                    .offtopic_dropped_total
                    .fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let domain = urls::etld1(&row.chunk.source_domain);
            let freshness = scoring::freshness(row.chunk.published_at, now, rank.freshness_tau_hours);
            let source = scoring::source_score(&domain, &self.trusted_domains);
            let mut score =
                scoring::base_score(rank, row.similarity, row.lexical.min(1.0), freshness, source);

            if flags.category_penalties && request.news_intent {
                if let Some((category, factor)) =
                    scoring::category_penalty(&row.chunk.title, &row.chunk.text)
                {
                    debug!(chunk = %row.chunk.chunk_id, category, "category penalty");
                    score *= factor;
                    diagnostics.category_penalized += 1;
                    self.metrics
                        .category_penalized_total
                        .fetch_add(1, Ordering::Relaxed);
                }
            }

            if flags.date_penalties && row.chunk.published_at.is_none() {
                score *= scoring::MISSING_DATE_PENALTY;
            }

            scored.push(ScoredChunk {
                chunk: row.chunk,
                similarity: row.similarity,
                lexical: row.lexical,
                score,
            });
        }

        sort_deterministic(&mut scored);

        let (scored, group_removed) = dedupe::group_dedup(scored, &self.trusted_domains);
        let (mut scored, lsh_removed) = dedupe::lsh_merge(scored, rank.lsh_threshold);
        diagnostics.duplicates_removed += group_removed + lsh_removed;
        self.metrics
            .duplicates_removed_total
            .fetch_add((group_removed + lsh_removed) as u64, Ordering::Relaxed);

        if flags.diversify {
            let (kept, capped) = dedupe::diversify(scored, rank.max_per_domain);
            scored = kept;
            diagnostics.domains_capped += capped;
            self.metrics
                .domains_capped_total
                .fetch_add(capped as u64, Ordering::Relaxed);
        }

        sort_deterministic(&mut scored);
        scored.truncate(k);
        scored
    }

    async fn embed_query(&self, query: &str) -> Option<pgvector::Vector> {
        let provider = self.provider.as_ref()?;
        match provider.embed(&self.embed_model, &[query.to_string()]).await {
            Ok(mut response) if !response.vectors.is_empty() => {
                Some(pgvector::Vector::from(response.vectors.remove(0)))
            }
            Ok(_) => None,
            Err(e) => {
                // FTS-only mode; lexical matching still works.
                warn!(error = %e, "query embedding failed, falling back to FTS-only");
                self.metrics
                    .embed_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn filter_for(
        &self,
        request: &RetrievalRequest,
        window_hours: i64,
        lang: &Option<String>,
        sources: &Option<Vec<String>>,
    ) -> CandidateFilter {
        let window_start = Utc::now() - Duration::hours(window_hours);
        // An explicit after: operator is authoritative over the window.
        CandidateFilter {
            published_after: Some(request.after.unwrap_or(window_start)),
            published_before: request.before,
            lang: lang.clone(),
            sources: sources.clone(),
        }
    }
}

fn source_list(request: &RetrievalRequest) -> Option<Vec<String>> {
    if request.sources.is_empty() {
        None
    } else {
        Some(request.sources.iter().map(|s| urls::etld1(s)).collect())
    }
}

/// Total order: score desc, then (has-date desc, published-at desc,
/// chunk id asc) so equal scores reproduce across runs.
fn sort_deterministic(results: &mut [ScoredChunk]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| {
                b.chunk
                    .published_at
                    .is_some()
                    .cmp(&a.chunk.published_at.is_some())
            })
            .then_with(|| b.chunk.published_at.cmp(&a.chunk.published_at))
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, SemanticType};

    fn chunk(id: &str, published: Option<chrono::DateTime<Utc>>) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                chunk_id: id.to_string(),
                article_id: 1,
                chunk_index: 0,
                processing_version: 1,
                text: "text".to_string(),
                char_start: 0,
                char_end: 4,
                semantic_type: SemanticType::Body,
                importance: 0.5,
                source_domain: "bbc.com".to_string(),
                url: "https://bbc.com/a".to_string(),
                title: "t".to_string(),
                published_at: published,
                lang: "en".to_string(),
                category: None,
                quality_score: 0.5,
                word_count: 1,
            },
            similarity: 0.5,
            lexical: 0.5,
            score: 0.5,
        }
    }

    #[test]
    fn test_tie_break_prefers_dated_then_recent_then_id() {
        let now = Utc::now();
        let mut results = vec![
            chunk("9#0", None),
            chunk("5#0", Some(now - Duration::hours(48))),
            chunk("3#0", Some(now - Duration::hours(1))),
            chunk("1#0", Some(now - Duration::hours(1))),
        ];
        // Same published_at for the last two: id ascending decides.
        results[3].chunk.published_at = results[2].chunk.published_at;
        sort_deterministic(&mut results);

        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["1#0", "3#0", "5#0", "9#0"]);
    }

    #[test]
    fn test_expansion_chain_is_monotonic() {
        let mut prev = 0;
        for hours in EXPANSION_CHAIN_HOURS {
            assert!(hours > prev);
            prev = hours;
        }
        assert_eq!(EXPANSION_CHAIN_HOURS[0], 168);
        assert_eq!(*EXPANSION_CHAIN_HOURS.last().unwrap(), 8760);
    }
}
