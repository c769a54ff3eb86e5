//! Retrieval-time deduplication and domain diversification.
//!
//! Two passes: exact grouping on (eTLD+1, normalized path, normalized
//! title), then MinHash-LSH near-duplicate merging with an index built
//! fresh for this call. Diversification caps each eTLD+1 in the final
//! ranking.

use std::collections::HashMap;

use super::ScoredChunk;
use crate::dedup::{LshIndex, Signature};
use crate::retrieve::scoring::source_score;
use crate::urls;

/// Exact-group dedup. Within a group the canonical winner maximizes
/// (has-date, source score, word count, score) lexicographically.
/// Returns survivors (score order preserved) and the number removed.
pub fn group_dedup(
    candidates: Vec<ScoredChunk>,
    trusted: &[String],
) -> (Vec<ScoredChunk>, usize) {
    let mut winners: HashMap<(String, String, String), ScoredChunk> = HashMap::new();
    let total = candidates.len();

    for candidate in candidates {
        let key = (
            urls::etld1(&candidate.chunk.source_domain),
            urls::normalize_path(&candidate.chunk.url),
            urls::normalize_title(&candidate.chunk.title),
        );
        match winners.entry(key) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if dedup_key(&candidate, trusted) > dedup_key(slot.get(), trusted) {
                    slot.insert(candidate);
                }
            }
        }
    }

    let mut survivors: Vec<ScoredChunk> = winners.into_values().collect();
    survivors.sort_by(|a, b| b.score.total_cmp(&a.score));
    let removed = total - survivors.len();
    (survivors, removed)
}

fn dedup_key(candidate: &ScoredChunk, trusted: &[String]) -> (bool, u64, i32, u64) {
    (
        candidate.chunk.published_at.is_some(),
        (source_score(&urls::etld1(&candidate.chunk.source_domain), trusted) * 1000.0) as u64,
        candidate.chunk.word_count,
        (candidate.score.max(0.0) * 1_000_000.0) as u64,
    )
}

/// Near-duplicate merge over the surviving candidates, highest score
/// first. The LSH index lives only for this call; each candidate id is
/// inserted exactly once.
pub fn lsh_merge(candidates: Vec<ScoredChunk>, threshold: f64) -> (Vec<ScoredChunk>, usize) {
    let mut lsh = LshIndex::new(threshold);
    let mut kept: Vec<ScoredChunk> = Vec::with_capacity(candidates.len());
    let mut removed = 0usize;

    for (id, candidate) in candidates.into_iter().enumerate() {
        let matches = lsh.insert_and_query(id, Signature::of(&candidate.chunk.text));
        if matches.is_empty() {
            kept.push(candidate);
        } else {
            // A higher-scored near-duplicate is already kept.
            removed += 1;
        }
    }
    (kept, removed)
}

/// Cap each eTLD+1 at `max_per_domain` entries, preserving score order.
/// Returns survivors and the number capped away.
pub fn diversify(candidates: Vec<ScoredChunk>, max_per_domain: usize) -> (Vec<ScoredChunk>, usize) {
    if max_per_domain == 0 {
        return (candidates, 0);
    }
    let mut per_domain: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(candidates.len());
    let mut capped = 0usize;

    for candidate in candidates {
        let domain = urls::etld1(&candidate.chunk.source_domain);
        let seen = per_domain.entry(domain).or_insert(0);
        if *seen < max_per_domain {
            *seen += 1;
            kept.push(candidate);
        } else {
            capped += 1;
        }
    }
    (kept, capped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, SemanticType};
    use chrono::Utc;

    fn scored(id: &str, domain: &str, url: &str, title: &str, text: &str, score: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                chunk_id: id.to_string(),
                article_id: 1,
                chunk_index: 0,
                processing_version: 1,
                text: text.to_string(),
                char_start: 0,
                char_end: text.len() as i32,
                semantic_type: SemanticType::Body,
                importance: 0.5,
                source_domain: domain.to_string(),
                url: url.to_string(),
                title: title.to_string(),
                published_at: Some(Utc::now()),
                lang: "en".to_string(),
                category: None,
                quality_score: 0.5,
                word_count: text.split_whitespace().count() as i32,
            },
            similarity: 0.5,
            lexical: 0.5,
            score,
        }
    }

    const TEXT_A: &str = "The council approved the transit budget on Tuesday after a long \
        debate over bus lanes, station repairs, and overnight service funding.";

    #[test]
    fn test_group_dedup_same_story_tracking_urls() {
        // Same story reached via www/news hosts and different tracking params.
        let a = scored(
            "1#0",
            "news.bbc.com",
            "https://news.bbc.com/a?utm_source=x",
            "Transit budget approved",
            TEXT_A,
            0.9,
        );
        let b = scored(
            "2#0",
            "www.bbc.com",
            "https://www.bbc.com/a?gclid=y",
            "Transit Budget Approved!",
            TEXT_A,
            0.8,
        );
        let (kept, removed) = group_dedup(vec![a, b], &[]);
        assert_eq!(kept.len(), 1);
        assert_eq!(removed, 1);
        assert_eq!(kept[0].chunk.chunk_id, "1#0");
    }

    #[test]
    fn test_group_dedup_keeps_distinct_stories() {
        let a = scored("1#0", "bbc.com", "https://bbc.com/a", "Story A", TEXT_A, 0.9);
        let b = scored("2#0", "bbc.com", "https://bbc.com/b", "Story B", "Entirely different text here.", 0.8);
        let (kept, removed) = group_dedup(vec![a, b], &[]);
        assert_eq!(kept.len(), 2);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_lsh_merge_drops_near_duplicates() {
        let a = scored("1#0", "bbc.com", "https://bbc.com/a", "A", TEXT_A, 0.9);
        let edited = TEXT_A.replace("Tuesday", "Wednesday");
        let b = scored("2#0", "cnn.com", "https://cnn.com/b", "B", &edited, 0.7);
        let c = scored(
            "3#0",
            "npr.org",
            "https://npr.org/c",
            "C",
            "Chip maker earnings beat expectations on strong data center demand this quarter.",
            0.6,
        );
        let (kept, removed) = lsh_merge(vec![a, b, c], 0.7);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].chunk.chunk_id, "1#0");
        assert_eq!(kept[1].chunk.chunk_id, "3#0");
    }

    #[test]
    fn test_diversify_caps_domains() {
        let candidates = vec![
            scored("1#0", "bbc.com", "https://bbc.com/a", "A", "text a", 0.9),
            scored("2#0", "bbc.com", "https://bbc.com/b", "B", "text b", 0.8),
            scored("3#0", "bbc.com", "https://bbc.com/c", "C", "text c", 0.7),
            scored("4#0", "cnn.com", "https://cnn.com/d", "D", "text d", 0.6),
        ];
        let (kept, capped) = diversify(candidates, 2);
        assert_eq!(capped, 1);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|c| c.chunk.chunk_id != "3#0"));
    }

    #[test]
    fn test_diversify_subdomains_count_together() {
        let candidates = vec![
            scored("1#0", "news.bbc.co.uk", "https://news.bbc.co.uk/a", "A", "ta", 0.9),
            scored("2#0", "sport.bbc.co.uk", "https://sport.bbc.co.uk/b", "B", "tb", 0.8),
            scored("3#0", "bbc.co.uk", "https://bbc.co.uk/c", "C", "tc", 0.7),
        ];
        let (kept, capped) = diversify(candidates, 2);
        assert_eq!(capped, 1);
        assert_eq!(kept.len(), 2);
    }
}
