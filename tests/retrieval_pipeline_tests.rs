//! Integration tests over the retrieval pipeline's pure stages: scoring,
//! penalties, deduplication, and domain diversification.

use chrono::{Duration, Utc};

use newswire::config::RankConfig;
use newswire::retrieve::dedupe::{diversify, group_dedup, lsh_merge};
use newswire::retrieve::scoring::{
    base_score, category_penalty, freshness, source_score, MISSING_DATE_PENALTY,
};
use newswire::retrieve::ScoredChunk;
use newswire::types::{Chunk, SemanticType};
use newswire::urls;

fn scored(
    id: &str,
    domain: &str,
    url: &str,
    title: &str,
    text: &str,
    published: Option<chrono::DateTime<Utc>>,
    score: f64,
) -> ScoredChunk {
    ScoredChunk {
        chunk: Chunk {
            chunk_id: id.to_string(),
            article_id: id.split('#').next().unwrap().parse().unwrap_or(0),
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
            published_at: published,
            lang: "en".to_string(),
            category: None,
            quality_score: 0.5,
            word_count: text.split_whitespace().count() as i32,
        },
        similarity: 0.6,
        lexical: 0.4,
        score,
    }
}

#[test]
fn score_weights_follow_config() {
    let rank = RankConfig::default();
    let full = base_score(&rank, 1.0, 1.0, 1.0, 1.0);
    assert!((full - 1.0).abs() < 1e-9);

    // Swapping semantic for lexical moves the score by the weight gap.
    let semantic = base_score(&rank, 1.0, 0.0, 0.0, 0.0);
    let lexical = base_score(&rank, 0.0, 1.0, 0.0, 0.0);
    assert!(semantic > lexical);
    assert!((semantic - rank.w_semantic).abs() < 1e-9);
    assert!((lexical - rank.w_lexical).abs() < 1e-9);
}

#[test]
fn missing_date_penalty_is_multiplicative() {
    let rank = RankConfig::default();
    let dated = base_score(&rank, 0.8, 0.5, 0.3, 1.0);
    let undated = dated * MISSING_DATE_PENALTY;
    assert!(undated < dated * 0.31);
    assert!(undated > dated * 0.29);
}

#[test]
fn freshness_halves_within_tau() {
    let now = Utc::now();
    let at_tau = freshness(Some(now - Duration::hours(72)), now, 72.0);
    let at_two_tau = freshness(Some(now - Duration::hours(144)), now, 72.0);
    assert!(at_tau > at_two_tau);
    assert!(at_tau < 0.5);
    assert!(freshness(Some(now), now, 72.0) > 0.99);
}

#[test]
fn sports_articles_take_the_strongest_penalty() {
    // The off-topic-guard scenario: sports coverage sharing title keywords
    // with a civic query still gets suppressed by the category penalty.
    let penalty = category_penalty(
        "Elections for league captain",
        "The coach said the playoff game would decide the season.",
    );
    let (name, factor) = penalty.expect("sports should trigger");
    assert_eq!(name, "sports");
    assert!((factor - 0.5).abs() < 1e-9);

    // A civic article with the same query words takes no penalty.
    assert!(category_penalty(
        "State elections schedule",
        "Polling stations open at 8am; registration closes Friday."
    )
    .is_none());
}

#[test]
fn duplicate_urls_collapse_to_one_canonical() {
    // Two sightings of the same story behind different tracking params and
    // www/news hosts: dedup groups them and one row survives.
    let text = "The commission approved the framework after months of negotiation \
        between member states over enforcement thresholds.";
    let a = scored(
        "1#0",
        "news.bbc.com",
        "https://news.bbc.com/a?utm_source=x",
        "Framework approved",
        text,
        Some(Utc::now()),
        0.9,
    );
    let b = scored(
        "2#0",
        "www.bbc.com",
        "https://www.bbc.com/a?gclid=y",
        "Framework Approved",
        text,
        Some(Utc::now()),
        0.85,
    );

    // Same canonical grouping key despite the URL noise.
    assert_eq!(
        urls::etld1(&a.chunk.source_domain),
        urls::etld1(&b.chunk.source_domain)
    );
    assert_eq!(
        urls::normalize_path(&a.chunk.url),
        urls::normalize_path(&b.chunk.url)
    );

    let (kept, removed) = group_dedup(vec![a, b], &[]);
    assert_eq!(kept.len(), 1);
    assert_eq!(removed, 1);
}

#[test]
fn near_duplicate_wire_copy_merges() {
    let original = "Negotiators reached a provisional agreement on the digital \
        markets act late on Thursday, settling enforcement thresholds, fines, \
        and the timeline for gatekeeper designation across the bloc.";
    let syndicated = original.replace("Thursday", "Friday");

    let a = scored("1#0", "reuters.com", "https://reuters.com/a", "Agreement reached", original, Some(Utc::now()), 0.9);
    let b = scored("2#0", "syndicator.net", "https://syndicator.net/b", "Deal reached", &syndicated, Some(Utc::now()), 0.7);

    let (kept, removed) = lsh_merge(vec![a, b], 0.7);
    assert_eq!(removed, 1);
    assert_eq!(kept[0].chunk.source_domain, "reuters.com");
}

#[test]
fn no_domain_exceeds_the_cap() {
    let now = Some(Utc::now());
    let mut candidates = Vec::new();
    for i in 0..6 {
        candidates.push(scored(
            &format!("{i}#0"),
            "bbc.com",
            &format!("https://bbc.com/{i}"),
            &format!("Story {i}"),
            &format!("distinct body text number {i} about a different subject entirely"),
            now,
            0.9 - i as f64 * 0.05,
        ));
    }
    for i in 6..10 {
        candidates.push(scored(
            &format!("{i}#0"),
            &format!("site{i}.com"),
            &format!("https://site{i}.com/a"),
            &format!("Story {i}"),
            &format!("unrelated body text number {i} on some other topic"),
            now,
            0.5,
        ));
    }

    let (kept, capped) = diversify(candidates, 2);
    assert_eq!(capped, 4);
    let bbc = kept
        .iter()
        .filter(|c| urls::etld1(&c.chunk.source_domain) == "bbc.com")
        .count();
    assert!(bbc <= 2);
}

#[test]
fn trusted_sources_outscore_unknown_ones() {
    let trusted = vec!["reuters.com".to_string()];
    let rank = RankConfig::default();
    let from_trusted = base_score(&rank, 0.5, 0.5, 0.5, source_score("reuters.com", &trusted));
    let from_unknown = base_score(&rank, 0.5, 0.5, 0.5, source_score("blogspot.com", &trusted));
    assert!(from_trusted > from_unknown);
}
