//! Integration tests for intent classification and query parsing

use chrono::{Duration, Utc};

use newswire::ask::intent::{classify, Intent};
use newswire::ask::query::{parse, serialize, window_hours};

fn trusted() -> Vec<String> {
    vec![
        "europa.eu".to_string(),
        "bbc.co.uk".to_string(),
        "reuters.com".to_string(),
    ]
}

#[test]
fn general_qa_bypass_signals() {
    // The knowledge-question scenario: high-confidence general QA, so the
    // orchestrator never touches retrieval.
    let result = classify("what is the difference between an LLM and a neural network?");
    assert_eq!(result.intent, Intent::GeneralQa);
    assert!(result.confidence >= 0.8);
}

#[test]
fn site_lock_parses_and_forces_news() {
    let raw = "AI regulation site:europa.eu";

    let intent = classify(raw);
    assert_eq!(intent.intent, Intent::NewsCurrentEvents);
    assert_eq!(intent.confidence, 1.0);

    let parsed = parse(raw, &trusted(), Utc::now());
    assert_eq!(parsed.clean_query, "AI regulation");
    assert_eq!(parsed.domains, vec!["europa.eu".to_string()]);
}

#[test]
fn multiple_sites_dedup_and_normalize() {
    let parsed = parse(
        "brexit site:news.bbc.co.uk site:bbc.co.uk site:reuters.com",
        &trusted(),
        Utc::now(),
    );
    assert_eq!(
        parsed.domains,
        vec!["bbc.co.uk".to_string(), "reuters.com".to_string()]
    );
}

#[test]
fn all_date_formats_parse() {
    let now = Utc::now();
    for (operand, expected) in [
        ("after:2025-02-03", "2025-02-03"),
        ("after:02/03/2025", "2025-02-03"),
        ("after:03.02.2025", "2025-02-03"),
    ] {
        let parsed = parse(&format!("q {operand}"), &trusted(), now);
        assert_eq!(
            parsed.after.unwrap().format("%Y-%m-%d").to_string(),
            expected,
            "operand {operand}"
        );
    }
}

#[test]
fn relative_dates_resolve_against_now() {
    let now = Utc::now();
    let parsed = parse("q after:3d before:2m", &trusted(), now);
    assert_eq!(
        parsed.after.unwrap().date_naive(),
        (now - Duration::days(3)).date_naive()
    );
    assert_eq!(
        parsed.before.unwrap().date_naive(),
        (now - Duration::days(60)).date_naive()
    );
}

#[test]
fn window_keywords_map_to_canonical_windows() {
    let now = Utc::now();
    assert_eq!(
        parse("news today", &trusted(), now).time_window.as_deref(),
        Some("24h")
    );
    assert_eq!(
        parse("news this week", &trusted(), now).time_window.as_deref(),
        Some("7d")
    );
    assert_eq!(window_hours("24h"), Some(24));
    assert_eq!(window_hours("7d"), Some(168));
}

#[test]
fn parse_serialize_round_trip() {
    let now = Utc::now();
    let cases = [
        "plain query with no operators",
        "AI regulation site:europa.eu",
        "budget after:2025-01-15 before:2025-02-01",
        "grain exports site:reuters.com after:1w today",
    ];
    for case in cases {
        let parsed = parse(case, &trusted(), now);
        let reparsed = parse(&serialize(&parsed), &trusted(), now);
        assert_eq!(parsed, reparsed, "round trip failed for: {case}");
    }
}

#[test]
fn untrusted_domains_are_dropped_not_fatal() {
    let parsed = parse("leak site:pastebin.com", &trusted(), Utc::now());
    assert!(parsed.domains.is_empty());
    assert_eq!(parsed.clean_query, "leak");
}

#[test]
fn russian_window_keyword() {
    let parsed = parse("новости на этой неделе", &trusted(), Utc::now());
    assert_eq!(parsed.time_window.as_deref(), Some("7d"));
    assert_eq!(parsed.clean_query, "новости");
}
