//! Article content extraction: HTML to clean text plus metadata.
//!
//! Parsing is synchronous (`scraper::Html` is not `Send`); callers invoke
//! it between awaits.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::error::{ExtractError, Result};

/// Extraction output consumed by the article worker
#[derive(Debug, Clone)]
pub struct Extracted {
    pub title: String,
    pub authors: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub clean_text: String,
    pub word_count: usize,
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Phrases that mark a metered or hard paywall
const PAYWALL_MARKERS: &[&str] = &[
    "subscribe to continue reading",
    "subscribe to read",
    "sign in to continue reading",
    "this article is for subscribers",
    "create a free account to continue",
    "подпишитесь, чтобы продолжить",
];

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    doc.select(&selector(css))
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract title, authors, published date, and clean body text from HTML.
///
/// Body text prefers `<article>`, then `<main>`, then all paragraphs;
/// a regex tag-strip is the last resort for soup that scraper cannot
/// structure.
pub fn extract(html: &str, min_word_count: usize) -> Result<Extracted> {
    if html.trim().is_empty() {
        return Err(ExtractError::EmptyBody.into());
    }

    let doc = Html::parse_document(html);

    let title = meta_content(&doc, r#"meta[property="og:title"]"#)
        .or_else(|| {
            doc.select(&selector("title"))
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default();

    let mut authors: Vec<String> = Vec::new();
    for css in [
        r#"meta[name="author"]"#,
        r#"meta[property="article:author"]"#,
    ] {
        for el in doc.select(&selector(css)) {
            if let Some(content) = el.value().attr("content") {
                let name = content.trim();
                if !name.is_empty() && !name.starts_with("http") {
                    authors.push(name.to_string());
                }
            }
        }
    }
    authors.dedup();

    let published_at = [
        r#"meta[property="article:published_time"]"#,
        r#"meta[name="pubdate"]"#,
        r#"meta[name="date"]"#,
        r#"meta[itemprop="datePublished"]"#,
    ]
    .iter()
    .find_map(|css| meta_content(&doc, css))
    .and_then(|raw| parse_date(&raw));

    let clean_text = extract_body(&doc, html);
    let lowered = clean_text.to_lowercase();
    let word_count = clean_text.split_whitespace().count();

    if PAYWALL_MARKERS.iter().any(|m| lowered.contains(m)) && word_count < min_word_count * 3 {
        return Err(ExtractError::Paywall.into());
    }
    if word_count == 0 {
        return Err(ExtractError::EmptyBody.into());
    }
    if word_count < min_word_count {
        return Err(ExtractError::UnderLength { words: word_count }.into());
    }

    Ok(Extracted {
        title,
        authors,
        published_at,
        clean_text,
        word_count,
    })
}

fn extract_body(doc: &Html, raw_html: &str) -> String {
    for container in ["article", "main"] {
        if let Some(el) = doc.select(&selector(container)).next() {
            let text = paragraphs_text(&el);
            if !text.is_empty() {
                return text;
            }
        }
    }

    let all: Vec<String> = doc
        .select(&selector("p"))
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if !all.is_empty() {
        return all.join("\n\n");
    }

    // Tag soup: strip markup and collapse whitespace
    TAG_RE
        .replace_all(raw_html, " ")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn paragraphs_text(el: &scraper::ElementRef<'_>) -> String {
    let para = selector("p");
    let parts: Vec<String> = el
        .select(&para)
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if parts.is_empty() {
        el.text().collect::<String>().trim().to_string()
    } else {
        parts.join("\n\n")
    }
}

/// Parse the date formats that occur in article meta tags
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

/// Rule-based language detection: Cyrillic character ratio.
///
/// Returns the ISO code and a confidence in [0.5, 1.0]. Russian is
/// returned only when its confidence (0.5 + ratio/2) reaches the 0.8
/// switch point, i.e. at a Cyrillic ratio of 0.6 or more; anything
/// weaker stays English so the returned language never disagrees with
/// the confidence floor.
pub fn detect_language(text: &str) -> (&'static str, f64) {
    let mut cyrillic = 0usize;
    let mut latin = 0usize;
    for c in text.chars() {
        if ('\u{0400}'..='\u{04FF}').contains(&c) {
            cyrillic += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        }
    }
    let total = cyrillic + latin;
    if total == 0 {
        return ("en", 0.5);
    }
    let ratio = cyrillic as f64 / total as f64;
    let ru_confidence = 0.5 + ratio / 2.0;
    if ru_confidence >= 0.8 {
        ("ru", ru_confidence)
    } else {
        ("en", 0.5 + (1.0 - ratio) / 2.0)
    }
}

/// Ingestion-time category from title+lede keyword hits
pub fn detect_category(title: &str, text: &str) -> Option<&'static str> {
    let lede: String = text.split_whitespace().take(120).collect::<Vec<_>>().join(" ");
    let haystack = format!("{} {}", title, lede).to_lowercase();
    let count = |words: &[&str]| {
        words
            .iter()
            .filter(|w| haystack.split(|c: char| !c.is_alphanumeric()).any(|t| t == **w))
            .count()
    };

    let scores = [
        ("sports", count(&["game", "season", "coach", "playoff", "league", "tournament", "match"])),
        ("entertainment", count(&["film", "movie", "album", "celebrity", "premiere", "box", "trailer"])),
        ("business", count(&["earnings", "shares", "revenue", "market", "investors", "stock", "ipo"])),
        ("technology", count(&["software", "startup", "chip", "ai", "app", "cloud", "cybersecurity"])),
        ("politics", count(&["election", "senate", "parliament", "minister", "congress", "policy", "vote"])),
        ("science", count(&["researchers", "study", "telescope", "species", "physics", "climate"])),
        ("health", count(&["patients", "vaccine", "hospital", "disease", "fda", "clinical"])),
        ("crime", count(&["police", "arrested", "charges", "suspect", "shooting", "investigation"])),
        ("weather", count(&["storm", "hurricane", "forecast", "flooding", "temperatures", "snowfall"])),
    ];

    scores
        .iter()
        .filter(|(_, n)| *n >= 2)
        .max_by_key(|(_, n)| *n)
        .map(|(name, _)| *name)
}

/// Heuristic content quality in [0,1]: length, title presence, and
/// paragraph structure.
pub fn quality_score(word_count: usize, has_title: bool, paragraph_count: usize) -> f32 {
    let length = (word_count as f32 / 800.0).min(1.0) * 0.5;
    let title = if has_title { 0.2 } else { 0.0 };
    let structure = (paragraph_count as f32 / 10.0).min(1.0) * 0.3;
    length + title + structure
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title>Council approves transit budget</title>
        <meta property="article:published_time" content="2025-06-01T10:00:00Z">
        <meta name="author" content="Jane Doe">
        </head><body><article>
        <p>The city council voted on Tuesday to approve the new transit budget.</p>
        <p>The plan allocates funds for bus lanes and station repairs across the area,
           with a pilot program for overnight service that advocates have sought for years.</p>
        </article></body></html>"#;

    #[test]
    fn test_extract_article() {
        let out = extract(PAGE, 10).unwrap();
        assert_eq!(out.title, "Council approves transit budget");
        assert_eq!(out.authors, vec!["Jane Doe".to_string()]);
        assert!(out.published_at.is_some());
        assert!(out.clean_text.contains("transit budget"));
        assert!(!out.clean_text.contains("<p>"));
    }

    #[test]
    fn test_under_length_rejected() {
        let err = extract(PAGE, 500).unwrap_err();
        assert_eq!(err.category(), "extract");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_empty_body_rejected() {
        assert!(extract("", 10).is_err());
        assert!(extract("<html><body></body></html>", 10).is_err());
    }

    #[test]
    fn test_paywall_detected() {
        let page = r#"<html><body><article>
            <p>Subscribe to continue reading this story.</p>
            </article></body></html>"#;
        let err = extract(page, 3).unwrap_err();
        assert!(matches!(
            err,
            crate::error::NewswireError::Extract(ExtractError::Paywall)
        ));
    }

    #[test]
    fn test_detect_language() {
        let (lang, conf) = detect_language("The quick brown fox jumps over the lazy dog");
        assert_eq!(lang, "en");
        assert!(conf >= 0.8);

        let (lang, conf) = detect_language("Городской совет утвердил бюджет на транспорт");
        assert_eq!(lang, "ru");
        assert!(conf >= 0.8);

        let (lang, conf) = detect_language("12345 !!!");
        assert_eq!(lang, "en");
        assert!((conf - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_detect_language_mixed_boundary() {
        // 11 Cyrillic vs 9 Latin letters: ratio 0.55, below the 0.6 needed
        // for Russian confidence to reach 0.8. Must stay English.
        let (lang, _conf) = detect_language("абвгдежзийк abcdefghi");
        assert_eq!(lang, "en");

        // 13 Cyrillic vs 7 Latin letters: ratio 0.65 clears the floor and
        // flips to Russian at confidence 0.825.
        let (lang, conf) = detect_language("абвгдежзийклм abcdefg");
        assert_eq!(lang, "ru");
        assert!(conf >= 0.8);
    }

    #[test]
    fn test_detect_category_needs_two_hits() {
        assert_eq!(
            detect_category("Storm forecast worsens", "Flooding expected as the storm nears."),
            Some("weather")
        );
        // One keyword alone does not categorize.
        assert_eq!(detect_category("A game of chance", "Essay about probability."), None);
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("2025-06-01T10:00:00Z").is_some());
        assert!(parse_date("Sun, 01 Jun 2025 10:00:00 GMT").is_some());
        assert!(parse_date("2025-06-01").is_some());
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn test_quality_score_bounds() {
        assert!(quality_score(0, false, 0) < 0.05);
        let high = quality_score(1200, true, 14);
        assert!(high > 0.9 && high <= 1.0);
    }
}
