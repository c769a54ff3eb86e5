//! Query operator parsing: `site:`, `after:`, `before:`, and time-window
//! keywords, extracted and removed from the query text.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::urls;

/// A query with its operators lifted out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub clean_query: String,
    /// eTLD+1 domains from validated `site:` operators
    pub domains: Vec<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    /// Canonical window from a time keyword (`24h`, `7d`, `30d`)
    pub time_window: Option<String>,
}

static SITE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsite:([A-Za-z0-9.\-]+)").expect("valid regex"));
static AFTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bafter:(\S+)").expect("valid regex"));
static BEFORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbefore:(\S+)").expect("valid regex"));
static RELATIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3})([dwm])$").expect("valid regex"));

/// Time-window keywords mapped to canonical windows. Checked longest
/// phrase first so "this week" wins over "week".
const WINDOW_KEYWORDS: &[(&str, &str)] = &[
    ("на этой неделе", "7d"),
    ("в этом месяце", "30d"),
    ("this month", "30d"),
    ("this week", "7d"),
    ("сегодня", "24h"),
    ("today", "24h"),
];

/// Parse a date operand: absolute (`YYYY-MM-DD`, `MM/DD/YYYY`,
/// `DD.MM.YYYY`) or relative (`3d`, `1w`, `2m`).
pub fn parse_date_operand(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    let captures = RELATIVE_RE.captures(raw)?;
    let amount: i64 = captures[1].parse().ok()?;
    let delta = match &captures[2] {
        "d" => Duration::days(amount),
        "w" => Duration::weeks(amount),
        _ => Duration::days(amount * 30),
    };
    // Relative operands resolve to absolute midnight so round-trips hold.
    let resolved = (now - delta).date_naive();
    resolved
        .and_hms_opt(0, 0, 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Extract operators and window keywords from a query.
///
/// `site:` operands are normalized to eTLD+1 and validated against the
/// trusted-domain allow-list; unknown domains are logged and dropped.
pub fn parse(query: &str, trusted_domains: &[String], now: DateTime<Utc>) -> ParsedQuery {
    let mut remaining = query.to_string();
    let mut parsed = ParsedQuery::default();

    for captures in SITE_RE.captures_iter(query) {
        let domain = urls::etld1(&captures[1]);
        if trusted_domains.iter().any(|t| *t == domain) {
            if !parsed.domains.contains(&domain) {
                parsed.domains.push(domain);
            }
        } else {
            debug!(domain = %captures[1], "ignoring site: operator for untrusted domain");
        }
    }
    remaining = SITE_RE.replace_all(&remaining, "").into_owned();

    if let Some(captures) = AFTER_RE.captures(&remaining) {
        parsed.after = parse_date_operand(&captures[1], now);
    }
    remaining = AFTER_RE.replace_all(&remaining, "").into_owned();

    if let Some(captures) = BEFORE_RE.captures(&remaining) {
        parsed.before = parse_date_operand(&captures[1], now);
    }
    remaining = BEFORE_RE.replace_all(&remaining, "").into_owned();

    let lowered = remaining.to_lowercase();
    for (keyword, window) in WINDOW_KEYWORDS {
        if lowered.contains(keyword) {
            parsed.time_window = Some((*window).to_string());
            // Remove the keyword, case-insensitively, by position.
            if let Some(at) = lowered.find(keyword) {
                remaining.replace_range(at..at + keyword.len(), "");
            }
            break;
        }
    }

    parsed.clean_query = remaining.split_whitespace().collect::<Vec<_>>().join(" ");
    parsed
}

/// Reconstruct a query string carrying the same operators; `parse` of the
/// result yields the same `ParsedQuery`.
pub fn serialize(parsed: &ParsedQuery) -> String {
    let mut parts = vec![parsed.clean_query.clone()];
    for domain in &parsed.domains {
        parts.push(format!("site:{domain}"));
    }
    if let Some(after) = parsed.after {
        parts.push(format!("after:{}", after.format("%Y-%m-%d")));
    }
    if let Some(before) = parsed.before {
        parts.push(format!("before:{}", before.format("%Y-%m-%d")));
    }
    if let Some(window) = &parsed.time_window {
        let keyword = match window.as_str() {
            "24h" => "today",
            "30d" => "this month",
            _ => "this week",
        };
        parts.push(keyword.to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Canonical window label to hours
pub fn window_hours(label: &str) -> Option<i64> {
    match label {
        "24h" => Some(24),
        "7d" => Some(7 * 24),
        "30d" => Some(30 * 24),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted() -> Vec<String> {
        vec!["europa.eu".to_string(), "bbc.co.uk".to_string()]
    }

    #[test]
    fn test_site_operator_extracted_and_normalized() {
        let parsed = parse("AI regulation site:europa.eu", &trusted(), Utc::now());
        assert_eq!(parsed.clean_query, "AI regulation");
        assert_eq!(parsed.domains, vec!["europa.eu".to_string()]);
    }

    #[test]
    fn test_site_subdomain_normalized_to_etld1() {
        let parsed = parse("brexit site:news.bbc.co.uk", &trusted(), Utc::now());
        assert_eq!(parsed.domains, vec!["bbc.co.uk".to_string()]);
    }

    #[test]
    fn test_untrusted_site_ignored() {
        let parsed = parse("crypto site:sketchy.biz", &trusted(), Utc::now());
        assert!(parsed.domains.is_empty());
        assert_eq!(parsed.clean_query, "crypto");
    }

    #[test]
    fn test_absolute_dates() {
        let now = Utc::now();
        let parsed = parse("budget after:2025-01-15 before:03/01/2025", &trusted(), now);
        assert_eq!(
            parsed.after.unwrap().format("%Y-%m-%d").to_string(),
            "2025-01-15"
        );
        assert_eq!(
            parsed.before.unwrap().format("%Y-%m-%d").to_string(),
            "2025-03-01"
        );
        assert_eq!(parsed.clean_query, "budget");
    }

    #[test]
    fn test_dotted_date_is_day_first() {
        let parsed = parse("q after:02.03.2025", &trusted(), Utc::now());
        assert_eq!(
            parsed.after.unwrap().format("%Y-%m-%d").to_string(),
            "2025-03-02"
        );
    }

    #[test]
    fn test_relative_dates() {
        let now = Utc::now();
        let parsed = parse("q after:1w", &trusted(), now);
        let expected = (now - Duration::weeks(1)).date_naive();
        assert_eq!(parsed.after.unwrap().date_naive(), expected);
    }

    #[test]
    fn test_window_keywords() {
        let parsed = parse("election results today", &trusted(), Utc::now());
        assert_eq!(parsed.time_window.as_deref(), Some("24h"));
        assert_eq!(parsed.clean_query, "election results");

        let parsed = parse("выборы на этой неделе", &trusted(), Utc::now());
        assert_eq!(parsed.time_window.as_deref(), Some("7d"));
    }

    #[test]
    fn test_round_trip() {
        let now = Utc::now();
        let original = parse(
            "AI regulation site:europa.eu after:2025-01-15 this week",
            &trusted(),
            now,
        );
        let reparsed = parse(&serialize(&original), &trusted(), now);
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_window_hours() {
        assert_eq!(window_hours("24h"), Some(24));
        assert_eq!(window_hours("7d"), Some(168));
        assert_eq!(window_hours("nope"), None);
    }
}
