//! Retrieval scoring: base score blending, freshness decay, source scores,
//! and category/date penalties.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::config::RankConfig;

/// Multiplicative penalty applied when `published_at` is missing
pub const MISSING_DATE_PENALTY: f64 = 0.3;

/// Minimum keyword hits before a category penalty triggers
const MIN_CATEGORY_HITS: usize = 2;

/// Penalized categories with their multipliers and keyword lists
/// (English + Russian). Overridable through the persisted config table.
pub static CATEGORY_PENALTIES: Lazy<Vec<CategoryPenalty>> = Lazy::new(|| {
    vec![
        CategoryPenalty {
            name: "sports",
            factor: 0.5,
            keywords: &[
                "game", "match", "season", "playoff", "league", "coach", "tournament",
                "championship", "halftime", "scoreboard", "матч", "сезон", "турнир", "лига",
            ],
        },
        CategoryPenalty {
            name: "entertainment",
            factor: 0.6,
            keywords: &[
                "film", "movie", "celebrity", "album", "premiere", "trailer", "boxoffice",
                "красная", "премьера", "фильм", "сериал", "знаменитость",
            ],
        },
        CategoryPenalty {
            name: "crime",
            factor: 0.7,
            keywords: &[
                "police", "arrested", "suspect", "charges", "robbery", "shooting", "burglary",
                "полиция", "арестован", "подозреваемый", "ограбление",
            ],
        },
        CategoryPenalty {
            name: "weather",
            factor: 0.8,
            keywords: &[
                "storm", "forecast", "hurricane", "flooding", "temperatures", "snowfall",
                "heatwave", "шторм", "прогноз", "наводнение", "гроза",
            ],
        },
    ]
});

pub struct CategoryPenalty {
    pub name: &'static str,
    pub factor: f64,
    pub keywords: &'static [&'static str],
}

/// Exponential freshness decay over hours with time constant `tau_hours`.
/// Missing dates score zero here; the date penalty handles the rest.
pub fn freshness(published_at: Option<DateTime<Utc>>, now: DateTime<Utc>, tau_hours: f64) -> f64 {
    let Some(published) = published_at else {
        return 0.0;
    };
    let age_hours = (now - published).num_minutes() as f64 / 60.0;
    if age_hours <= 0.0 {
        return 1.0;
    }
    (-age_hours / tau_hours).exp()
}

/// Source score in [0,1]: trusted domains rank ahead of unknown ones
pub fn source_score(domain: &str, trusted: &[String]) -> f64 {
    if trusted.iter().any(|t| t == domain) {
        1.0
    } else {
        0.5
    }
}

/// Weighted base score per the ranking config
pub fn base_score(
    rank: &RankConfig,
    similarity: f64,
    lexical: f64,
    freshness: f64,
    source: f64,
) -> f64 {
    rank.w_semantic * similarity
        + rank.w_lexical * lexical
        + rank.w_freshness * freshness
        + rank.w_source * source
}

/// Case-insensitive word-boundary keyword hits in title+text
fn keyword_hits(haystack: &str, keywords: &[&str]) -> usize {
    let tokens: HashMap<&str, ()> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| (t, ()))
        .collect();
    keywords.iter().filter(|k| tokens.contains_key(**k)).count()
}

/// Category penalty for a news-intent query: the strongest matching
/// category's factor, or None when no category reaches the hit floor.
pub fn category_penalty(title: &str, text: &str) -> Option<(&'static str, f64)> {
    let haystack = format!("{} {}", title, text).to_lowercase();
    CATEGORY_PENALTIES
        .iter()
        .filter(|p| keyword_hits(&haystack, p.keywords) >= MIN_CATEGORY_HITS)
        .min_by(|a, b| a.factor.total_cmp(&b.factor))
        .map(|p| (p.name, p.factor))
}
