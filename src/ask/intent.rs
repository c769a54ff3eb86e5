//! Rule-based bilingual intent classification: knowledge question versus
//! news retrieval.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Routing decision for a conversational query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    GeneralQa,
    NewsCurrentEvents,
}

/// Classification with calibrated confidence in [0.5, 1.0]
#[derive(Debug, Clone, Serialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    pub reason: String,
}

/// Question-pattern tokens biasing toward general QA
const QUESTION_TOKENS: &[&str] = &[
    "what", "how", "why", "who", "whom", "define", "explain", "difference", "meaning",
    "compare", "versus", "что", "как", "почему", "зачем", "кто", "объясни", "разница",
    "сравни", "значит",
];

/// Temporal/recency tokens biasing toward news
const TEMPORAL_TOKENS: &[&str] = &[
    "today", "yesterday", "latest", "update", "updates", "breaking", "now", "currently",
    "recent", "recently", "news", "сегодня", "вчера", "последние", "новости", "сейчас",
    "недавно", "свежие",
];

/// Multi-token temporal phrases checked against the raw query
const TEMPORAL_PHRASES: &[&str] = &[
    "this week", "this month", "на этой неделе", "в этом месяце",
];

/// Geopolitical terms counted as entity signals even when lowercased
const GEOPOLITICAL_TOKENS: &[&str] = &[
    "ukraine", "russia", "china", "taiwan", "israel", "gaza", "iran", "nato", "eu",
    "congress", "senate", "kremlin", "украина", "россия", "китай", "нато", "сенат",
];

static OPERATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(site|after|before):\S+").expect("valid regex"));

/// Count capitalized multi-word runs (two or more consecutive capitalized
/// tokens), skipping the sentence-initial position.
fn entity_runs(query: &str) -> usize {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    let is_cap = |t: &str| t.chars().next().is_some_and(|c| c.is_uppercase());
    let mut runs = 0usize;
    let mut i = 0;
    while i < tokens.len() {
        if is_cap(tokens[i]) {
            let start = i;
            while i < tokens.len() && is_cap(tokens[i]) {
                i += 1;
            }
            if i - start >= 2 && start > 0 {
                runs += 1;
            }
        } else {
            i += 1;
        }
    }
    runs
}

/// Classify a raw query (operators still embedded).
///
/// Any search operator forces news at full confidence; otherwise both
/// intents are scored by weighted signal counts and the max wins.
pub fn classify(query: &str) -> IntentResult {
    if OPERATOR_RE.is_match(query) {
        return IntentResult {
            intent: Intent::NewsCurrentEvents,
            confidence: 1.0,
            reason: "search operator present".to_string(),
        };
    }

    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let hits = |list: &[&str]| tokens.iter().filter(|t| list.contains(*t)).count();
    let question_hits = hits(QUESTION_TOKENS);
    let mut temporal_hits = hits(TEMPORAL_TOKENS);
    temporal_hits += TEMPORAL_PHRASES.iter().filter(|p| lowered.contains(*p)).count();
    let entity_hits = entity_runs(query) + hits(GEOPOLITICAL_TOKENS);

    let qa_score = question_hits * 2;
    let news_score = temporal_hits * 2 + entity_hits;

    if qa_score == 0 && news_score == 0 {
        // Short all-caps-ish queries ("Ukraine grain deal") read as news.
        let has_capitals = query.split_whitespace().skip(1).any(|t| {
            t.chars().next().is_some_and(|c| c.is_uppercase())
        });
        if tokens.len() <= 4 && has_capitals {
            return IntentResult {
                intent: Intent::NewsCurrentEvents,
                confidence: 0.6,
                reason: "short query with capitalized entities".to_string(),
            };
        }
        return IntentResult {
            intent: Intent::GeneralQa,
            confidence: 0.5,
            reason: "no signals; defaulting to knowledge question".to_string(),
        };
    }

    if news_score > qa_score {
        IntentResult {
            intent: Intent::NewsCurrentEvents,
            confidence: confidence_for(news_score, qa_score),
            reason: format!("{temporal_hits} temporal, {entity_hits} entity signals"),
        }
    } else {
        IntentResult {
            intent: Intent::GeneralQa,
            confidence: confidence_for(qa_score, news_score),
            reason: format!("{question_hits} question-pattern signals"),
        }
    }
}

fn confidence_for(winner: usize, loser: usize) -> f64 {
    let margin = winner.saturating_sub(loser) as f64;
    (0.5 + margin * 0.15).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knowledge_question() {
        let result =
            classify("what is the difference between an LLM and a neural network?");
        assert_eq!(result.intent, Intent::GeneralQa);
        assert!(result.confidence >= 0.8, "confidence {}", result.confidence);
    }

    #[test]
    fn test_temporal_news() {
        let result = classify("latest updates on the grain corridor today");
        assert_eq!(result.intent, Intent::NewsCurrentEvents);
        assert!(result.confidence > 0.6);
    }

    #[test]
    fn test_operator_forces_news() {
        let result = classify("AI regulation site:europa.eu");
        assert_eq!(result.intent, Intent::NewsCurrentEvents);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_short_entity_query_leans_news() {
        let result = classify("Pacific Trade Summit");
        assert_eq!(result.intent, Intent::NewsCurrentEvents);
        assert!((result.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_default_is_general_qa() {
        let result = classify("best sourdough hydration ratio");
        assert_eq!(result.intent, Intent::GeneralQa);
        assert!((result.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_russian_question() {
        let result = classify("почему небо голубое, объясни");
        assert_eq!(result.intent, Intent::GeneralQa);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn test_russian_news() {
        let result = classify("последние новости про выборы сегодня");
        assert_eq!(result.intent, Intent::NewsCurrentEvents);
        assert!(result.confidence > 0.6);
    }
}
