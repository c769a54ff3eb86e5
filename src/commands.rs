//! Conversational command surface: `search`, `ask`, `trends`, `analyze`.
//!
//! The chat adapter (out of process) parses user messages into
//! [`Command`] values; everything here is already structured. The
//! retrieval cache is wired into the analytic commands only; `ask`
//! always retrieves fresh.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::ask::{AskOrchestrator, AskRequest, AskResponse};
use crate::config::RankConfig;
use crate::error::{NewswireError, Result};
use crate::llm::{system_message, user_message, GenerationOptions, ProviderManager};
use crate::retrieve::{
    Diagnostics, HybridRetriever, RetrievalCache, RetrievalFlags, RetrievalRequest, ScoredChunk,
};
use crate::storage::{CandidateFilter, Storage};

/// Analysis modes for the `analyze` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzeMode {
    Keywords,
    Sentiment,
    Topics,
}

impl AnalyzeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzeMode::Keywords => "keywords",
            AnalyzeMode::Sentiment => "sentiment",
            AnalyzeMode::Topics => "topics",
        }
    }
}

/// A structured command from the chat adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    Search {
        query: String,
        #[serde(default)]
        hours: Option<i64>,
        #[serde(default)]
        k: Option<usize>,
        #[serde(default)]
        sources: Vec<String>,
        #[serde(default)]
        lang: Option<String>,
    },
    Ask {
        query: String,
        #[serde(default)]
        depth: Option<u8>,
    },
    Trends {
        #[serde(default)]
        hours: Option<i64>,
    },
    Analyze {
        query: String,
        mode: AnalyzeMode,
        #[serde(default)]
        hours: Option<i64>,
    },
}

/// One ranked result row for `search`
#[derive(Debug, Clone, Serialize)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub source_domain: String,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: String,
    pub relevance_score: f64,
}

/// Clustered summary for `trends`
#[derive(Debug, Clone, Serialize)]
pub struct TrendsSummary {
    pub window_hours: i64,
    pub article_count: usize,
    pub by_category: Vec<(String, usize)>,
    pub by_domain: Vec<(String, usize)>,
    pub top_keywords: Vec<(String, usize)>,
}

/// Structured command output
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommandReply {
    Search {
        items: Vec<SearchItem>,
        diagnostics: Diagnostics,
    },
    Answer(Box<AskResponse>),
    Trends(TrendsSummary),
    Analysis {
        mode: AnalyzeMode,
        text: String,
        evidence_count: usize,
    },
}

pub struct CommandHandler {
    storage: Storage,
    retriever: Arc<HybridRetriever>,
    orchestrator: Arc<AskOrchestrator>,
    provider: Arc<ProviderManager>,
    /// Analytic-path cache; `ask` never touches it
    cache: RetrievalCache,
    rank: RankConfig,
    analyze_model: String,
}

impl CommandHandler {
    pub fn new(
        storage: Storage,
        retriever: Arc<HybridRetriever>,
        orchestrator: Arc<AskOrchestrator>,
        provider: Arc<ProviderManager>,
        rank: RankConfig,
        analyze_model: String,
    ) -> Self {
        let cache = RetrievalCache::new(rank.cache_ttl_secs);
        Self {
            storage,
            retriever,
            orchestrator,
            provider,
            cache,
            rank,
            analyze_model,
        }
    }

    pub async fn handle(&self, command: Command) -> Result<CommandReply> {
        match command {
            Command::Search {
                query,
                hours,
                k,
                sources,
                lang,
            } => self.search(query, hours, k, sources, lang).await,
            Command::Ask { query, depth } => {
                let response = self
                    .orchestrator
                    .ask(&AskRequest {
                        query,
                        depth,
                        window_hours: None,
                        k: None,
                        lang: None,
                    })
                    .await?;
                Ok(CommandReply::Answer(Box::new(response)))
            }
            Command::Trends { hours } => self.trends(hours).await,
            Command::Analyze { query, mode, hours } => self.analyze(query, mode, hours).await,
        }
    }

    async fn search(
        &self,
        query: String,
        hours: Option<i64>,
        k: Option<usize>,
        sources: Vec<String>,
        lang: Option<String>,
    ) -> Result<CommandReply> {
        let request = RetrievalRequest {
            query,
            window_hours: hours.unwrap_or(self.rank.default_window_hours),
            k: k.unwrap_or(self.rank.default_k),
            lang,
            sources,
            after: None,
            before: None,
            news_intent: true,
        };
        let (chunks, diagnostics) = self
            .retriever
            .retrieve(&request, RetrievalFlags::default(), None)
            .await?;
        Ok(CommandReply::Search {
            items: chunks.iter().map(search_item).collect(),
            diagnostics,
        })
    }

    /// Cluster the recent window by category and domain with top keywords
    async fn trends(&self, hours: Option<i64>) -> Result<CommandReply> {
        let window_hours = hours.unwrap_or(self.rank.default_window_hours);
        let filter = CandidateFilter {
            published_after: Some(Utc::now() - chrono::Duration::hours(window_hours)),
            published_before: None,
            lang: None,
            sources: None,
        };
        let rows = self.storage.recent_chunks(&filter, 200).await?;

        let mut by_category: HashMap<String, usize> = HashMap::new();
        let mut by_domain: HashMap<String, usize> = HashMap::new();
        let mut keywords: HashMap<String, usize> = HashMap::new();
        let mut articles: HashMap<i64, ()> = HashMap::new();

        for row in &rows {
            articles.insert(row.chunk.article_id, ());
            let category = row
                .chunk
                .category
                .clone()
                .unwrap_or_else(|| "uncategorized".to_string());
            *by_category.entry(category).or_default() += 1;
            *by_domain.entry(crate::urls::etld1(&row.chunk.source_domain)).or_default() += 1;
            for token in row.chunk.title.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
                if token.len() >= 4 && !STOPWORDS.contains(&token) {
                    *keywords.entry(token.to_string()).or_default() += 1;
                }
            }
        }

        let top = |map: HashMap<String, usize>, n: usize| -> Vec<(String, usize)> {
            let mut entries: Vec<(String, usize)> = map.into_iter().collect();
            entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            entries.truncate(n);
            entries
        };

        Ok(CommandReply::Trends(TrendsSummary {
            window_hours,
            article_count: articles.len(),
            by_category: top(by_category, 10),
            by_domain: top(by_domain, 10),
            top_keywords: top(keywords, 15),
        }))
    }

    /// Analytic RAG: cached retrieval plus one mode-specific LLM pass
    async fn analyze(
        &self,
        query: String,
        mode: AnalyzeMode,
        hours: Option<i64>,
    ) -> Result<CommandReply> {
        let request = RetrievalRequest {
            query: query.clone(),
            window_hours: hours.unwrap_or(self.rank.default_window_hours),
            k: self.rank.default_k,
            lang: None,
            sources: Vec::new(),
            after: None,
            before: None,
            news_intent: false,
        };
        let flags = RetrievalFlags {
            use_cache: true,
            ..RetrievalFlags::default()
        };
        let (chunks, _diagnostics) = self
            .retriever
            .retrieve(&request, flags, Some(&self.cache))
            .await?;

        if chunks.is_empty() {
            return Err(NewswireError::NotFound(
                "no articles matched the analysis query".to_string(),
            ));
        }

        let instruction = match mode {
            AnalyzeMode::Keywords => {
                "List the 10 most significant keywords/phrases across the evidence, \
                 each with a one-line justification."
            }
            AnalyzeMode::Sentiment => {
                "Summarize the overall sentiment of the coverage (positive, negative, \
                 mixed) with supporting quotes."
            }
            AnalyzeMode::Topics => {
                "Identify the distinct topics in the evidence and one line on each."
            }
        };

        let evidence: String = chunks
            .iter()
            .map(|c| format!("- {} ({}): {}\n", c.chunk.title, c.chunk.source_domain, c.chunk.text))
            .collect();
        let messages = [
            system_message("You are an analyst over news evidence. Be concrete and cite sources."),
            user_message(format!("{instruction}\n\nQuery: {query}\n\nEvidence:\n{evidence}")),
        ];
        let options = GenerationOptions {
            model: self.analyze_model.clone(),
            max_tokens: 2000,
            timeout_secs: 30,
            reasoning_effort: Some("low".to_string()),
        };
        let response = self.provider.generate(&messages, &options).await?;

        Ok(CommandReply::Analysis {
            mode,
            text: response.text,
            evidence_count: chunks.len(),
        })
    }
}

fn search_item(scored: &ScoredChunk) -> SearchItem {
    let mut snippet = String::new();
    for c in scored.chunk.text.chars() {
        if snippet.len() + c.len_utf8() > 240 {
            break;
        }
        snippet.push(c);
    }
    SearchItem {
        title: scored.chunk.title.clone(),
        url: scored.chunk.url.clone(),
        source_domain: scored.chunk.source_domain.clone(),
        published_at: scored.chunk.published_at,
        snippet,
        relevance_score: scored.score,
    }
}

static STOPWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "this", "that", "with", "from", "have", "will", "been", "after", "over", "into",
        "says", "said", "more", "than", "amid", "what", "when", "where", "their", "about",
        "которые", "после", "из-за", "чтобы", "новости",
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_deserialization() {
        let command: Command = serde_json::from_str(
            r#"{"command": "search", "query": "ai regulation", "hours": 24}"#,
        )
        .unwrap();
        match command {
            Command::Search { query, hours, .. } => {
                assert_eq!(query, "ai regulation");
                assert_eq!(hours, Some(24));
            }
            _ => panic!("wrong variant"),
        }

        let command: Command =
            serde_json::from_str(r#"{"command": "analyze", "query": "q", "mode": "topics"}"#)
                .unwrap();
        match command {
            Command::Analyze { mode, .. } => assert_eq!(mode, AnalyzeMode::Topics),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_stopwords_filter() {
        assert!(STOPWORDS.contains(&"with"));
        assert!(!STOPWORDS.contains(&"regulation"));
    }
}
