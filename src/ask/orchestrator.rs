//! Agentic RAG orchestrator: intent routing, a bounded iterative
//! retrieve-analyze-refine loop with a self-consistency check, and
//! budget-driven degradation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::governor::{BudgetLimits, Governor};
use super::intent::{self, Intent, IntentResult};
use super::prompts;
use super::query::{self, ParsedQuery};
use crate::config::AskConfig;
use crate::error::{NewswireError, Result};
use crate::llm::{system_message, user_message, GenerationOptions, ProviderManager};
use crate::retrieve::{
    Diagnostics, HybridRetriever, RetrievalFlags, RetrievalRequest, ScoredChunk,
};

/// Rough per-iteration spend used for pre-flight depth degradation
const EST_TOKENS_PER_ITERATION: u32 = 1500;
const EST_CENTS_PER_ITERATION: f64 = 1.5;

/// Evidence snippet cap, characters
const SNIPPET_CHARS: usize = 240;

/// Chunks fetched by the refinement retrieval
const REFINE_K: usize = 3;

/// One conversational ask
#[derive(Debug, Clone)]
pub struct AskRequest {
    /// Raw query; operators are still embedded
    pub query: String,
    pub depth: Option<u8>,
    pub window_hours: Option<i64>,
    pub k: Option<usize>,
    pub lang: Option<String>,
}

/// One evidence citation in the final answer
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceItem {
    pub chunk_id: String,
    pub title: String,
    pub url: String,
    pub domain: String,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: String,
}

/// Record of one loop iteration, for the response trace
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub index: u8,
    pub query: String,
    pub retrieved: usize,
    pub answer: String,
    pub needs_more_info: bool,
}

/// The orchestrator's structured output
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub reasoning: String,
    pub confidence: f64,
    pub iterations: Vec<IterationRecord>,
    pub model_used: String,
    pub evidence: Vec<EvidenceItem>,
    /// "LLM/KB" for the knowledge path, "news" for the retrieval path
    pub source: String,
    pub intent: IntentResult,
    pub degraded: bool,
    pub usage: serde_json::Value,
    pub retrieval: Option<Diagnostics>,
}

pub struct AskOrchestrator {
    retriever: Arc<HybridRetriever>,
    provider: Arc<ProviderManager>,
    config: AskConfig,
    default_window_hours: i64,
    default_k: usize,
}

impl AskOrchestrator {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        provider: Arc<ProviderManager>,
        config: AskConfig,
        default_window_hours: i64,
        default_k: usize,
    ) -> Self {
        Self {
            retriever,
            provider,
            config,
            default_window_hours,
            default_k,
        }
    }

    /// Answer one ask request, routing by classified intent.
    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse> {
        let intent = intent::classify(&request.query);
        debug!(intent = ?intent.intent, confidence = intent.confidence, "intent classified");

        match intent.intent {
            Intent::GeneralQa => self.general_qa(request, intent).await,
            Intent::NewsCurrentEvents => self.news_loop(request, intent).await,
        }
    }

    /// Knowledge path: one direct call under the floor budget, no
    /// retrieval, empty evidence.
    async fn general_qa(&self, request: &AskRequest, intent: IntentResult) -> Result<AskResponse> {
        let mut governor = Governor::new(BudgetLimits {
            max_tokens: self.config.general_max_tokens,
            budget_cents: f64::from(self.config.general_budget_cents),
            timeout: Duration::from_secs(self.config.general_timeout_secs),
        });
        governor.check_call(self.config.general_max_tokens / 2, 1.0)?;

        let options = GenerationOptions {
            model: self.config.primary_model.clone(),
            max_tokens: self.config.general_max_tokens,
            timeout_secs: self.config.general_timeout_secs,
            reasoning_effort: Some("low".to_string()),
        };
        let messages = [
            system_message(prompts::general_qa_system_prompt()),
            user_message(request.query.clone()),
        ];
        let started = Instant::now();
        let response = self.provider.generate(&messages, &options).await?;
        governor.record("general_qa", &response.usage, started.elapsed());

        Ok(AskResponse {
            answer: response.text,
            reasoning: "answered from general knowledge without retrieval".to_string(),
            confidence: intent.confidence.max(0.7),
            iterations: Vec::new(),
            model_used: response.model,
            evidence: Vec::new(),
            source: "LLM/KB".to_string(),
            intent,
            degraded: false,
            usage: governor.summary(),
            retrieval: None,
        })
    }

    /// News path: iterative retrieve-analyze-refine with self-check.
    async fn news_loop(&self, request: &AskRequest, intent: IntentResult) -> Result<AskResponse> {
        let mut governor = Governor::new(BudgetLimits {
            max_tokens: self.config.max_tokens,
            budget_cents: f64::from(self.config.budget_cents),
            timeout: Duration::from_secs(self.config.timeout_secs),
        });

        let parsed = query::parse(
            &request.query,
            &self.config.trusted_domains,
            Utc::now(),
        );

        let requested_depth = request.depth.unwrap_or(self.config.depth).clamp(1, 3);
        let depth = governor.affordable_depth(
            requested_depth,
            EST_TOKENS_PER_ITERATION,
            EST_CENTS_PER_ITERATION,
        );
        let mut degraded = depth < requested_depth;
        if degraded {
            warn!(requested = requested_depth, depth, "degrading depth to fit budget");
        }

        let window_hours = parsed
            .time_window
            .as_deref()
            .and_then(query::window_hours)
            .or(request.window_hours)
            .unwrap_or(self.default_window_hours);

        let retrieval_request = RetrievalRequest {
            query: parsed.clean_query.clone(),
            window_hours,
            k: request.k.unwrap_or(self.default_k),
            lang: request.lang.clone(),
            sources: parsed.domains.clone(),
            after: parsed.after,
            before: parsed.before,
            news_intent: true,
        };

        // Fresh retrieval every call: the cache is never wired into the
        // conversational path.
        let (chunks, diagnostics) = self
            .retriever
            .retrieve(&retrieval_request, RetrievalFlags::default(), None)
            .await?;

        if chunks.is_empty() {
            return Ok(AskResponse {
                answer: "No matching articles in the requested window.".to_string(),
                reasoning: format!(
                    "retrieval found nothing after auto-recovery (warnings: {})",
                    diagnostics.warnings.join(", ")
                ),
                confidence: 0.2,
                iterations: Vec::new(),
                model_used: String::new(),
                evidence: Vec::new(),
                source: "news".to_string(),
                intent,
                degraded,
                usage: governor.summary(),
                retrieval: Some(diagnostics),
            });
        }

        let mut working_set: Vec<ScoredChunk> = Vec::new();
        let mut seen: HashMap<String, ()> = HashMap::new();
        merge_chunks(&mut working_set, &mut seen, chunks);

        let mut iterations: Vec<IterationRecord> = Vec::new();
        let mut model_used = String::new();

        // Iteration 1: analyze the initial evidence.
        let step1 = match self
            .analysis_call(&parsed, &working_set, None, &mut governor, &mut model_used)
            .await
        {
            Ok(step) => step,
            Err(e) => return Err(e),
        };
        iterations.push(IterationRecord {
            index: 1,
            query: parsed.clean_query.clone(),
            retrieved: working_set.len(),
            answer: step1.answer.clone(),
            needs_more_info: step1.needs_more_info,
        });

        let mut final_answer = step1.answer.clone();
        let mut final_reasoning = step1.reasoning.clone();
        let mut confidence: f64 = 0.6;

        // Iteration 2: refine the query and extend the evidence.
        let mut step2 = None;
        if depth >= 2 && step1.needs_more_info && governor.deadline_exceeded() {
            // Out of wall clock: the iteration-1 result stands.
            degraded = true;
        }
        if depth >= 2 && step1.needs_more_info && !governor.deadline_exceeded() {
            match self
                .refine_and_reanalyze(&parsed, &retrieval_request, &mut working_set, &mut seen, &step1, &mut governor, &mut model_used)
                .await
            {
                Ok((refined_query, step)) => {
                    iterations.push(IterationRecord {
                        index: 2,
                        query: refined_query,
                        retrieved: working_set.len(),
                        answer: step.answer.clone(),
                        needs_more_info: step.needs_more_info,
                    });
                    final_answer = step.answer.clone();
                    final_reasoning = step.reasoning.clone();
                    confidence = 0.7;
                    step2 = Some(step);
                }
                Err(e) if matches!(e, NewswireError::Budget(_)) => {
                    degraded = true;
                    warn!(error = %e, "iteration 2 skipped on budget");
                }
                Err(e) => {
                    // Keep the partial answer from iteration 1.
                    degraded = true;
                    warn!(error = %e, "iteration 2 failed, returning iteration 1 result");
                }
            }
        }

        // Iteration 3: self-consistency check between the two answers.
        if depth >= 3 && governor.deadline_exceeded() && step2.is_some() {
            degraded = true;
        }
        if depth >= 3 && !governor.deadline_exceeded() {
            if let Some(step2) = &step2 {
                match self
                    .self_check(&parsed, &step1.answer, step2, &working_set, &mut governor, &mut model_used)
                    .await
                {
                    Ok(check) => {
                        iterations.push(IterationRecord {
                            index: 3,
                            query: parsed.clean_query.clone(),
                            retrieved: working_set.len(),
                            answer: check.answer.clone(),
                            needs_more_info: false,
                        });
                        final_answer = check.answer;
                        final_reasoning = check.reasoning;
                        confidence = check.confidence;
                    }
                    Err(e) => {
                        degraded = true;
                        warn!(error = %e, "self-check failed, keeping iteration 2 result");
                    }
                }
            } else if step2.is_none() && !step1.needs_more_info {
                // Nothing to compare; the single answer stands.
                confidence = confidence.max(0.75);
            }
        }

        let evidence = working_set.iter().map(evidence_item).collect();
        info!(
            iterations = iterations.len(),
            confidence,
            evidence = working_set.len(),
            "ask completed"
        );

        Ok(AskResponse {
            answer: final_answer,
            reasoning: final_reasoning,
            confidence,
            iterations,
            model_used,
            evidence,
            source: "news".to_string(),
            intent,
            degraded,
            usage: governor.summary(),
            retrieval: Some(diagnostics),
        })
    }

    async fn analysis_call(
        &self,
        parsed: &ParsedQuery,
        chunks: &[ScoredChunk],
        notes: Option<&str>,
        governor: &mut Governor,
        model_used: &mut String,
    ) -> Result<prompts::AnalysisStep> {
        governor.check_call(EST_TOKENS_PER_ITERATION, EST_CENTS_PER_ITERATION)?;

        let options = self.call_options(governor);
        let messages = [
            system_message(prompts::analysis_system_prompt()),
            user_message(prompts::build_analysis_prompt(
                &parsed.clean_query,
                chunks,
                notes,
            )),
        ];
        let started = Instant::now();
        let response = self.provider.generate(&messages, &options).await?;
        governor.record("analyze", &response.usage, started.elapsed());
        *model_used = response.model.clone();
        Ok(prompts::parse_analysis(&response.text))
    }

    #[allow(clippy::too_many_arguments)]
    async fn refine_and_reanalyze(
        &self,
        parsed: &ParsedQuery,
        base_request: &RetrievalRequest,
        working_set: &mut Vec<ScoredChunk>,
        seen: &mut HashMap<String, ()>,
        step1: &prompts::AnalysisStep,
        governor: &mut Governor,
        model_used: &mut String,
    ) -> Result<(String, prompts::AnalysisStep)> {
        governor.check_call(EST_TOKENS_PER_ITERATION, EST_CENTS_PER_ITERATION)?;

        let options = self.call_options(governor);
        let messages = [
            system_message(prompts::refine_system_prompt()),
            user_message(prompts::build_refine_prompt(
                &parsed.clean_query,
                &step1.answer,
            )),
        ];
        let started = Instant::now();
        let response = self.provider.generate(&messages, &options).await?;
        governor.record("refine", &response.usage, started.elapsed());
        *model_used = response.model.clone();

        let refined_query = response.text.trim().trim_matches('"').to_string();
        let mut refine_request = base_request.clone();
        refine_request.query = refined_query.clone();
        refine_request.k = REFINE_K;

        let (more, _) = self
            .retriever
            .retrieve(&refine_request, RetrievalFlags::default(), None)
            .await?;
        merge_chunks(working_set, seen, more);

        let step = self
            .analysis_call(parsed, working_set, None, governor, model_used)
            .await?;
        Ok((refined_query, step))
    }

    /// The self-check: compare answers one and two; reconcile on conflict.
    async fn self_check(
        &self,
        parsed: &ParsedQuery,
        answer1: &str,
        step2: &prompts::AnalysisStep,
        working_set: &[ScoredChunk],
        governor: &mut Governor,
        model_used: &mut String,
    ) -> Result<CheckedAnswer> {
        governor.check_call(EST_TOKENS_PER_ITERATION / 2, EST_CENTS_PER_ITERATION / 2.0)?;

        let options = self.call_options(governor);
        let messages = [
            system_message(prompts::consistency_system_prompt()),
            user_message(prompts::build_consistency_prompt(
                &parsed.clean_query,
                answer1,
                &step2.answer,
            )),
        ];
        let started = Instant::now();
        let response = self.provider.generate(&messages, &options).await?;
        governor.record("self_check", &response.usage, started.elapsed());
        *model_used = response.model.clone();

        let verdict = prompts::parse_consistency(&response.text);
        if verdict.consistent {
            return Ok(CheckedAnswer {
                answer: step2.answer.clone(),
                reasoning: format!(
                    "{} (consistent with previous iteration)",
                    step2.reasoning
                ),
                confidence: 0.9,
            });
        }

        // Reconcile with the full accumulated evidence and the explicit
        // inconsistency list.
        let notes = format!(
            "The two draft answers disagree. Inconsistencies: {}. Resolve them \
             against the evidence.",
            verdict.inconsistencies.join("; ")
        );
        match self
            .analysis_call(parsed, working_set, Some(&notes), governor, model_used)
            .await
        {
            Ok(reconciled) => Ok(CheckedAnswer {
                answer: reconciled.answer,
                reasoning: format!(
                    "reconciled conflicting drafts ({}). {}",
                    verdict.inconsistencies.join("; "),
                    reconciled.reasoning
                ),
                confidence: 0.55,
            }),
            Err(_) => Ok(CheckedAnswer {
                answer: step2.answer.clone(),
                reasoning: format!(
                    "unresolved inconsistency between iterations: {}",
                    verdict.inconsistencies.join("; ")
                ),
                confidence: 0.45,
            }),
        }
    }

    /// Per-call options bounded by the governor's remaining wall clock
    fn call_options(&self, governor: &Governor) -> GenerationOptions {
        let remaining = Duration::from_secs(self.config.timeout_secs)
            .saturating_sub(governor.elapsed())
            .as_secs()
            .max(1);
        GenerationOptions {
            model: self.config.primary_model.clone(),
            max_tokens: governor.remaining_tokens().min(self.config.max_tokens / 2).max(256),
            timeout_secs: remaining,
            reasoning_effort: Some(self.config.reasoning_effort.clone()),
        }
    }
}

struct CheckedAnswer {
    answer: String,
    reasoning: String,
    confidence: f64,
}

/// Merge retrieved chunks into the working set, keyed by chunk id
fn merge_chunks(
    working_set: &mut Vec<ScoredChunk>,
    seen: &mut HashMap<String, ()>,
    incoming: Vec<ScoredChunk>,
) {
    for chunk in incoming {
        if seen.insert(chunk.chunk.chunk_id.clone(), ()).is_none() {
            working_set.push(chunk);
        }
    }
}

fn evidence_item(scored: &ScoredChunk) -> EvidenceItem {
    let mut snippet = String::with_capacity(SNIPPET_CHARS);
    for c in scored.chunk.text.chars() {
        if snippet.len() + c.len_utf8() > SNIPPET_CHARS {
            break;
        }
        snippet.push(c);
    }
    EvidenceItem {
        chunk_id: scored.chunk.chunk_id.clone(),
        title: scored.chunk.title.clone(),
        url: scored.chunk.url.clone(),
        domain: scored.chunk.source_domain.clone(),
        published_at: scored.chunk.published_at,
        snippet,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, SemanticType};

    fn scored(id: &str, text: &str) -> ScoredChunk {
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
                source_domain: "bbc.com".to_string(),
                url: "https://bbc.com/a".to_string(),
                title: "title".to_string(),
                published_at: None,
                lang: "en".to_string(),
                category: None,
                quality_score: 0.5,
                word_count: 2,
            },
            similarity: 0.5,
            lexical: 0.5,
            score: 0.5,
        }
    }

    #[test]
    fn test_merge_dedups_by_chunk_id() {
        let mut working = Vec::new();
        let mut seen = HashMap::new();
        merge_chunks(&mut working, &mut seen, vec![scored("1#0", "a"), scored("1#1", "b")]);
        merge_chunks(&mut working, &mut seen, vec![scored("1#0", "a"), scored("2#0", "c")]);
        let ids: Vec<&str> = working.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["1#0", "1#1", "2#0"]);
    }

    #[test]
    fn test_snippet_capped_on_char_boundary() {
        let long = "статья ".repeat(100);
        let item = evidence_item(&scored("1#0", &long));
        assert!(item.snippet.len() <= SNIPPET_CHARS);
        assert!(!item.snippet.is_empty());
        // Valid UTF-8 by construction; the cap never splits a character.
        assert!(item.snippet.is_char_boundary(item.snippet.len()));
    }
}
