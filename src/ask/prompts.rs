//! Prompt builders and response parsing for the agentic ask loop.

use serde::Deserialize;

use crate::retrieve::ScoredChunk;

/// Parsed output of an analyze-and-answer step
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisStep {
    pub answer: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub needs_more_info: bool,
}

/// Parsed output of the consistency check
#[derive(Debug, Clone, Deserialize)]
pub struct ConsistencyVerdict {
    pub consistent: bool,
    #[serde(default)]
    pub inconsistencies: Vec<String>,
}

fn render_evidence(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for (i, scored) in chunks.iter().enumerate() {
        let date = scored
            .chunk
            .published_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "undated".to_string());
        out.push_str(&format!(
            "[{}] {} ({}, {})\n{}\n\n",
            i + 1,
            scored.chunk.title,
            scored.chunk.source_domain,
            date,
            scored.chunk.text
        ));
    }
    out
}

pub fn analysis_system_prompt() -> &'static str {
    "You analyze news evidence and answer the user's question from it. \
     Cite evidence by its [n] marker. Respond with JSON: \
     {\"answer\": str, \"reasoning\": str, \"needs_more_info\": bool}. \
     Set needs_more_info only when the evidence cannot support an answer."
}

pub fn build_analysis_prompt(query: &str, chunks: &[ScoredChunk], notes: Option<&str>) -> String {
    let mut prompt = format!("Question: {query}\n\nEvidence:\n{}", render_evidence(chunks));
    if let Some(notes) = notes {
        prompt.push_str(&format!("\nAdditional context:\n{notes}\n"));
    }
    prompt
}

pub fn refine_system_prompt() -> &'static str {
    "Given a question and a draft answer that lacked sufficient evidence, \
     produce one refined search query that would surface the missing facts. \
     Respond with the query text only."
}

pub fn build_refine_prompt(query: &str, draft_answer: &str) -> String {
    format!("Question: {query}\n\nDraft answer (insufficient): {draft_answer}")
}

pub fn consistency_system_prompt() -> &'static str {
    "Compare two answers to the same question for semantic consistency. \
     Respond with JSON: {\"consistent\": bool, \"inconsistencies\": [str]}."
}

pub fn build_consistency_prompt(query: &str, first: &str, second: &str) -> String {
    format!("Question: {query}\n\nAnswer A: {first}\n\nAnswer B: {second}")
}

pub fn general_qa_system_prompt() -> &'static str {
    "You are a concise, factual assistant. Answer from general knowledge; \
     say so plainly when you are unsure."
}

/// Parse an analysis response: JSON when possible, raw text as the answer
/// otherwise (the loop must never fail on a model that ignored the shape).
pub fn parse_analysis(raw: &str) -> AnalysisStep {
    let trimmed = strip_fences(raw);
    serde_json::from_str(trimmed).unwrap_or_else(|_| AnalysisStep {
        answer: raw.trim().to_string(),
        reasoning: String::new(),
        needs_more_info: false,
    })
}

/// Parse a consistency verdict; unparseable output counts as consistent
/// so a flaky check never forces an extra iteration.
pub fn parse_consistency(raw: &str) -> ConsistencyVerdict {
    let trimmed = strip_fences(raw);
    serde_json::from_str(trimmed).unwrap_or(ConsistencyVerdict {
        consistent: true,
        inconsistencies: Vec::new(),
    })
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analysis_json() {
        let step = parse_analysis(
            r#"{"answer": "Rates held steady.", "reasoning": "Both sources agree.", "needs_more_info": false}"#,
        );
        assert_eq!(step.answer, "Rates held steady.");
        assert!(!step.needs_more_info);
    }

    #[test]
    fn test_parse_analysis_raw_text_fallback() {
        let step = parse_analysis("The central bank held rates steady.");
        assert_eq!(step.answer, "The central bank held rates steady.");
        assert!(!step.needs_more_info);
    }

    #[test]
    fn test_parse_consistency() {
        let verdict = parse_consistency(r#"{"consistent": false, "inconsistencies": ["dates differ"]}"#);
        assert!(!verdict.consistent);
        assert_eq!(verdict.inconsistencies.len(), 1);

        let fallback = parse_consistency("sure, they look fine");
        assert!(fallback.consistent);
    }

    #[test]
    fn test_parse_fenced_analysis() {
        let step = parse_analysis("```json\n{\"answer\": \"ok\"}\n```");
        assert_eq!(step.answer, "ok");
    }
}
