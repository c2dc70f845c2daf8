//! Answer synthesis: source scoring, prompt assembly, generation and
//! citation grounding.
//!
//! Every source gets a relevance class from lexical overlap between the
//! question's content terms and the chunk:
//!
//! | class        | rule                                                        |
//! |--------------|-------------------------------------------------------------|
//! | `direct`     | best sentence covers ≥ `direct_coverage` of the terms (and, |
//! |              | for temporal questions, carries a date expression)          |
//! | `supporting` | whole chunk covers ≥ `supporting_coverage` of the terms     |
//! | `contextual` | anything else                                               |
//!
//! The aggregate confidence is `evidence × (0.6 + 0.4 × analysis)`, where
//! `evidence` is the mean of `confidence × weight(relevance)` over the top
//! `aggregate_sources` sources. A generated answer keeps only sentences that
//! cite a valid source; when none survive, the answer says so and the
//! aggregate is halved.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analyze::temporal;
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::generate::{CitedExcerpt, GenerationRequest, Generator};
use crate::models::{
    Complexity, QueryAnalysis, QueryResponse, QueryType, RelevanceType, ResponseStatus,
    SourceReference, TemporalKind,
};
use crate::retrieve::RankedChunk;
use crate::retry::{self, RetryPolicy};
use crate::text;

pub const NO_EVIDENCE_ANSWER: &str =
    "No supporting evidence was found in the uploaded compliance documents for this question.";

pub const INSUFFICIENT_EVIDENCE_ANSWER: &str =
    "The retrieved evidence is insufficient to give a cited answer to this question.";

pub const UNAVAILABLE_ANSWER: &str =
    "The compliance assistant is temporarily unavailable. Please try again shortly.";

const SYSTEM_PROMPT: &str = r#"You are an assistant for auditors reviewing regulatory compliance documents (SOX, COSO, internal control frameworks).
Answer strictly from the numbered excerpts provided. Cite every statement with the excerpt number in square brackets, e.g. [1] or [2].
If the excerpts do not contain the answer, say so explicitly. Never cite a number that is not listed.
Prefer a short answer that is fully supported over a longer one that is not."#;

/// Words that phrase the question rather than name what is asked about.
const QUESTION_WORDS: &[&str] = &["when", "where", "whose", "explain", "describe", "tell", "list"];

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisParams {
    /// Maximum excerpt length in bytes, before the ellipsis.
    pub excerpt_chars: usize,
    pub direct_coverage: f64,
    pub supporting_coverage: f64,
    /// Sources combined into the aggregate confidence.
    pub aggregate_sources: usize,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            excerpt_chars: 300,
            direct_coverage: 0.6,
            supporting_coverage: 0.25,
            aggregate_sources: 3,
        }
    }
}

pub struct Synthesizer {
    generator: Arc<dyn Generator>,
    params: SynthesisParams,
    retry: RetryPolicy,
}

/// A source scored against the question, before prompt assembly.
struct Scored<'a> {
    ranked: &'a RankedChunk,
    reference: SourceReference,
    /// Best-matching sentence, as a byte span of the chunk text.
    best: (usize, usize),
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn Generator>, params: SynthesisParams, retry: RetryPolicy) -> Self {
        Self {
            generator,
            params,
            retry,
        }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        mut analysis: QueryAnalysis,
        ranked: &[RankedChunk],
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        let scored = self.score_sources(question, &analysis, ranked);
        if scored.is_empty() {
            return Ok(no_evidence(question, analysis));
        }

        resolve_indicators(&mut analysis, &scored);
        let sources: Vec<SourceReference> = scored.iter().map(|s| s.reference.clone()).collect();
        let mut confidence = self.aggregate(&sources, analysis.confidence_score);

        let request = build_request(question, &analysis, &scored);
        let raw = retry::call(&self.retry, cancel, "text generation", || {
            self.generator.generate(&request)
        })
        .await?;

        let answer = match ground(&raw, sources.len()) {
            Some(grounded) => grounded,
            None => {
                warn!(
                    generator = self.generator.model_name(),
                    "generated answer cited no valid source"
                );
                confidence /= 2.0;
                INSUFFICIENT_EVIDENCE_ANSWER.to_string()
            }
        };

        debug!(sources = sources.len(), confidence, "answer synthesized");
        Ok(QueryResponse {
            question: question.to_string(),
            answer,
            status: ResponseStatus::Answered,
            confidence,
            sources,
            query_analysis: analysis,
        })
    }

    fn score_sources<'a>(
        &self,
        question: &str,
        analysis: &QueryAnalysis,
        ranked: &'a [RankedChunk],
    ) -> Vec<Scored<'a>> {
        let wanted: Vec<String> = text::terms(question)
            .into_iter()
            .filter(|t| !QUESTION_WORDS.contains(&t.as_str()))
            .collect();
        let temporal_question = analysis.query_type == QueryType::Temporal
            || analysis
                .temporal_context
                .temporal_references
                .iter()
                .any(|r| r.kind == TemporalKind::Indicator);

        let mut seen_text: Vec<&str> = Vec::new();
        let mut out: Vec<Scored<'a>> = Vec::new();
        for rc in ranked {
            let body = rc.chunk.text.trim();
            if body.is_empty() || seen_text.contains(&body) {
                continue;
            }
            seen_text.push(body);

            let text = &rc.chunk.text;
            let (best, best_coverage) = best_sentence(text, &wanted);
            let chunk_coverage = text::coverage(&wanted, &text::terms(text));
            let dated = temporal::first_explicit(&text[best.0..best.1]).is_some();

            let relevance_type = if best_coverage >= self.params.direct_coverage
                && (!temporal_question || dated)
            {
                RelevanceType::Direct
            } else if chunk_coverage >= self.params.supporting_coverage {
                RelevanceType::Supporting
            } else {
                RelevanceType::Contextual
            };

            out.push(Scored {
                ranked: rc,
                reference: SourceReference {
                    citation: out.len() + 1,
                    document_id: rc.chunk.document_id.clone(),
                    document: rc.document.clone(),
                    chunk_id: rc.chunk.id.clone(),
                    page: rc.chunk.page,
                    relevance_type,
                    confidence: rc.similarity.clamp(0.0, 1.0),
                    excerpt: excerpt(text, best, self.params.excerpt_chars),
                },
                best,
            });
        }
        out
    }

    fn aggregate(&self, sources: &[SourceReference], analysis_confidence: f64) -> f64 {
        let top: Vec<f64> = sources
            .iter()
            .take(self.params.aggregate_sources.max(1))
            .map(|s| s.confidence * s.relevance_type.weight())
            .collect();
        if top.is_empty() {
            return 0.0;
        }
        let evidence = top.iter().sum::<f64>() / top.len() as f64;
        (evidence * (0.6 + 0.4 * analysis_confidence.clamp(0.0, 1.0))).clamp(0.0, 1.0)
    }
}

pub fn no_evidence(question: &str, analysis: QueryAnalysis) -> QueryResponse {
    QueryResponse {
        question: question.to_string(),
        answer: NO_EVIDENCE_ANSWER.to_string(),
        status: ResponseStatus::NoEvidence,
        confidence: 0.0,
        sources: Vec::new(),
        query_analysis: analysis,
    }
}

pub fn unavailable(question: &str, analysis: QueryAnalysis) -> QueryResponse {
    QueryResponse {
        question: question.to_string(),
        answer: UNAVAILABLE_ANSWER.to_string(),
        status: ResponseStatus::Unavailable,
        confidence: 0.0,
        sources: Vec::new(),
        query_analysis: analysis,
    }
}

/// Highest-coverage sentence span, earliest on ties.
fn best_sentence(text: &str, wanted: &[String]) -> ((usize, usize), f64) {
    let mut best = ((0, text.len()), 0.0);
    let mut found = false;
    for (s, e) in text::sentences(text) {
        let c = text::coverage(wanted, &text::terms(&text[s..e]));
        if !found || c > best.1 {
            best = ((s, e), c);
            found = true;
        }
    }
    best
}

/// Window around the best sentence, extended forward while it fits.
fn excerpt(text: &str, best: (usize, usize), max: usize) -> String {
    let (start, mut end) = best;
    if end - start > max {
        let mut cut = start + max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(ws) = text[start..cut].rfind(char::is_whitespace) {
            if ws > 0 {
                cut = start + ws;
            }
        }
        end = cut;
    } else {
        for (s, e) in text::sentences(text) {
            if s >= end && e - start <= max {
                end = e;
            } else if s >= end {
                break;
            }
        }
    }

    let mut out = String::new();
    if !text[..start].trim().is_empty() {
        out.push('…');
    }
    out.push_str(text[start..end].trim_end());
    if !text[end..].trim().is_empty() {
        out.push('…');
    }
    out
}

/// Fill unresolved "when"-style references from the first direct source.
fn resolve_indicators(analysis: &mut QueryAnalysis, scored: &[Scored<'_>]) {
    let unresolved = analysis
        .temporal_context
        .temporal_references
        .iter()
        .any(|r| r.kind == TemporalKind::Indicator && r.resolved_range.is_none());
    if !unresolved {
        return;
    }
    let Some(range) = scored
        .iter()
        .filter(|s| s.reference.relevance_type == RelevanceType::Direct)
        .find_map(|s| {
            let text = &s.ranked.chunk.text;
            temporal::first_explicit(&text[s.best.0..s.best.1])
                .or_else(|| temporal::first_explicit(text))
                .and_then(|r| r.resolved_range)
        })
    else {
        return;
    };
    for reference in &mut analysis.temporal_context.temporal_references {
        if reference.kind == TemporalKind::Indicator && reference.resolved_range.is_none() {
            reference.resolved_range = Some(range.clone());
        }
    }
}

fn build_request(question: &str, analysis: &QueryAnalysis, scored: &[Scored<'_>]) -> GenerationRequest {
    let excerpts: Vec<CitedExcerpt> = scored
        .iter()
        .map(|s| CitedExcerpt {
            citation: s.reference.citation,
            document: s.reference.document.clone(),
            page: s.reference.page,
            text: s.ranked.chunk.text.clone(),
        })
        .collect();

    let periods: Vec<String> = analysis
        .temporal_context
        .temporal_references
        .iter()
        .map(|r| match &r.resolved_range {
            Some(range) => format!("{} ({} to {})", r.text, range.start, range.end),
            None => r.text.clone(),
        })
        .collect();

    let style = match analysis.complexity {
        Complexity::Simple => "Give a direct, concise answer.",
        Complexity::Moderate => "Include the relevant context and a brief explanation.",
        Complexity::Complex => "Give a structured analysis covering each part of the question.",
    };

    let mut user = format!(
        "QUERY ANALYSIS:\nQuery type: {}\nComplexity: {}\nTemporal context: {}\n\nEXCERPTS:\n",
        analysis.query_type.as_str(),
        analysis.complexity.as_str(),
        if periods.is_empty() { "none".to_string() } else { periods.join(", ") },
    );
    for (excerpt, s) in excerpts.iter().zip(scored) {
        let kind = if s.ranked.chunk.is_table() { ", table" } else { "" };
        user.push_str(&format!(
            "[{}] {} (page {}{})\n{}\n\n",
            excerpt.citation, excerpt.document, excerpt.page, kind, excerpt.text
        ));
    }
    user.push_str(&format!("{style}\n\nQuestion: {question}"));

    GenerationRequest {
        system: SYSTEM_PROMPT.to_string(),
        user,
        question: question.to_string(),
        excerpts,
    }
}

/// Keep sentences citing at least one of `[1]..=[n]`; drop invalid markers.
fn ground(answer: &str, n: usize) -> Option<String> {
    let mut units: Vec<String> = Vec::new();
    for (s, e) in text::sentences(answer) {
        let sentence = &answer[s..e];
        let bare = CITATION_RE.replace_all(sentence, "");
        match units.last_mut() {
            // A citation on its own belongs to the preceding sentence.
            Some(prev) if !bare.chars().any(char::is_alphanumeric) => {
                prev.push(' ');
                prev.push_str(sentence);
            }
            _ => units.push(sentence.to_string()),
        }
    }

    let kept: Vec<String> = units
        .into_iter()
        .filter_map(|unit| {
            let valid = |k: usize| (1..=n).contains(&k);
            let cites = CITATION_RE
                .captures_iter(&unit)
                .filter_map(|c| c[1].parse::<usize>().ok())
                .any(valid);
            if !cites {
                return None;
            }
            let cleaned = CITATION_RE.replace_all(&unit, |c: &regex::Captures<'_>| {
                match c[1].parse::<usize>() {
                    Ok(k) if valid(k) => c[0].to_string(),
                    _ => String::new(),
                }
            });
            Some(cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
        })
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" "))
    }
}
