//! Rule-based question classification and confidence scoring.
//!
//! Each [`QueryType`] has a weighted cue lexicon. The highest total wins;
//! ties go to the more specific type (comparative > procedural > temporal >
//! definitional > factual). `Unknown` is reserved for questions where no
//! cue fires at all.

use crate::models::{Complexity, QueryType};

/// Type priority for tie-breaking, most specific first.
const PRIORITY: [QueryType; 5] = [
    QueryType::Comparative,
    QueryType::Procedural,
    QueryType::Temporal,
    QueryType::Definitional,
    QueryType::Factual,
];

const COMPARATIVE_CUES: &[(&str, f64)] = &[
    ("compare", 2.0),
    ("compared", 2.0),
    ("comparison", 2.0),
    ("versus", 2.0),
    ("vs", 2.0),
    ("difference", 2.0),
    ("differences", 2.0),
    ("differ", 1.5),
    ("contrast", 2.0),
    ("as opposed to", 1.5),
    ("relative to", 1.0),
    ("better than", 1.5),
];

const PROCEDURAL_CUES: &[(&str, f64)] = &[
    ("how to", 2.0),
    ("how do", 1.5),
    ("how does", 1.5),
    ("how should", 2.0),
    ("how are", 1.5),
    ("how is", 1.0),
    ("process", 2.0),
    ("procedure", 2.0),
    ("procedures", 2.0),
    ("steps", 2.0),
    ("workflow", 2.0),
    ("implement", 1.0),
    ("perform", 1.0),
    ("documented", 1.0),
    ("documenting", 1.0),
];

const TEMPORAL_CUES: &[(&str, f64)] = &[
    ("when", 2.0),
    ("deadline", 2.0),
    ("deadlines", 2.0),
    ("due", 1.5),
    ("timeline", 2.0),
    ("how long", 2.0),
    ("by what date", 2.5),
    ("date", 1.5),
    ("schedule", 1.0),
    ("history", 1.0),
    ("since", 1.0),
    ("until", 1.0),
];

const DEFINITIONAL_CUES: &[(&str, f64)] = &[
    ("define", 2.0),
    ("definition", 2.0),
    ("meaning", 1.5),
    ("mean", 1.0),
    ("stands for", 2.0),
    ("what is", 1.0),
    ("what are", 1.0),
    ("explain", 1.0),
];

const FACTUAL_CUES: &[(&str, f64)] = &[
    ("who", 1.0),
    ("which", 1.0),
    ("what", 0.5),
    ("where", 1.0),
    ("how many", 1.5),
    ("how much", 1.5),
    ("list", 1.0),
    ("is there", 1.0),
    ("are there", 1.0),
    ("does", 0.5),
    ("did", 0.5),
    ("was", 0.5),
];

const ANALYTIC_CUES: &[&str] = &[
    "compare",
    "compared",
    "analyze",
    "analyse",
    "evaluate",
    "assess",
    "implications",
    "impact",
    "relationship",
    "trade off",
];

const CLAUSE_MARKERS: &[&str] = &["if", "because", "whether", "although", "unless", "while", "whereas"];

const HEDGES: &[&str] = &[
    "maybe",
    "perhaps",
    "possibly",
    "might",
    "probably",
    "somewhat",
    "roughly",
    "sort of",
    "kind of",
    "i think",
    "i guess",
    "not sure",
];

const VAGUE: &[&str] = &["thing", "things", "stuff", "something", "somehow", "whatever", "etc"];

const COMPLIANCE_TERMS: &[&str] = &[
    "compliance",
    "regulation",
    "regulatory",
    "requirement",
    "requirements",
    "audit",
    "control",
    "controls",
    "policy",
    "framework",
];

/// Question text prepared for cue matching.
///
/// Cues match against the content words only, with hedges, vague fillers
/// and alternations removed, so adding ambiguity never changes which cues
/// fire. Ambiguity signals are counted on the full word list.
#[derive(Debug, Clone)]
pub(crate) struct Normalized {
    words: Vec<String>,
    content: Vec<String>,
    padded: String,
}

impl Normalized {
    pub(crate) fn new(text: &str) -> Self {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let fillers: Vec<Vec<&str>> = HEDGES
            .iter()
            .chain(VAGUE.iter())
            .chain(std::iter::once(&"or"))
            .map(|p| p.split(' ').collect())
            .collect();
        let mut content = Vec::with_capacity(words.len());
        let mut i = 0;
        while i < words.len() {
            match fillers.iter().find(|f| starts_with(&words[i..], f)) {
                Some(f) => i += f.len(),
                None => {
                    content.push(words[i].clone());
                    i += 1;
                }
            }
        }

        Self {
            padded: format!(" {} ", content.join(" ")),
            words,
            content,
        }
    }

    /// Whether a cue phrase occurs among the content words.
    pub(crate) fn has(&self, phrase: &str) -> bool {
        self.padded.contains(&format!(" {phrase} "))
    }

    /// Occurrences of `phrase` in the full word list.
    fn count(&self, phrase: &str) -> usize {
        let target: Vec<&str> = phrase.split(' ').collect();
        if target.is_empty() || target.len() > self.words.len() {
            return 0;
        }
        self.words
            .windows(target.len())
            .filter(|w| w.iter().zip(&target).all(|(a, b)| a == b))
            .count()
    }

    fn count_any(&self, phrases: &[&str]) -> usize {
        phrases.iter().map(|p| self.count(p)).sum()
    }

    fn count_content(&self, phrase: &str) -> usize {
        self.content.iter().filter(|w| *w == phrase).count()
    }

    pub(crate) fn content_words(&self) -> usize {
        self.content.len()
    }
}

fn starts_with(words: &[String], phrase: &[&str]) -> bool {
    words.len() >= phrase.len() && words.iter().zip(phrase).all(|(a, b)| a == b)
}

fn cues(query_type: QueryType) -> &'static [(&'static str, f64)] {
    match query_type {
        QueryType::Comparative => COMPARATIVE_CUES,
        QueryType::Procedural => PROCEDURAL_CUES,
        QueryType::Temporal => TEMPORAL_CUES,
        QueryType::Definitional => DEFINITIONAL_CUES,
        QueryType::Factual | QueryType::Unknown => FACTUAL_CUES,
    }
}

/// Winning type and the number of other types whose cues also fired.
pub(crate) fn classify_type(text: &Normalized) -> (QueryType, usize) {
    let scores: Vec<(QueryType, f64)> = PRIORITY
        .iter()
        .map(|&t| {
            let score = cues(t)
                .iter()
                .filter(|(cue, _)| text.has(cue))
                .map(|(_, w)| w)
                .sum();
            (t, score)
        })
        .collect();

    let mut best: Option<(QueryType, f64)> = None;
    for &(t, score) in &scores {
        // Strict comparison keeps the earlier, more specific type on ties.
        if score > 0.0 && best.map_or(true, |(_, b)| score > b) {
            best = Some((t, score));
        }
    }
    match best {
        Some((winner, _)) => {
            let conflicts = scores.iter().filter(|(t, s)| *t != winner && *s > 0.0).count();
            (winner, conflicts)
        }
        None => (QueryType::Unknown, 0),
    }
}

pub(crate) fn assess_complexity(text: &Normalized, entity_count: usize) -> Complexity {
    if ANALYTIC_CUES.iter().any(|c| text.has(c)) {
        return Complexity::Complex;
    }
    let clauses: usize = CLAUSE_MARKERS.iter().map(|m| text.count_content(m)).sum();
    let coordinated = text.has("and");
    if entity_count >= 2 || clauses >= 1 || coordinated || text.content_words() > 15 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}

/// Ambiguity signals that lower confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Ambiguity {
    pub conflicts: usize,
    pub hedges: usize,
    pub vague: usize,
    pub alternations: usize,
    /// Words that are not hedges, vague fillers, or alternations.
    pub content_words: usize,
}

impl Ambiguity {
    pub(crate) fn measure(text: &Normalized, conflicts: usize) -> Self {
        Self {
            conflicts,
            hedges: text.count_any(HEDGES),
            vague: text.count_any(VAGUE),
            alternations: text.count("or"),
            content_words: text.content_words(),
        }
    }
}

/// Confidence that the question is understood, in `[0, 1]`.
///
/// Non-increasing in every ambiguity count; the base depends only on
/// whether any cue fired.
pub(crate) fn confidence(
    query_type: QueryType,
    complexity: Complexity,
    ambiguity: &Ambiguity,
    entity_count: usize,
) -> f64 {
    let base = if query_type == QueryType::Unknown { 0.4 } else { 0.9 };
    let complexity_penalty = match complexity {
        Complexity::Simple => 0.0,
        Complexity::Moderate => 0.05,
        Complexity::Complex => 0.1,
    };
    let short_penalty = match ambiguity.content_words {
        0 => 0.4,
        1 | 2 => 0.15,
        _ => 0.0,
    };
    let entity_bonus = (entity_count as f64 * 0.05).min(0.1);

    let score = base
        - 0.12 * ambiguity.conflicts as f64
        - 0.08 * ambiguity.hedges as f64
        - 0.06 * ambiguity.vague as f64
        - 0.1 * ambiguity.alternations as f64
        - complexity_penalty
        - short_penalty
        + entity_bonus;
    score.clamp(0.0, 1.0)
}

pub(crate) fn mentions_compliance(text: &Normalized) -> bool {
    COMPLIANCE_TERMS.iter().any(|t| text.has(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(q: &str) -> QueryType {
        classify_type(&Normalized::new(q)).0
    }

    #[test]
    fn test_query_types() {
        assert_eq!(classify("When is the audit deadline?"), QueryType::Temporal);
        assert_eq!(classify("What is SOX?"), QueryType::Definitional);
        assert_eq!(
            classify("What is the process for documenting control changes?"),
            QueryType::Procedural
        );
        assert_eq!(
            classify("Compare preventive versus detective controls"),
            QueryType::Comparative
        );
        assert_eq!(classify("Who owns the access review control?"), QueryType::Factual);
        assert_eq!(classify("SOX 404"), QueryType::Unknown);
    }

    #[test]
    fn test_ties_prefer_specific_type() {
        // "date" (temporal 1.5) vs "define" (definitional 2.0) vs nothing else.
        assert_eq!(classify("define the date"), QueryType::Definitional);
        // Equal weights: "procedure" (2.0) and "deadline" (2.0).
        assert_eq!(classify("procedure deadline"), QueryType::Procedural);
    }

    #[test]
    fn test_complexity() {
        let c = |q: &str, n| assess_complexity(&Normalized::new(q), n);
        assert_eq!(c("What is SOX?", 1), Complexity::Simple);
        assert_eq!(c("How are internal controls documented and tested?", 1), Complexity::Moderate);
        assert_eq!(
            c("Compare the effectiveness of preventive and detective controls.", 2),
            Complexity::Complex
        );
        assert_eq!(c("Who signs the 10-K and the 10-Q?", 2), Complexity::Moderate);
    }

    #[test]
    fn test_confidence_penalizes_ambiguity() {
        let clear = Normalized::new("When is the audit deadline?");
        let (t, conflicts) = classify_type(&clear);
        let a = Ambiguity::measure(&clear, conflicts);
        let clear_score = confidence(t, Complexity::Simple, &a, 0);

        let hedged = Normalized::new("Maybe when is the audit deadline or something?");
        let (t2, conflicts2) = classify_type(&hedged);
        let a2 = Ambiguity::measure(&hedged, conflicts2);
        let hedged_score = confidence(t2, Complexity::Simple, &a2, 0);

        assert!(clear_score > hedged_score);
        assert!((0.0..=1.0).contains(&hedged_score));
        assert_eq!(a2.hedges, 1);
        assert_eq!(a2.vague, 1);
        assert_eq!(a2.alternations, 1);
    }

    #[test]
    fn test_unknown_is_low_confidence() {
        let text = Normalized::new("SOX 404");
        let (t, conflicts) = classify_type(&text);
        let score = confidence(t, Complexity::Simple, &Ambiguity::measure(&text, conflicts), 1);
        assert!(score < 0.5);
    }
}
