//! Query analysis: type, complexity, entities, temporal context, and
//! confidence for a free-text question.
//!
//! # Pipeline
//!
//! 1. Entities from the configured [`EntityRecognizer`] (retried under the
//!    analyzer's [`RetryPolicy`]); on failure the built-in
//!    [`LexiconRecognizer`] takes over so analysis never fails on NLP
//!    outages.
//! 2. Temporal references resolved against the reference date.
//! 3. Rule-based type and complexity from weighted cue lexicons.
//! 4. Confidence lowered by every ambiguity signal (conflicting cues,
//!    hedges, vague fillers, alternations, too few content words).

mod classify;
pub mod entities;
pub mod temporal;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::models::{Complexity, Entity, EntityType, QueryAnalysis, QueryType, TemporalContext, TemporalKind};
use crate::retry::{self, RetryPolicy};

use classify::{Ambiguity, Normalized};
pub use entities::{dedup_entities, EntityRecognizer, LexiconRecognizer};

/// Analyzer tuning, decoupled from application config.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    /// Date relative expressions resolve against; `None` uses today (UTC).
    pub reference_date: Option<NaiveDate>,
    pub retry: RetryPolicy,
}

pub struct QueryAnalyzer {
    recognizer: Arc<dyn EntityRecognizer>,
    fallback: LexiconRecognizer,
    config: AnalyzerConfig,
}

impl QueryAnalyzer {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>, config: AnalyzerConfig) -> Self {
        Self {
            recognizer,
            fallback: LexiconRecognizer::new(),
            config,
        }
    }

    /// Analyzer backed only by the built-in lexicon recognizer.
    pub fn lexicon(config: AnalyzerConfig) -> Self {
        Self::new(Arc::new(LexiconRecognizer::new()), config)
    }

    /// Full analysis including the entity collaborator call.
    pub async fn analyze(&self, question: &str, cancel: &CancellationToken) -> Result<QueryAnalysis> {
        let recognizer = self.recognizer.clone();
        let entities = match retry::call(&self.config.retry, cancel, "entity recognition", || {
            let recognizer = recognizer.clone();
            let text = question.to_string();
            async move { recognizer.recognize(&text).await }
        })
        .await
        {
            Ok(entities) => entities,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(recognizer = self.recognizer.name(), error = %e, "entity recognition failed; using lexicon");
                self.fallback.recognize_sync(question)
            }
        };
        Ok(self.analyze_with_entities(question, entities))
    }

    /// Deterministic analysis given already-recognized entities.
    pub fn analyze_with_entities(&self, question: &str, entities: Vec<Entity>) -> QueryAnalysis {
        let entities = dedup_entities(entities);
        let reference_date = self
            .config
            .reference_date
            .unwrap_or_else(|| Utc::now().date_naive());

        let references = temporal::extract(question, reference_date);
        let temporal_context = TemporalContext {
            has_temporal_aspect: !references.is_empty(),
            temporal_references: references,
        };

        let text = Normalized::new(question);
        let (query_type, conflicts) = classify::classify_type(&text);
        let complexity = classify::assess_complexity(&text, entities.len());
        let ambiguity = Ambiguity::measure(&text, conflicts);
        let confidence_score = classify::confidence(query_type, complexity, &ambiguity, entities.len());

        let augmentation_suggestions =
            suggestions(&text, query_type, complexity, &entities, &temporal_context, confidence_score);

        debug!(
            query_type = query_type.as_str(),
            complexity = complexity.as_str(),
            confidence = confidence_score,
            entities = entities.len(),
            "query analyzed"
        );

        QueryAnalysis {
            query_type,
            complexity,
            confidence_score,
            entities,
            temporal_context,
            augmentation_suggestions,
        }
    }
}

fn suggestions(
    text: &Normalized,
    query_type: QueryType,
    complexity: Complexity,
    entities: &[Entity],
    temporal: &TemporalContext,
    confidence: f64,
) -> Vec<String> {
    let mut out = Vec::new();
    if classify::mentions_compliance(text)
        && !entities.iter().any(|e| e.entity_type == EntityType::Regulation)
    {
        out.push("Include relevant regulatory framework references".to_string());
    }
    if complexity == Complexity::Complex {
        out.push("Break down into sub-queries for detailed analysis".to_string());
    }
    if entities.is_empty() {
        out.push("Add specific entity references for better context".to_string());
    }
    let asks_when = temporal
        .temporal_references
        .iter()
        .any(|r| r.kind == TemporalKind::Indicator);
    if (query_type == QueryType::Temporal || asks_when) && temporal.ranges().is_empty() {
        out.push("Specify the reporting period".to_string());
    }
    if confidence < 0.5 {
        out.push("Rephrase the question more specifically".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::time::Duration;

    fn analyzer() -> QueryAnalyzer {
        QueryAnalyzer::lexicon(AnalyzerConfig {
            reference_date: NaiveDate::from_ymd_opt(2024, 11, 5),
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                timeout: Duration::from_millis(200),
            },
        })
    }

    struct DownRecognizer;

    #[async_trait]
    impl EntityRecognizer for DownRecognizer {
        fn name(&self) -> &str {
            "down"
        }
        async fn recognize(&self, _text: &str) -> Result<Vec<Entity>> {
            Err(Error::EntityRecognition("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_temporal_question() {
        let a = analyzer()
            .analyze("When is the audit deadline?", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(a.query_type, QueryType::Temporal);
        assert_eq!(a.complexity, Complexity::Simple);
        assert!(a.temporal_context.has_temporal_aspect);
        assert!(a
            .augmentation_suggestions
            .contains(&"Specify the reporting period".to_string()));
    }

    #[tokio::test]
    async fn test_recognizer_outage_falls_back_to_lexicon() {
        let analyzer = QueryAnalyzer::new(Arc::new(DownRecognizer), analyzer().config.clone());
        let a = analyzer
            .analyze("Does the CFO certify SOX 404?", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(a.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_analysis() {
        let token = CancellationToken::new();
        token.cancel();
        let err = analyzer().analyze("What is SOX?", &token).await.unwrap_err();
        assert_eq!(err, Error::Cancelled);
    }

    #[test]
    fn test_explicit_period_resolves() {
        let a = analyzer().analyze_with_entities("Which controls failed in Q3 2024?", vec![]);
        let ranges = a.temporal_context.ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].label, "Q3 2024");
    }

    #[test]
    fn test_duplicate_entities_removed() {
        let sox = Entity::new("SOX", EntityType::Regulation);
        let a = analyzer().analyze_with_entities("What is SOX?", vec![sox.clone(), sox.clone()]);
        assert_eq!(a.entities, vec![sox]);
    }

    const BASE_QUESTIONS: &[&str] = &[
        "When is the audit deadline?",
        "What is the process for documenting control changes?",
        "Who owns the access review control?",
        "Compare preventive and detective controls",
        "What is SOX?",
        "SOX 404",
    ];

    const NOISE: &[&str] = &["maybe", "perhaps", "or", "something", "possibly", "stuff", "i guess"];

    fn inject(question: &str, noise: &[usize]) -> String {
        let mut words: Vec<String> = question.split(' ').map(str::to_string).collect();
        for (i, &n) in noise.iter().enumerate() {
            let at = (i * 3) % (words.len() + 1);
            words.insert(at, NOISE[n].to_string());
        }
        words.join(" ")
    }

    proptest! {
        #[test]
        fn prop_confidence_non_increasing_with_ambiguity(
            q in 0..BASE_QUESTIONS.len(),
            noise in proptest::collection::vec(0..NOISE.len(), 0..6),
            extra in proptest::collection::vec(0..NOISE.len(), 1..4),
        ) {
            let analyzer = analyzer();
            let base = inject(BASE_QUESTIONS[q], &noise);
            let mut more = noise.clone();
            more.extend(extra);
            let noisier = inject(BASE_QUESTIONS[q], &more);

            let a = analyzer.analyze_with_entities(&base, vec![]);
            let b = analyzer.analyze_with_entities(&noisier, vec![]);
            prop_assert!((0.0..=1.0).contains(&a.confidence_score));
            prop_assert!(
                b.confidence_score <= a.confidence_score + 1e-9,
                "{:?} ({}) vs {:?} ({})", base, a.confidence_score, noisier, b.confidence_score
            );
        }
    }
}
