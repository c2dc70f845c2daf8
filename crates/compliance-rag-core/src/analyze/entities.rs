//! Named-entity recognition for compliance questions.
//!
//! [`EntityRecognizer`] is the NLP collaborator seam. [`LexiconRecognizer`]
//! is the built-in recognizer: a compliance gazetteer plus control-id
//! patterns. It serves as the default and as the fallback when a remote
//! recognizer fails.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::models::{Entity, EntityType};

#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Spans in order of appearance. Implementations sanitize collaborator
    /// labels onto [`EntityType`] and drop anything else.
    async fn recognize(&self, text: &str) -> Result<Vec<Entity>>;
}

struct Pattern {
    re: Regex,
    entity_type: EntityType,
}

fn pattern(re: &str, entity_type: EntityType) -> Pattern {
    Pattern {
        re: Regex::new(re).unwrap(),
        entity_type,
    }
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"(?i)\b(?:sarbanes[\s-]+oxley(?:\s+act)?|SOX(?:\s+(?:section\s+)?\d{3})?|section\s+\d{3}(?:\([a-z]\))?|COSO(?:\s+framework)?|GDPR|HIPAA|PCI[\s-]?DSS|SOC\s?[12](?:\s+type\s+(?:I{1,2}|[12]))?|AS\s+\d{4}|ISO\s?27001)\b",
            EntityType::Regulation,
        ),
        pattern(
            r"(?i)\b(?:SEC|PCAOB|FASB|AICPA|audit\s+committee|board\s+of\s+directors|internal\s+audit(?:\s+department)?)\b",
            EntityType::Organization,
        ),
        pattern(
            r"(?i)\b(?:CFO|CEO|CIO|CISO|CTO|controller|chief\s+(?:financial|executive|information)\s+officer|(?:internal|external)\s+auditors?|control\s+owners?|process\s+owners?)\b",
            EntityType::Role,
        ),
        pattern(
            r"(?i)\b(?:ITGCs?|internal\s+controls?(?:\s+over\s+financial\s+reporting)?|ICFR|segregation\s+of\s+duties|access\s+(?:controls?|reviews?)|change\s+management|(?:preventive|detective)\s+controls?)\b",
            EntityType::Control,
        ),
        pattern(r"\b[A-Z]{2,4}-\d{1,3}\b", EntityType::Control),
        pattern(
            r"(?i)\b(?:10-[KQ]|8-K|SOC\s+reports?|audit\s+reports?|management\s+letters?|risk\s+assessments?|financial\s+statements?)\b",
            EntityType::Document,
        ),
    ]
});

/// Gazetteer-based recognizer; deterministic and offline.
#[derive(Debug, Clone, Default)]
pub struct LexiconRecognizer;

impl LexiconRecognizer {
    pub fn new() -> Self {
        Self
    }

    pub fn recognize_sync(&self, text: &str) -> Vec<Entity> {
        let mut spans: Vec<(usize, usize, Entity)> = Vec::new();
        for p in PATTERNS.iter() {
            for m in p.re.find_iter(text) {
                spans.push((m.start(), m.end(), Entity::new(m.as_str(), p.entity_type)));
            }
        }
        spans.sort_by(|a, b| a.0.cmp(&b.0).then((b.1 - b.0).cmp(&(a.1 - a.0))));

        let mut covered = 0;
        let mut out = Vec::new();
        for (start, end, entity) in spans {
            if start < covered {
                continue;
            }
            covered = end;
            out.push(entity);
        }
        dedup_entities(out)
    }
}

#[async_trait]
impl EntityRecognizer for LexiconRecognizer {
    fn name(&self) -> &str {
        "lexicon"
    }

    async fn recognize(&self, text: &str) -> Result<Vec<Entity>> {
        Ok(self.recognize_sync(text))
    }
}

/// Drop repeats of the same exact text and type, keeping first occurrence.
pub fn dedup_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut out: Vec<Entity> = Vec::with_capacity(entities.len());
    for e in entities {
        if !e.text.trim().is_empty() && !out.contains(&e) {
            out.push(e);
        }
    }
    out
}
