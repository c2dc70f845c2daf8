//! Entity recognizers.
//!
//! `lexicon` is the built-in gazetteer. `http` posts `{"text": ...}` to an
//! external NER service and expects `{"entities": [{"text", "label"}]}`.
//! Collaborator labels are mapped onto the closed entity enum; unknown
//! labels and spans that do not occur in the question are dropped.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;

use compliance_rag_core::analyze::entities::{dedup_entities, EntityRecognizer, LexiconRecognizer};
use compliance_rag_core::models::{Entity, EntityType};
use compliance_rag_core::{Error, Result};

use crate::config::NlpConfig;
use crate::http;

pub fn create_recognizer(config: &NlpConfig) -> anyhow::Result<Arc<dyn EntityRecognizer>> {
    match config.provider.as_str() {
        "lexicon" => Ok(Arc::new(LexiconRecognizer::new())),
        "http" => Ok(Arc::new(HttpRecognizer::new(config)?)),
        other => bail!("Unknown NLP provider: {}", other),
    }
}

#[derive(Debug, Deserialize)]
struct NerResponse {
    #[serde(default)]
    entities: Vec<NerSpan>,
}

#[derive(Debug, Deserialize)]
struct NerSpan {
    text: String,
    label: String,
}

pub struct HttpRecognizer {
    client: reqwest::Client,
    url: String,
}

impl HttpRecognizer {
    pub fn new(config: &NlpConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("nlp.url required for http provider"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url,
        })
    }
}

fn sanitize(text: &str, spans: Vec<NerSpan>) -> Vec<Entity> {
    let haystack = text.to_lowercase();
    let mut located: Vec<(usize, Entity)> = spans
        .into_iter()
        .filter_map(|span| {
            let entity_type = EntityType::from_label(&span.label)?;
            let needle = span.text.trim();
            let at = haystack.find(&needle.to_lowercase())?;
            Some((at, Entity::new(needle, entity_type)))
        })
        .collect();
    located.sort_by_key(|(at, _)| *at);
    dedup_entities(located.into_iter().map(|(_, e)| e).collect())
}

#[async_trait]
impl EntityRecognizer for HttpRecognizer {
    fn name(&self) -> &str {
        "http"
    }

    async fn recognize(&self, text: &str) -> Result<Vec<Entity>> {
        let request = self.client.post(&self.url).json(&serde_json::json!({ "text": text }));
        let json = http::send_json("nlp", request, Error::EntityRecognition).await?;
        let parsed: NerResponse = serde_json::from_value(json).map_err(|e| Error::Rejected {
            service: "nlp".into(),
            message: format!("invalid response: {e}"),
        })?;
        Ok(sanitize(text, parsed.entities))
    }
}
