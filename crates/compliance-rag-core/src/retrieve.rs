//! Evidence retrieval against a [`VectorStore`] backend.
//!
//! The retriever operates entirely through the store traits, with no
//! database or configuration dependencies.
//!
//! # Algorithm
//!
//! 1. Embed the question once.
//! 2. Run up to three searches concurrently, each fetching
//!    `top_k × candidate_multiplier` candidates:
//!    - unfiltered vector search;
//!    - entity keyword-filtered search, when entities were extracted;
//!    - period-filtered search, when the question resolves to dates. Hits
//!      from this path get `temporal_boost` added to their score.
//! 3. Drop candidates embedded by a different model than the query, and
//!    candidates below `min_similarity` (raw cosine).
//! 4. Merge by chunk id, keeping the higher score.
//! 5. Drop candidates whose document is unknown or failed, or whose
//!    generation is not the document's active one.
//! 6. Sort by score (desc), document `updated_at` (desc), position (asc),
//!    chunk id (asc), and truncate to `top_k`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{try_join3, try_join_all};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::models::{Chunk, Document, DocumentStatus, QueryAnalysis};
use crate::retry::{self, RetryPolicy};
use crate::store::{Candidate, DocumentStore, SearchFilter, VectorStore};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Minimum raw cosine similarity a chunk must reach.
    pub min_similarity: f64,
    /// Score bonus for chunks matching the question's period.
    pub temporal_boost: f64,
    /// Candidates fetched per path, as a multiple of `top_k`.
    pub candidate_multiplier: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            min_similarity: 0.2,
            temporal_boost: 0.05,
            candidate_multiplier: 3,
        }
    }
}

/// A retrieved chunk with its ranking score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk: Chunk,
    /// Display name of the owning document.
    pub document: String,
    pub document_updated_at: DateTime<Utc>,
    /// Raw cosine similarity to the question.
    pub similarity: f64,
    /// Ranking score in `[0, 1]`: similarity plus any temporal boost.
    pub score: f64,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    documents: Arc<dyn DocumentStore>,
    params: RetrievalParams,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        documents: Arc<dyn DocumentStore>,
        params: RetrievalParams,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            vectors,
            documents,
            params,
            retry,
        }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        analysis: &QueryAnalysis,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedChunk>> {
        if top_k == 0 || question.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = retry::call(&self.retry, cancel, "embed query", || self.embedder.embed(question)).await?;
        let fetch_k = top_k * self.params.candidate_multiplier.max(1);

        let keywords: Vec<String> = analysis.entities.iter().map(|e| e.text.clone()).collect();
        let periods = analysis.temporal_context.ranges();

        let primary = self.search(&query_vec, SearchFilter::default(), fetch_k, cancel);
        let by_entity = async {
            if keywords.is_empty() {
                Ok(Vec::new())
            } else {
                self.search(&query_vec, SearchFilter::keywords(keywords.clone()), fetch_k, cancel).await
            }
        };
        let by_period = async {
            if periods.is_empty() {
                Ok(Vec::new())
            } else {
                self.search(&query_vec, SearchFilter::periods(periods.clone()), fetch_k, cancel).await
            }
        };
        let (primary, by_entity, by_period) = try_join3(primary, by_entity, by_period).await?;
        debug!(
            primary = primary.len(),
            by_entity = by_entity.len(),
            by_period = by_period.len(),
            "retrieval candidates"
        );

        let model = self.embedder.model_name();
        let mut foreign_model = 0usize;
        let mut merged: HashMap<String, (Candidate, f64)> = HashMap::new();
        let boosted = by_period.into_iter().map(|c| (c, self.params.temporal_boost));
        let plain = primary.into_iter().chain(by_entity).map(|c| (c, 0.0));
        for (candidate, boost) in plain.chain(boosted) {
            if candidate.metadata.model != model {
                foreign_model += 1;
                continue;
            }
            if candidate.similarity < self.params.min_similarity {
                continue;
            }
            let score = (candidate.similarity + boost).clamp(0.0, 1.0);
            match merged.get(&candidate.chunk_id) {
                Some((_, existing)) if *existing >= score => {}
                _ => {
                    merged.insert(candidate.chunk_id.clone(), (candidate, score));
                }
            }
        }

        if foreign_model > 0 {
            warn!(
                model,
                skipped = foreign_model,
                "stored vectors come from a different embedding model; re-ingest to search them"
            );
        }

        let documents = self.load_documents(&merged, cancel).await?;
        let mut ranked: Vec<RankedChunk> = merged
            .into_values()
            .filter_map(|(candidate, score)| {
                let doc = documents.get(&candidate.metadata.document_id)?.as_ref()?;
                if doc.status == DocumentStatus::Failed
                    || doc.generation.as_deref() != Some(candidate.metadata.generation.as_str())
                {
                    return None;
                }
                Some(RankedChunk {
                    document: doc.filename.clone(),
                    document_updated_at: doc.updated_at,
                    similarity: candidate.similarity,
                    score,
                    chunk: candidate.metadata.into_chunk(candidate.chunk_id, None),
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.document_updated_at.cmp(&a.document_updated_at))
                .then(a.chunk.position.cmp(&b.chunk.position))
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        filter: SearchFilter,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>> {
        retry::call(&self.retry, cancel, "vector search", || {
            self.vectors.search(query_vec, &filter, top_k)
        })
        .await
    }

    async fn load_documents(
        &self,
        merged: &HashMap<String, (Candidate, f64)>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Option<Document>>> {
        let mut ids: Vec<&str> = merged
            .values()
            .map(|(c, _)| c.metadata.document_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let docs = try_join_all(ids.iter().map(|id| {
            retry::call(&self.retry, cancel, "load document", move || self.documents.get(id))
        }))
        .await?;
        Ok(ids.into_iter().map(str::to_string).zip(docs).collect())
    }
}
