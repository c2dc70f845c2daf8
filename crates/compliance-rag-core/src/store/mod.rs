//! Storage abstraction for the vector index and the document-status store.
//!
//! The [`VectorStore`] trait is the narrow similarity-search interface the
//! pipeline needs: `upsert`, `delete`, and filtered top-k `search`. The
//! [`DocumentStore`] trait tracks document records and their active chunk
//! generation. Both are the only shared mutable state in the system.
//!
//! Vector stores may be eventually consistent: a search can briefly return
//! chunks from a superseded generation. The retriever filters those out
//! against the document's active generation.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Chunk, ChunkKind, DateRange, Document};

/// Everything stored next to a vector, enough to rebuild the [`Chunk`]
/// without touching the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub position: u32,
    pub page: u32,
    pub pages: Vec<u32>,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub kind: ChunkKind,
    pub generation: String,
    #[serde(default)]
    pub periods: Vec<DateRange>,
    /// Embedding model that produced the vector.
    pub model: String,
}

impl ChunkMetadata {
    pub fn from_chunk(chunk: &Chunk, model: &str) -> Self {
        Self {
            document_id: chunk.document_id.clone(),
            position: chunk.position,
            page: chunk.page,
            pages: chunk.pages.clone(),
            start: chunk.start,
            end: chunk.end,
            text: chunk.text.clone(),
            kind: chunk.kind,
            generation: chunk.generation.clone(),
            periods: chunk.periods.clone(),
            model: model.to_string(),
        }
    }

    pub fn into_chunk(self, id: String, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            id,
            document_id: self.document_id,
            position: self.position,
            page: self.page,
            pages: self.pages,
            start: self.start,
            end: self.end,
            text: self.text,
            kind: self.kind,
            generation: self.generation,
            periods: self.periods,
            embedding,
        }
    }
}

/// Optional restrictions applied to a vector search.
///
/// An empty filter matches every chunk. Non-empty `keywords` keep chunks
/// whose text contains at least one keyword (case-insensitive); non-empty
/// `periods` keep chunks mentioning an overlapping period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub keywords: Vec<String>,
    pub periods: Vec<DateRange>,
}

impl SearchFilter {
    pub fn keywords(keywords: Vec<String>) -> Self {
        Self {
            keywords,
            ..Default::default()
        }
    }

    pub fn periods(periods: Vec<DateRange>) -> Self {
        Self {
            periods,
            ..Default::default()
        }
    }

    /// Reference semantics of the filter, shared by in-process backends.
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if !self.keywords.is_empty() {
            let text = metadata.text.to_lowercase();
            if !self.keywords.iter().any(|k| text.contains(&k.to_lowercase())) {
                return false;
            }
        }
        if !self.periods.is_empty()
            && !metadata
                .periods
                .iter()
                .any(|p| self.periods.iter().any(|q| p.overlaps(q)))
        {
            return false;
        }
        true
    }
}

/// A raw hit from the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f64,
    pub metadata: ChunkMetadata,
}

/// Chunk counts for statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStats {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
}

/// Pluggable similarity-search backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Store or overwrite one chunk vector |
/// | [`delete_document`](VectorStore::delete_document) | Remove every chunk of a document |
/// | [`delete_chunks`](VectorStore::delete_chunks) | Remove specific chunk ids |
/// | [`search`](VectorStore::search) | Top-k cosine search under a filter |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, chunk_id: &str, vector: &[f32], metadata: &ChunkMetadata) -> Result<()>;

    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<usize>;

    /// Up to `top_k` candidates, highest similarity first.
    async fn search(&self, vector: &[f32], filter: &SearchFilter, top_k: usize) -> Result<Vec<Candidate>>;

    async fn chunk_stats(&self) -> Result<ChunkStats>;

    async fn ping(&self) -> Result<()>;
}

/// Document records and their processing status.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the record with `doc.id`.
    async fn save(&self, doc: &Document) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    async fn list(&self) -> Result<Vec<Document>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn meta(text: &str, periods: Vec<DateRange>) -> ChunkMetadata {
        ChunkMetadata {
            document_id: "d".into(),
            position: 0,
            page: 1,
            pages: vec![1],
            start: 0,
            end: text.len(),
            text: text.into(),
            kind: ChunkKind::Text,
            generation: "g".into(),
            periods,
            model: "m".into(),
        }
    }

    #[test]
    fn test_filter_keywords_case_insensitive() {
        let f = SearchFilter::keywords(vec!["SOX".into()]);
        assert!(f.matches(&meta("The sox 404 assessment", vec![])));
        assert!(!f.matches(&meta("Unrelated text", vec![])));
        assert!(SearchFilter::default().matches(&meta("anything", vec![])));
    }

    #[test]
    fn test_filter_periods_overlap() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let q3 = DateRange { start: d(2024, 7, 1), end: d(2024, 9, 30), label: "Q3 2024".into() };
        let y24 = DateRange { start: d(2024, 1, 1), end: d(2024, 12, 31), label: "2024".into() };
        let y22 = DateRange { start: d(2022, 1, 1), end: d(2022, 12, 31), label: "2022".into() };
        let f = SearchFilter::periods(vec![y24]);
        assert!(f.matches(&meta("deadline", vec![q3])));
        assert!(!f.matches(&meta("deadline", vec![y22])));
        assert!(!f.matches(&meta("deadline", vec![])));
    }
}
