//! Scripted collaborators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract::{ExtractedText, TextExtractor};
use crate::generate::{GenerationRequest, Generator};
use crate::analyze::temporal;
use crate::models::{Chunk, ChunkKind, Document, DocumentFormat, DocumentStatus};
use crate::offline::HashEmbedder;
use crate::store::memory::InMemoryStore;
use crate::store::{ChunkMetadata, DocumentStore, VectorStore};

/// Embedding width shared by the seeded stores and query embedders.
pub const DIMS: usize = 512;

/// Store a ready document with one chunk per passage, passage `i` on
/// page `i + 1`.
pub async fn seed_document(store: &InMemoryStore, id: &str, passages: &[&str]) -> Document {
    let embedder = HashEmbedder::new(DIMS);
    let generation = format!("gen-{id}");
    let mut offset = 0;
    let mut chunk_ids = Vec::new();
    for (i, passage) in passages.iter().enumerate() {
        let chunk = Chunk {
            id: format!("{id}-{i}"),
            document_id: id.to_string(),
            position: i as u32,
            page: i as u32 + 1,
            pages: vec![i as u32 + 1],
            start: offset,
            end: offset + passage.len(),
            text: passage.to_string(),
            kind: ChunkKind::Text,
            generation: generation.clone(),
            periods: temporal::explicit_periods(passage),
            embedding: None,
        };
        offset += passage.len() + 2;
        store
            .upsert(
                &chunk.id,
                &embedder.vector(passage),
                &ChunkMetadata::from_chunk(&chunk, embedder.model_name()),
            )
            .await
            .unwrap();
        chunk_ids.push(chunk.id);
    }
    let mut doc = Document::pending(id, &format!("{id}.pdf"), DocumentFormat::Pdf);
    doc.status = DocumentStatus::Ready;
    doc.generation = Some(generation);
    doc.page_count = passages.len() as u32;
    doc.chunk_ids = chunk_ids;
    store.save(&doc).await.unwrap();
    doc
}

/// Treats content as UTF-8 with form feeds between pages.
pub struct PagesExtractor;

#[async_trait]
impl TextExtractor for PagesExtractor {
    async fn extract(&self, content: &[u8], _format: DocumentFormat) -> Result<ExtractedText> {
        let text = std::str::from_utf8(content).map_err(|e| Error::Extraction(e.to_string()))?;
        let pages: Vec<&str> = text.split('\u{c}').collect();
        Ok(ExtractedText::from_pages(&pages))
    }
}

/// Hash embedder that reports an outage for any text containing a marker.
pub struct OutageEmbedder {
    inner: HashEmbedder,
    marker: String,
}

impl OutageEmbedder {
    pub fn failing_on(marker: &str, dims: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dims),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for OutageEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(&self.marker) {
            return Err(Error::EmbeddingService("503 service unavailable".into()));
        }
        self.inner.embed(text).await
    }
}

/// Hash embedder that sleeps on texts containing a marker and records
/// how many of those calls overlapped.
pub struct SlowEmbedder {
    inner: HashEmbedder,
    marker: String,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlowEmbedder {
    pub fn new(marker: &str, delay: Duration, dims: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dims),
            marker: marker.to_string(),
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(&self.marker) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.embed(text).await
    }
}

/// Returns a fixed answer and counts calls.
pub struct ScriptedGenerator {
    pub answer: Result<String>,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: Error) -> Self {
        Self {
            answer: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}
