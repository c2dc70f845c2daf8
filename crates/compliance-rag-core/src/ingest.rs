//! Ingestion pipeline orchestration.
//!
//! Coordinates the per-document flow: extraction → chunking → embedding →
//! storage, and tracks each document's status through
//! `pending → processing → ready | failed`.
//!
//! # Atomic replace
//!
//! Every vector is computed before the first store write. New chunks are
//! upserted under a fresh generation while the previous generation keeps
//! serving queries; the document record then switches its active
//! generation in a single save, and stale chunk ids are deleted last.
//! The retriever ignores chunks whose generation is not active, so readers
//! see either the old chunk set or the new one.
//!
//! On any failure (including cancellation) the document's chunks are
//! removed and the record is marked `failed` with a reason. If the
//! ingestion future is dropped mid-flight, a guard spawns the same
//! cleanup, still holding the document's lock.
//!
//! Writes to one document are serialized by a per-document lock; different
//! documents proceed concurrently.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyze::temporal;
use crate::cancel::CancellationToken;
use crate::chunk::{chunk_text, ChunkingConfig};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract::TextExtractor;
use crate::models::{Chunk, Document, DocumentFormat, DocumentOutcome, DocumentStatus, IngestReport, UploadedFile};
use crate::retry::{self, RetryPolicy};
use crate::store::{ChunkMetadata, DocumentStore, VectorStore};

/// Ingestion tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct IngestParams {
    pub chunking: ChunkingConfig,
    pub retry: RetryPolicy,
    /// Documents processed concurrently by [`Ingestor::ingest_batch`].
    pub max_concurrent_documents: usize,
    /// In-flight embedding and upsert calls per document.
    pub max_concurrent_embeddings: usize,
}

impl Default for IngestParams {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retry: RetryPolicy::default(),
            max_concurrent_documents: 4,
            max_concurrent_embeddings: 8,
        }
    }
}

/// Stable id for uploads that carry none, so re-uploading a file replaces it.
pub fn derive_document_id(filename: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("document:{filename}").as_bytes()).to_string()
}

/// Per-document exclusive sections.
#[derive(Default)]
struct DocumentLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    async fn acquire(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(document_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Ingestor {
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    documents: Arc<dyn DocumentStore>,
    params: IngestParams,
    locks: DocumentLocks,
}

impl Ingestor {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        documents: Arc<dyn DocumentStore>,
        params: IngestParams,
    ) -> Self {
        Self {
            extractor,
            embedder,
            vectors,
            documents,
            params,
            locks: DocumentLocks::default(),
        }
    }

    /// Ingest many documents concurrently. One document's failure never
    /// affects the others; outcomes come back in input order.
    pub async fn ingest_batch(&self, files: Vec<UploadedFile>, cancel: &CancellationToken) -> IngestReport {
        let mut outcomes: Vec<(usize, DocumentOutcome)> = stream::iter(files.into_iter().enumerate())
            .map(|(i, file)| async move { (i, self.ingest(file, cancel).await) })
            .buffer_unordered(self.params.max_concurrent_documents.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _)| *i);

        let outcomes: Vec<DocumentOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();
        let ready: Vec<&DocumentOutcome> = outcomes
            .iter()
            .filter(|o| o.status == DocumentStatus::Ready)
            .collect();
        IngestReport {
            documents_processed: ready.len(),
            chunks_processed: ready.iter().map(|o| o.chunks).sum(),
            outcomes,
        }
    }

    /// Ingest one document end to end.
    pub async fn ingest(&self, file: UploadedFile, cancel: &CancellationToken) -> DocumentOutcome {
        let UploadedFile {
            document_id,
            filename,
            content,
        } = file;
        let id = document_id.unwrap_or_else(|| derive_document_id(&filename));

        let result = match DocumentFormat::from_filename(&filename) {
            Ok(format) => {
                let section = self.locks.acquire(&id).await;
                self.process(&id, &filename, format, &content, section, cancel).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(chunks) => {
                info!(document_id = %id, filename = %filename, chunks, "document ingested");
                DocumentOutcome {
                    document_id: id,
                    filename,
                    status: DocumentStatus::Ready,
                    chunks,
                    reason: None,
                }
            }
            Err(e) => {
                warn!(document_id = %id, filename = %filename, error = %e, "document ingestion failed");
                DocumentOutcome {
                    document_id: id,
                    filename,
                    status: DocumentStatus::Failed,
                    chunks: 0,
                    reason: Some(e.to_string()),
                }
            }
        }
    }

    async fn process(
        &self,
        id: &str,
        filename: &str,
        format: DocumentFormat,
        content: &[u8],
        section: OwnedMutexGuard<()>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let previous = self.call(cancel, "load document", || self.documents.get(id)).await?;
        let previous_ids: Vec<String> = previous.as_ref().map(|d| d.chunk_ids.clone()).unwrap_or_default();

        let mut doc = previous.unwrap_or_else(|| Document::pending(id, filename, format));
        doc.filename = filename.to_string();
        doc.format = format;
        doc.status = DocumentStatus::Processing;
        doc.failure_reason = None;
        doc.updated_at = Utc::now();

        // Held until this function returns, or handed to the drop cleanup.
        let mut guard = RollbackGuard::arm(self, &doc, section);
        let snapshot = &doc;
        self.call(cancel, "save document", || self.documents.save(snapshot)).await?;

        let result = self.build_and_commit(&mut doc, content, cancel).await;
        if let Err(e) = &result {
            self.roll_back(&mut doc, e).await;
        }
        guard.disarm();
        let chunk_count = result?;

        let current: HashSet<&String> = doc.chunk_ids.iter().collect();
        let stale: Vec<String> = previous_ids.into_iter().filter(|c| !current.contains(c)).collect();
        if !stale.is_empty() {
            let cleanup = CancellationToken::new();
            if let Err(e) = self.call(&cleanup, "delete stale chunks", || self.vectors.delete_chunks(&stale)).await {
                warn!(document_id = %id, stale = stale.len(), error = %e, "stale chunks left behind; hidden by generation filter");
            }
        }
        Ok(chunk_count)
    }

    async fn build_and_commit(&self, doc: &mut Document, content: &[u8], cancel: &CancellationToken) -> Result<usize> {
        let format = doc.format;
        let extracted = self.call(cancel, "extract", || self.extractor.extract(content, format)).await?;
        if extracted.is_blank() {
            return Err(Error::Extraction("no text could be extracted".into()));
        }

        let mut chunks = chunk_text(&doc.id, &extracted.text, &extracted.pages, &self.params.chunking);
        for chunk in &mut chunks {
            chunk.periods = temporal::explicit_periods(&chunk.text);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let vectors = self.embed_all(&chunks, cancel).await?;
        self.write_all(&chunks, &vectors, cancel).await?;

        doc.status = DocumentStatus::Ready;
        doc.generation = chunks.first().map(|c| c.generation.clone());
        doc.chunk_ids = chunks.iter().map(|c| c.id.clone()).collect();
        doc.page_count = extracted.page_count();
        doc.ocr_confidence = extracted.ocr_confidence;
        doc.text = Some(extracted.text);
        doc.updated_at = Utc::now();
        let snapshot: &Document = doc;
        self.call(cancel, "save document", || self.documents.save(snapshot)).await?;
        Ok(chunks.len())
    }

    async fn embed_all(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let dims = self.embedder.dims();
        // Built eagerly so the stream holds plain futures, not a borrowing closure.
        let calls: Vec<_> = chunks
            .iter()
            .map(|chunk| async move {
                let vector = self.call(cancel, "embed", || self.embedder.embed(&chunk.text)).await?;
                if dims > 0 && vector.len() != dims {
                    return Err(Error::Rejected {
                        service: "embedding".into(),
                        message: format!("expected {dims} dimensions, got {}", vector.len()),
                    });
                }
                Ok::<_, Error>(vector)
            })
            .collect();
        stream::iter(calls)
            .buffered(self.params.max_concurrent_embeddings.max(1))
            .try_collect()
            .await
    }

    async fn write_all(&self, chunks: &[Chunk], vectors: &[Vec<f32>], cancel: &CancellationToken) -> Result<()> {
        let model = self.embedder.model_name();
        let calls: Vec<_> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| async move {
                let metadata = ChunkMetadata::from_chunk(chunk, model);
                self.call(cancel, "upsert", || self.vectors.upsert(&chunk.id, vector, &metadata))
                    .await
            })
            .collect();
        stream::iter(calls)
            .buffer_unordered(self.params.max_concurrent_embeddings.max(1))
            .try_collect::<Vec<()>>()
            .await
            .map(|_| ())
    }

    /// Remove every chunk of the document and record the failure.
    async fn roll_back(&self, doc: &mut Document, cause: &Error) {
        // The caller's token may be the reason we are here.
        let cleanup = CancellationToken::new();
        if let Err(e) = self.call(&cleanup, "delete document chunks", || self.vectors.delete_document(&doc.id)).await {
            error!(document_id = %doc.id, error = %e, "rollback could not delete chunks");
        }
        mark_failed(doc, cause);
        let snapshot: &Document = doc;
        if let Err(e) = self.call(&cleanup, "save document", || self.documents.save(snapshot)).await {
            error!(document_id = %doc.id, error = %e, "rollback could not record failure");
        }
    }

    async fn call<T, F, Fut>(&self, cancel: &CancellationToken, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry::call(&self.params.retry, cancel, operation, op).await
    }
}

fn mark_failed(doc: &mut Document, cause: &Error) {
    doc.status = DocumentStatus::Failed;
    doc.failure_reason = Some(cause.to_string());
    doc.generation = None;
    doc.chunk_ids.clear();
    doc.updated_at = Utc::now();
}

/// Spawns the rollback if an ingestion future is dropped before it
/// finishes. Owns the document's exclusive section, so the cleanup
/// completes before the next ingestion of the same id can start.
struct RollbackGuard {
    armed: Option<(Arc<dyn VectorStore>, Arc<dyn DocumentStore>, Document)>,
    section: Option<OwnedMutexGuard<()>>,
}

impl RollbackGuard {
    fn arm(ingestor: &Ingestor, doc: &Document, section: OwnedMutexGuard<()>) -> Self {
        Self {
            armed: Some((ingestor.vectors.clone(), ingestor.documents.clone(), doc.clone())),
            section: Some(section),
        }
    }

    /// Keeps the section held until the guard itself is dropped.
    fn disarm(&mut self) {
        self.armed = None;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        let Some((vectors, documents, mut doc)) = self.armed.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(document_id = %doc.id, "ingestion abandoned outside a runtime; chunks may remain");
            return;
        };
        let section = self.section.take();
        handle.spawn(async move {
            let _section = section;
            if let Err(e) = vectors.delete_document(&doc.id).await {
                error!(document_id = %doc.id, error = %e, "abandoned ingestion cleanup failed");
            }
            mark_failed(&mut doc, &Error::Cancelled);
            if let Err(e) = documents.save(&doc).await {
                error!(document_id = %doc.id, error = %e, "abandoned ingestion status update failed");
            }
        });
    }
}
