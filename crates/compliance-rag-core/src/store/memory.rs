//! In-memory [`VectorStore`] and [`DocumentStore`] for tests and
//! single-process deployments.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. Vector
//! search is brute-force cosine similarity over all stored vectors.
//! Availability can be toggled to simulate an outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::Document;

use super::{Candidate, ChunkMetadata, ChunkStats, DocumentStore, SearchFilter, VectorStore};

struct StoredVector {
    vector: Vec<f32>,
    metadata: ChunkMetadata,
}

pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    vectors: RwLock<HashMap<String, StoredVector>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            vectors: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going down (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Chunk ids currently stored for `document_id`.
    pub fn chunk_ids_for(&self, document_id: &str) -> Vec<String> {
        let Ok(vectors) = self.vectors.read() else {
            return Vec::new();
        };
        let mut ids: Vec<(u32, String)> = vectors
            .iter()
            .filter(|(_, v)| v.metadata.document_id == document_id)
            .map(|(id, v)| (v.metadata.position, id.clone()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("in-memory store offline".into()))
        }
    }

    fn vectors_read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredVector>>> {
        self.check()?;
        self.vectors.read().map_err(|_| poisoned())
    }

    fn vectors_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredVector>>> {
        self.check()?;
        self.vectors.write().map_err(|_| poisoned())
    }

    fn docs_read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Document>>> {
        self.check()?;
        self.docs.read().map_err(|_| poisoned())
    }

    fn docs_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Document>>> {
        self.check()?;
        self.docs.write().map_err(|_| poisoned())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> Error {
    Error::StoreUnavailable("lock poisoned".into())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, chunk_id: &str, vector: &[f32], metadata: &ChunkMetadata) -> Result<()> {
        self.vectors_write()?.insert(
            chunk_id.to_string(),
            StoredVector {
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut vectors = self.vectors_write()?;
        let before = vectors.len();
        vectors.retain(|_, v| v.metadata.document_id != document_id);
        Ok(before - vectors.len())
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<usize> {
        let mut vectors = self.vectors_write()?;
        Ok(chunk_ids
            .iter()
            .filter(|id| vectors.remove(id.as_str()).is_some())
            .count())
    }

    async fn search(&self, vector: &[f32], filter: &SearchFilter, top_k: usize) -> Result<Vec<Candidate>> {
        let vectors = self.vectors_read()?;
        let mut candidates: Vec<Candidate> = vectors
            .iter()
            .filter(|(_, sv)| filter.matches(&sv.metadata))
            .map(|(id, sv)| Candidate {
                chunk_id: id.clone(),
                similarity: cosine_similarity(vector, &sv.vector) as f64,
                metadata: sv.metadata.clone(),
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn chunk_stats(&self) -> Result<ChunkStats> {
        let vectors = self.vectors_read()?;
        let mut stats = ChunkStats {
            total: vectors.len(),
            ..Default::default()
        };
        for sv in vectors.values() {
            *stats.by_kind.entry(sv.metadata.kind.as_str().to_string()).or_default() += 1;
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn save(&self, doc: &Document) -> Result<()> {
        self.docs_write()?.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs_read()?.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.docs_read()?.values().cloned().collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }
}
