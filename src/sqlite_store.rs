//! SQLite-backed [`VectorStore`] and [`DocumentStore`].
//!
//! Vectors are stored as little-endian f32 BLOBs in `chunk_vectors` and
//! searched brute-force with cosine similarity. Keyword filters are narrowed
//! through the `chunks_fts` index first, then checked against the same
//! [`SearchFilter::matches`] semantics the in-memory store uses.
//!
//! Every `sqlx` failure surfaces as
//! [`Error::StoreUnavailable`], which the pipeline treats as retryable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use compliance_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use compliance_rag_core::models::{Document, DocumentFormat, DocumentStatus};
use compliance_rag_core::store::{
    Candidate, ChunkMetadata, ChunkStats, DocumentStore, SearchFilter, VectorStore,
};
use compliance_rag_core::{Error, Result};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fts_chunk_ids(&self, keywords: &[String]) -> Result<Vec<String>> {
        let query = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| format!("\"{}\"", k.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT chunk_id FROM chunks_fts WHERE chunks_fts MATCH ?")
            .bind(query)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(|r| r.get("chunk_id")).collect())
    }
}

fn store_err(e: sqlx::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(format!("corrupt {what}: {e}"))
}

fn row_to_candidate(row: &SqliteRow, query_vec: &[f32]) -> Result<Candidate> {
    let blob: Vec<u8> = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata =
        serde_json::from_str(&metadata_json).map_err(|e| corrupt("chunk metadata", e))?;
    Ok(Candidate {
        chunk_id: row.get("chunk_id"),
        similarity: cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64,
        metadata,
    })
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let format: String = row.get("format");
    let status: String = row.get("status");
    let chunk_ids_json: String = row.get("chunk_ids_json");
    let updated_at: String = row.get("updated_at");
    let page_count: i64 = row.get("page_count");

    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        format: DocumentFormat::parse(&format).ok_or_else(|| corrupt("document format", &format))?,
        status: DocumentStatus::parse(&status).ok_or_else(|| corrupt("document status", &status))?,
        failure_reason: row.get("failure_reason"),
        text: row.get("body"),
        page_count: page_count.max(0) as u32,
        generation: row.get("generation"),
        chunk_ids: serde_json::from_str(&chunk_ids_json).map_err(|e| corrupt("chunk id list", e))?,
        ocr_confidence: row.get("ocr_confidence"),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| corrupt("timestamp", e))?
            .with_timezone(&Utc),
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, chunk_id: &str, vector: &[f32], metadata: &ChunkMetadata) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata).map_err(|e| corrupt("chunk metadata", e))?;
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, generation, kind, model, dims, embedding, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                generation = excluded.generation,
                kind = excluded.kind,
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(chunk_id)
        .bind(&metadata.document_id)
        .bind(&metadata.generation)
        .bind(metadata.kind.as_str())
        .bind(&metadata.model)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(chunk_id)
            .bind(&metadata.document_id)
            .bind(&metadata.text)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let removed = sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?
            .rows_affected();
        tx.commit().await.map_err(store_err)?;
        Ok(removed as usize)
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut removed = 0;
        for id in chunk_ids {
            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            removed += sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?
                .rows_affected();
        }
        tx.commit().await.map_err(store_err)?;
        Ok(removed as usize)
    }

    async fn search(&self, vector: &[f32], filter: &SearchFilter, top_k: usize) -> Result<Vec<Candidate>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rows = if filter.keywords.is_empty() {
            sqlx::query("SELECT chunk_id, embedding, metadata_json FROM chunk_vectors")
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?
        } else {
            let ids = self.fts_chunk_ids(&filter.keywords).await?;
            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(row) = sqlx::query(
                    "SELECT chunk_id, embedding, metadata_json FROM chunk_vectors WHERE chunk_id = ?",
                )
                .bind(&id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?
                {
                    rows.push(row);
                }
            }
            rows
        };

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let candidate = row_to_candidate(row, vector)?;
            if filter.matches(&candidate.metadata) {
                candidates.push(candidate);
            }
        }

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
        let rows = sqlx::query("SELECT kind, COUNT(*) AS n FROM chunk_vectors GROUP BY kind")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let mut stats = ChunkStats::default();
        for row in &rows {
            let kind: String = row.get("kind");
            let n: i64 = row.get("n");
            stats.total += n as usize;
            stats.by_kind.insert(kind, n as usize);
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn save(&self, doc: &Document) -> Result<()> {
        let chunk_ids_json = serde_json::to_string(&doc.chunk_ids).map_err(|e| corrupt("chunk id list", e))?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, format, status, failure_reason, body,
                                   page_count, generation, chunk_ids_json, ocr_confidence, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                format = excluded.format,
                status = excluded.status,
                failure_reason = excluded.failure_reason,
                body = excluded.body,
                page_count = excluded.page_count,
                generation = excluded.generation,
                chunk_ids_json = excluded.chunk_ids_json,
                ocr_confidence = excluded.ocr_confidence,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(doc.format.as_str())
        .bind(doc.status.as_str())
        .bind(&doc.failure_reason)
        .bind(&doc.text)
        .bind(doc.page_count as i64)
        .bind(&doc.generation)
        .bind(&chunk_ids_json)
        .bind(doc.ocr_confidence)
        .bind(doc.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(row_to_document).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_rag_core::models::ChunkKind;
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir) -> SqliteStore {
        let toml = format!("[db]\npath = \"{}\"\n", tmp.path().join("crag.sqlite").display());
        let config = crate::config::parse_config(&toml).unwrap();
        SqliteStore::open(&config).await.unwrap()
    }

    fn meta(doc: &str, position: u32, text: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: doc.into(),
            position,
            page: position + 1,
            pages: vec![position + 1],
            start: 0,
            end: text.len(),
            text: text.into(),
            kind: ChunkKind::Text,
            generation: "g1".into(),
            periods: vec![],
            model: "hash".into(),
        }
    }

    #[tokio::test]
    async fn test_search_and_keyword_filter() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store.upsert("a", &[1.0, 0.0], &meta("d1", 0, "The SOX 404 assessment is annual.")).await.unwrap();
        store.upsert("b", &[0.6, 0.8], &meta("d1", 1, "Access reviews run quarterly.")).await.unwrap();

        let hits = store.search(&[1.0, 0.0], &SearchFilter::default(), 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "a");
        assert!(hits[0].similarity > hits[1].similarity);
        assert_eq!(hits[1].metadata.page, 2);

        let hits = store
            .search(&[0.0, 1.0], &SearchFilter::keywords(vec!["sox".into()]), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store.upsert("a", &[1.0], &meta("d1", 0, "first")).await.unwrap();
        store.upsert("a", &[1.0], &meta("d1", 0, "second")).await.unwrap();
        store.upsert("b", &[1.0], &meta("d2", 0, "other")).await.unwrap();

        let stats = store.chunk_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_kind.get("text"), Some(&2));

        let hits = store
            .search(&[1.0], &SearchFilter::keywords(vec!["first".into()]), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());

        assert_eq!(store.delete_chunks(&["b".into(), "zzz".into()]).await.unwrap(), 1);
        assert_eq!(store.delete_document("d1").await.unwrap(), 1);
        assert_eq!(store.chunk_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_document_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let mut doc = Document::pending("doc-1", "policy.pdf", DocumentFormat::Pdf);
        store.save(&doc).await.unwrap();

        doc.status = DocumentStatus::Ready;
        doc.page_count = 3;
        doc.generation = Some("gen-1".into());
        doc.chunk_ids = vec!["c0".into(), "c1".into()];
        doc.ocr_confidence = Some(0.9);
        store.save(&doc).await.unwrap();

        let loaded = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Ready);
        assert_eq!(loaded.chunk_ids, doc.chunk_ids);
        assert_eq!(loaded.generation.as_deref(), Some("gen-1"));
        assert_eq!(loaded.ocr_confidence, Some(0.9));
        assert!(store.get("missing").await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
        store.ping().await.unwrap();
    }
}
