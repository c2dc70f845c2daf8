//! Wiring: builds the collaborators named in [`Config`] and the core
//! ingestion and query pipelines on top of one SQLite store.

use std::sync::Arc;

use tracing::info;

use compliance_rag_core::cancel::CancellationToken;
use compliance_rag_core::engine::{Collaborators, QueryEngine};
use compliance_rag_core::ingest::{derive_document_id, Ingestor};
use compliance_rag_core::models::{DocumentOutcome, DocumentStatus, IngestReport, UploadedFile};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::DocumentExtractor;
use crate::generation::create_generator;
use crate::nlp::create_recognizer;
use crate::ocr::create_ocr;
use crate::sqlite_store::SqliteStore;

pub struct App {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub ingestor: Ingestor,
    pub engine: QueryEngine,
}

impl App {
    /// Open the database named in `config` and build every collaborator.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteStore::open(&config).await?);
        Self::with_store(config, store)
    }

    pub fn with_store(config: Config, store: Arc<SqliteStore>) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let recognizer = create_recognizer(&config.nlp)?;
        let extractor = Arc::new(DocumentExtractor::new(create_ocr(&config.ocr)?));

        info!(
            embedding = embedder.model_name(),
            dims = embedder.dims(),
            generation = generator.model_name(),
            ocr = %config.ocr.provider,
            nlp = recognizer.name(),
            "collaborators ready"
        );

        let ingestor = Ingestor::new(
            extractor,
            embedder.clone(),
            store.clone(),
            store.clone(),
            config.ingest_params(),
        );
        let engine = QueryEngine::new(
            Collaborators {
                embedder,
                generator,
                recognizer,
                vectors: store.clone(),
                documents: store.clone(),
            },
            config.engine_config(),
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            ingestor,
            engine,
        })
    }

    /// Ingest a batch, rejecting oversized files before extraction.
    ///
    /// Rejected files get a failed outcome but no document record, the same
    /// as unsupported formats.
    pub async fn ingest(&self, files: Vec<UploadedFile>, cancel: &CancellationToken) -> IngestReport {
        let limit = self.config.ingest.max_file_bytes;
        let mut rejected: Vec<(usize, DocumentOutcome)> = Vec::new();
        let mut accepted: Vec<(usize, UploadedFile)> = Vec::new();
        for (i, file) in files.into_iter().enumerate() {
            if file.content.len() as u64 > limit {
                rejected.push((i, too_large(&file, limit)));
            } else {
                accepted.push((i, file));
            }
        }

        let (order, files): (Vec<usize>, Vec<UploadedFile>) = accepted.into_iter().unzip();
        let mut report = self.ingestor.ingest_batch(files, cancel).await;

        if !rejected.is_empty() {
            let mut outcomes: Vec<(usize, DocumentOutcome)> =
                order.into_iter().zip(report.outcomes).collect();
            outcomes.extend(rejected);
            outcomes.sort_by_key(|(i, _)| *i);
            report.outcomes = outcomes.into_iter().map(|(_, o)| o).collect();
        }
        report
    }
}

fn too_large(file: &UploadedFile, limit: u64) -> DocumentOutcome {
    DocumentOutcome {
        document_id: file
            .document_id
            .clone()
            .unwrap_or_else(|| derive_document_id(&file.filename)),
        filename: file.filename.clone(),
        status: DocumentStatus::Failed,
        chunks: 0,
        reason: Some(format!(
            "file is {} bytes, over the {} byte upload limit",
            file.content.len(),
            limit
        )),
    }
}
