//! Query orchestration: analysis → retrieval → synthesis, plus health and
//! statistics over the shared stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info};

use crate::analyze::{AnalyzerConfig, EntityRecognizer, QueryAnalyzer};
use crate::cancel::CancellationToken;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::generate::Generator;
use crate::models::{QueryAnalysis, QueryResponse};
use crate::retrieve::{RetrievalParams, Retriever};
use crate::retry::{self, RetryPolicy};
use crate::store::{ChunkStats, DocumentStore, VectorStore};
use crate::synthesize::{self, SynthesisParams, Synthesizer};

/// External collaborators the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub recognizer: Arc<dyn EntityRecognizer>,
    pub vectors: Arc<dyn VectorStore>,
    pub documents: Arc<dyn DocumentStore>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Date relative expressions resolve against; `None` uses today.
    pub reference_date: Option<NaiveDate>,
    pub retrieval: RetrievalParams,
    pub synthesis: SynthesisParams,
    pub retry: RetryPolicy,
    /// Upper bound on caller-supplied `top_k`.
    pub max_top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_date: None,
            retrieval: RetrievalParams::default(),
            synthesis: SynthesisParams::default(),
            retry: RetryPolicy::default(),
            max_top_k: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<()>> for ComponentHealth {
    fn from(r: Result<()>) -> Self {
        match r {
            Ok(()) => Self { ok: true, error: None },
            Err(e) => Self {
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub documents: usize,
    pub documents_by_status: BTreeMap<String, usize>,
    pub chunks: ChunkStats,
}

pub struct QueryEngine {
    analyzer: QueryAnalyzer,
    retriever: Retriever,
    synthesizer: Synthesizer,
    collaborators: Collaborators,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        let analyzer = QueryAnalyzer::new(
            collaborators.recognizer.clone(),
            AnalyzerConfig {
                reference_date: config.reference_date,
                retry: config.retry.clone(),
            },
        );
        let retriever = Retriever::new(
            collaborators.embedder.clone(),
            collaborators.vectors.clone(),
            collaborators.documents.clone(),
            config.retrieval.clone(),
            config.retry.clone(),
        );
        let synthesizer = Synthesizer::new(
            collaborators.generator.clone(),
            config.synthesis.clone(),
            config.retry.clone(),
        );
        Self {
            analyzer,
            retriever,
            synthesizer,
            collaborators,
            config,
        }
    }

    /// Answer `question` from the stored evidence.
    ///
    /// `top_k` defaults from the question's complexity. Collaborator
    /// outages that survive retries produce a
    /// [`ResponseStatus::Unavailable`](crate::models::ResponseStatus)
    /// response rather than an error; only invalid input and cancellation
    /// are errors.
    pub async fn query(
        &self,
        question: &str,
        top_k: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question must not be empty".into()));
        }
        if top_k == Some(0) {
            return Err(Error::InvalidInput("top_k must be at least 1".into()));
        }

        let analysis = self.analyzer.analyze(question, cancel).await?;
        let top_k = top_k
            .unwrap_or_else(|| analysis.complexity.default_top_k())
            .min(self.config.max_top_k.max(1));

        let ranked = match self.retriever.retrieve(question, &analysis, top_k, cancel).await {
            Ok(ranked) => ranked,
            Err(e) => return degrade(question, analysis, e),
        };
        if ranked.is_empty() {
            info!(query_type = analysis.query_type.as_str(), "no evidence found");
            return Ok(synthesize::no_evidence(question, analysis));
        }

        let response = match self
            .synthesizer
            .synthesize(question, analysis.clone(), &ranked, cancel)
            .await
        {
            Ok(response) => response,
            Err(e) => return degrade(question, analysis, e),
        };
        info!(
            query_type = response.query_analysis.query_type.as_str(),
            sources = response.sources.len(),
            confidence = response.confidence,
            "query answered"
        );
        Ok(response)
    }

    /// Probe each collaborator once under the per-call timeout.
    pub async fn health(&self) -> HealthReport {
        let probe = RetryPolicy {
            max_attempts: 1,
            ..self.config.retry.clone()
        };
        let cancel = CancellationToken::new();
        let c = &self.collaborators;

        let (vector_store, embedding, generation) = tokio::join!(
            retry::call(&probe, &cancel, "vector store ping", || c.vectors.ping()),
            retry::call(&probe, &cancel, "embedding ping", || c.embedder.ping()),
            retry::call(&probe, &cancel, "generation ping", || c.generator.ping()),
        );

        let checks: BTreeMap<String, ComponentHealth> = [
            ("vector_store", vector_store),
            ("embedding", embedding),
            ("generation", generation),
        ]
        .into_iter()
        .map(|(name, r)| (name.to_string(), ComponentHealth::from(r)))
        .collect();

        let status = if checks.values().all(|c| c.ok) {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        HealthReport { status, checks }
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let docs = self.collaborators.documents.list().await?;
        let mut documents_by_status = BTreeMap::new();
        for doc in &docs {
            *documents_by_status
                .entry(doc.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(Statistics {
            documents: docs.len(),
            documents_by_status,
            chunks: self.collaborators.vectors.chunk_stats().await?,
        })
    }
}

fn degrade(question: &str, analysis: QueryAnalysis, e: Error) -> Result<QueryResponse> {
    match e {
        Error::Cancelled | Error::InvalidInput(_) => Err(e),
        e => {
            error!(error = %e, "query pipeline unavailable");
            Ok(synthesize::unavailable(question, analysis))
        }
    }
}
