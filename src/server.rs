//! HTTP boundary for uploads, questions, and status.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents/upload` | Ingest base64-encoded files |
//! | `POST` | `/query` | Answer a question with cited sources |
//! | `GET`  | `/documents/{id}` | Document processing status |
//! | `GET`  | `/statistics` | Document and chunk counts |
//! | `GET`  | `/health` | Collaborator reachability (`ok` / `degraded`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `internal` (500), `unavailable` (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use compliance_rag_core::cancel::CancellationToken;
use compliance_rag_core::engine::{ComponentHealth, HealthStatus, Statistics};
use compliance_rag_core::models::{Document, DocumentFormat, DocumentStatus, IngestReport, UploadedFile};
use compliance_rag_core::store::DocumentStore;
use compliance_rag_core::Error;

use crate::app::App;

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Compliance RAG server listening on http://{}", bind_addr);
    info!(bind = %bind_addr, "server started");
    axum::serve(listener, router(Arc::new(app))).await?;
    Ok(())
}

pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Base64 inflates uploads by a third; leave room for the JSON envelope.
    let body_limit = (app.config.ingest.max_file_bytes as usize).saturating_mul(2).max(1024 * 1024);

    Router::new()
        .route("/documents/upload", post(handle_upload))
        .route("/documents/{id}", get(handle_document))
        .route("/query", post(handle_query))
        .route("/statistics", get(handle_statistics))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(app)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidInput(_) | Error::UnsupportedFormat(_) => bad_request(e.to_string()),
            Error::Timeout { .. } => app_error(StatusCode::REQUEST_TIMEOUT, "timeout", e.to_string()),
            Error::StoreUnavailable(_)
            | Error::EmbeddingService(_)
            | Error::Generation(_)
            | Error::EntityRecognition(_) => {
                app_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.to_string())
            }
            _ => app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()),
        }
    }
}

// ============ POST /documents/upload ============

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadFile>,
}

#[derive(Deserialize)]
struct UploadFile {
    filename: String,
    /// Standard base64 of the raw file bytes.
    content_base64: String,
    #[serde(default)]
    document_id: Option<String>,
}

async fn handle_upload(
    State(app): State<Arc<App>>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<IngestReport>, AppError> {
    if req.files.is_empty() {
        return Err(bad_request("files must not be empty"));
    }

    let mut files = Vec::with_capacity(req.files.len());
    for f in req.files {
        if f.filename.trim().is_empty() {
            return Err(bad_request("filename must not be empty"));
        }
        let content = base64::engine::general_purpose::STANDARD
            .decode(f.content_base64.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", f.filename, e)))?;
        let mut file = UploadedFile::new(f.filename, content);
        if let Some(id) = f.document_id.filter(|id| !id.trim().is_empty()) {
            file = file.with_id(id);
        }
        files.push(file);
    }

    // Dropping this future on client disconnect rolls in-flight documents back.
    let report = app.ingest(files, &CancellationToken::new()).await;
    Ok(Json(report))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    include_analysis: bool,
}

async fn handle_query(
    State(app): State<Arc<App>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let response = app
        .engine
        .query(&req.question, req.top_k, &CancellationToken::new())
        .await?;

    let mut value = serde_json::to_value(&response)
        .map_err(|e| app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))?;
    if !req.include_analysis {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("query_analysis");
        }
    }
    Ok(Json(value))
}

// ============ GET /documents/{id} ============

#[derive(Serialize)]
struct DocumentStatusResponse {
    id: String,
    filename: String,
    format: DocumentFormat,
    status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    page_count: u32,
    chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ocr_confidence: Option<f64>,
    updated_at: DateTime<Utc>,
}

impl From<Document> for DocumentStatusResponse {
    fn from(doc: Document) -> Self {
        Self {
            chunk_count: doc.chunk_ids.len(),
            id: doc.id,
            filename: doc.filename,
            format: doc.format,
            status: doc.status,
            failure_reason: doc.failure_reason,
            page_count: doc.page_count,
            generation: doc.generation,
            ocr_confidence: doc.ocr_confidence,
            updated_at: doc.updated_at,
        }
    }
}

async fn handle_document(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentStatusResponse>, AppError> {
    match app.store.get(&id).await? {
        Some(doc) => Ok(Json(doc.into())),
        None => Err(not_found(format!("document not found: {}", id))),
    }
}

// ============ GET /statistics ============

async fn handle_statistics(State(app): State<Arc<App>>) -> Result<Json<Statistics>, AppError> {
    Ok(Json(app.engine.statistics().await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: HealthStatus,
    version: String,
    checks: BTreeMap<String, ComponentHealth>,
}

async fn handle_health(State(app): State<Arc<App>>) -> (StatusCode, Json<HealthResponse>) {
    let report = app.engine.health().await;
    let code = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(HealthResponse {
            status: report.status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: report.checks,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use serde_json::{json, Value};
    use std::io::Write;
    use tempfile::TempDir;

    async fn spawn(tmp: &TempDir) -> String {
        let toml = format!(
            "[db]\npath = \"{}\"\n[embedding]\nprovider = \"hash\"\ndims = 512\n[retry]\nmax_attempts = 1\nbase_delay_ms = 1\n",
            tmp.path().join("crag.sqlite").display()
        );
        let app = App::open(parse_config(&toml).unwrap()).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(Arc::new(app))).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn docx_b64(paragraphs: &[&str]) -> String {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        );
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        base64::engine::general_purpose::STANDARD.encode(zip.finish().unwrap().into_inner())
    }

    #[tokio::test]
    async fn test_upload_then_query_with_citation() {
        let tmp = TempDir::new().unwrap();
        let base = spawn(&tmp).await;
        let http = reqwest::Client::new();

        let report: Value = http
            .post(format!("{base}/documents/upload"))
            .json(&json!({"files": [
                {"filename": "audit-plan.docx", "document_id": "plan", "content_base64": docx_b64(&["The audit deadline is Q3 2024."])},
                {"filename": "notes.txt", "content_base64": "aGVsbG8="}
            ]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["documents_processed"], 1);
        assert_eq!(report["outcomes"][0]["status"], "ready");
        assert_eq!(report["outcomes"][1]["status"], "failed");

        let status: Value = http.get(format!("{base}/documents/plan")).send().await.unwrap().json().await.unwrap();
        assert_eq!(status["status"], "ready");
        assert_eq!(status["chunk_count"], 1);

        let answer: Value = http
            .post(format!("{base}/query"))
            .json(&json!({"question": "When is the audit deadline?"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(answer["status"], "answered");
        assert_eq!(answer["sources"][0]["document_id"], "plan");
        assert_eq!(answer["sources"][0]["relevance_type"], "direct");
        assert!(answer["answer"].as_str().unwrap().contains("[1]"));
        assert!(answer.get("query_analysis").is_none());

        let with_analysis: Value = http
            .post(format!("{base}/query"))
            .json(&json!({"question": "When is the audit deadline?", "include_analysis": true}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(with_analysis["query_analysis"]["query_type"], "temporal");
    }

    #[tokio::test]
    async fn test_error_contract() {
        let tmp = TempDir::new().unwrap();
        let base = spawn(&tmp).await;
        let http = reqwest::Client::new();

        let resp = http.get(format!("{base}/documents/missing")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");

        let resp = http
            .post(format!("{base}/query"))
            .json(&json!({"question": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = http
            .post(format!("{base}/documents/upload"))
            .json(&json!({"files": [{"filename": "a.pdf", "content_base64": "***"}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_empty_store_has_no_evidence_and_healthy() {
        let tmp = TempDir::new().unwrap();
        let base = spawn(&tmp).await;
        let http = reqwest::Client::new();

        let answer: Value = http
            .post(format!("{base}/query"))
            .json(&json!({"question": "Who approves access reviews?"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(answer["status"], "no_evidence");
        assert_eq!(answer["sources"].as_array().unwrap().len(), 0);

        let resp = http.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let health: Value = resp.json().await.unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["checks"]["vector_store"]["ok"], true);

        let stats: Value = http.get(format!("{base}/statistics")).send().await.unwrap().json().await.unwrap();
        assert_eq!(stats["documents"], 0);
        assert_eq!(stats["chunks"]["total"], 0);
    }
}
