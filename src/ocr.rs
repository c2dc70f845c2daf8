//! OCR collaborators for scanned content.
//!
//! - **`tesseract`** pipes image bytes through the local `tesseract` binary
//!   (`tesseract stdin stdout -l <lang>`). Images only.
//! - **`http`** posts the raw bytes to an OCR service with the upload's MIME
//!   type and expects `{"pages": ["..."], "confidence": <optional 0..1>}`.
//!   Accepts images and scanned PDFs.
//!
//! When the engine reports no confidence, each page is scored with
//! [`estimate_confidence`].

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use compliance_rag_core::models::DocumentFormat;
use compliance_rag_core::{Error, Result};

use crate::config::OcrConfig;
use crate::http;

/// Recognized pages plus one confidence per page in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub pages: Vec<String>,
    pub page_confidence: Vec<f64>,
}

impl OcrOutput {
    fn scored(pages: Vec<String>, reported: Option<f64>) -> Self {
        let page_confidence = pages
            .iter()
            .map(|p| reported.unwrap_or_else(|| estimate_confidence(p)))
            .collect();
        Self {
            pages,
            page_confidence,
        }
    }

    /// Mean page confidence, `None` for an empty result.
    pub fn confidence(&self) -> Option<f64> {
        if self.page_confidence.is_empty() {
            return None;
        }
        Some(self.page_confidence.iter().sum::<f64>() / self.page_confidence.len() as f64)
    }
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, format: DocumentFormat) -> bool;

    async fn recognize(&self, content: &[u8], format: DocumentFormat) -> Result<OcrOutput>;
}

pub fn create_ocr(config: &OcrConfig) -> anyhow::Result<Option<Arc<dyn OcrEngine>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "tesseract" => Ok(Some(Arc::new(TesseractOcr::new(config)))),
        "http" => Ok(Some(Arc::new(HttpOcr::new(config)?))),
        other => bail!("Unknown OCR provider: {}", other),
    }
}

fn mime(format: DocumentFormat) -> &'static str {
    match format {
        DocumentFormat::Pdf => "application/pdf",
        DocumentFormat::Docx => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        DocumentFormat::Png => "image/png",
        DocumentFormat::Jpeg => "image/jpeg",
    }
}

/// Heuristic recognition quality from character error patterns.
///
/// Penalizes tokens mixing letters and digits (`c0ntrol`, `l0`), symbols
/// outside ordinary prose punctuation, and long whitespace runs left by
/// layout noise. Returns 0.0 for blank text.
pub fn estimate_confidence(text: &str) -> f64 {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }

    let mixed = tokens
        .iter()
        .filter(|t| {
            let core = t.trim_matches(|c: char| !c.is_alphanumeric());
            let letters = core.chars().filter(|c| c.is_alphabetic()).count();
            let digits = core.chars().filter(|c| c.is_ascii_digit()).count();
            letters > 0 && digits > 0 && !is_identifier_like(core)
        })
        .count();

    let chars = text.chars().filter(|c| !c.is_whitespace()).count().max(1);
    let odd = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !".,;:!?'\"()-/%$&[]".contains(*c))
        .count();

    let runs = text
        .split(|c: char| !c.is_whitespace())
        .filter(|ws| ws.chars().filter(|c| *c == ' ').count() >= 4)
        .count();

    let score = 1.0
        - 0.6 * (mixed as f64 / tokens.len() as f64)
        - 1.5 * (odd as f64 / chars as f64)
        - 0.2 * (runs as f64 / tokens.len() as f64);
    score.clamp(0.0, 1.0)
}

/// Control ids, periods and forms (`AC-2`, `Q3`, `FY2024`, `10-K`) mix
/// letters and digits legitimately.
fn is_identifier_like(token: &str) -> bool {
    let upper = token.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_ascii_uppercase());
    upper || token.contains('-')
}

// ============ Tesseract ============

pub struct TesseractOcr {
    command: String,
    language: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            language: config.language.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn run(&self, content: &[u8]) -> Result<String> {
        let mut child = tokio::process::Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Extraction(format!("failed to start {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content)
                .await
                .map_err(|e| Error::Extraction(format!("failed to feed image to OCR: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Extraction(format!("OCR process failed: {e}")))?;
        if !output.status.success() {
            return Err(Error::Extraction(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn accepts(&self, format: DocumentFormat) -> bool {
        format.is_image()
    }

    async fn recognize(&self, content: &[u8], format: DocumentFormat) -> Result<OcrOutput> {
        if !self.accepts(format) {
            return Err(Error::UnsupportedFormat(format!(
                "tesseract cannot read {}",
                format.as_str()
            )));
        }
        let text = tokio::time::timeout(self.timeout, self.run(content))
            .await
            .map_err(|_| Error::Timeout {
                operation: "ocr".into(),
                after: self.timeout,
            })??;
        // Tesseract separates pages of multi-frame images with form feeds.
        let pages: Vec<String> = text
            .split('\u{c}')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        debug!(pages = pages.len(), "tesseract finished");
        Ok(OcrOutput::scored(pages, None))
    }
}

// ============ HTTP ============

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<String>,
    confidence: Option<f64>,
}

pub struct HttpOcr {
    client: reqwest::Client,
    url: String,
}

impl HttpOcr {
    pub fn new(config: &OcrConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ocr.url required for http provider"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    fn name(&self) -> &str {
        "http"
    }

    fn accepts(&self, format: DocumentFormat) -> bool {
        format.is_image() || format == DocumentFormat::Pdf
    }

    async fn recognize(&self, content: &[u8], format: DocumentFormat) -> Result<OcrOutput> {
        let request = self
            .client
            .post(&self.url)
            .header("Content-Type", mime(format))
            .body(content.to_vec());
        let json = http::send_json("ocr", request, Error::Extraction).await?;
        let parsed: OcrResponse = serde_json::from_value(json).map_err(|e| Error::Rejected {
            service: "ocr".into(),
            message: format!("invalid response: {e}"),
        })?;
        let reported = parsed.confidence.map(|c| c.clamp(0.0, 1.0));
        Ok(OcrOutput::scored(parsed.pages, reported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stub;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};

    #[test]
    fn test_clean_prose_scores_high() {
        let clean = estimate_confidence("The audit deadline is Q3 2024. Control AC-2 is owned by the CFO.");
        assert!(clean > 0.9, "clean = {clean}");
    }

    #[test]
    fn test_noisy_text_scores_lower() {
        let clean = estimate_confidence("Access reviews are performed quarterly by control owners.");
        let noisy = estimate_confidence("Acc3ss rev1ews ~are perf0rmed §§ quarter1y    by «control» 0wners.");
        assert!(noisy < clean);
        assert!(noisy < 0.8, "noisy = {noisy}");
        assert_eq!(estimate_confidence("   \n "), 0.0);
    }

    #[tokio::test]
    async fn test_http_ocr_sends_mime_and_uses_reported_confidence() {
        let app = Router::new().route(
            "/ocr",
            post(|headers: HeaderMap| async move {
                assert_eq!(headers["content-type"], "image/png");
                Json(serde_json::json!({"pages": ["Scanned policy text."], "confidence": 0.82}))
            }),
        );
        let base = stub::serve(app).await;
        let ocr = HttpOcr::new(&OcrConfig {
            provider: "http".into(),
            url: Some(format!("{base}/ocr")),
            ..OcrConfig::default()
        })
        .unwrap();
        let out = ocr.recognize(b"\x89PNG", DocumentFormat::Png).await.unwrap();
        assert_eq!(out.pages, vec!["Scanned policy text.".to_string()]);
        assert_eq!(out.confidence(), Some(0.82));
    }

    #[tokio::test]
    async fn test_tesseract_rejects_pdf() {
        let ocr = TesseractOcr::new(&OcrConfig::default());
        assert!(!ocr.accepts(DocumentFormat::Pdf));
        let err = ocr.recognize(b"%PDF", DocumentFormat::Pdf).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
