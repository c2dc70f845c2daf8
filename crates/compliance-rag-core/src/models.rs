//! Core data models that flow through ingestion and querying.
//!
//! Closed enums (`QueryType`, `Complexity`, `RelevanceType`, `EntityType`,
//! `DocumentStatus`) serialize as lowercase strings so collaborator and HTTP
//! payloads stay stable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ═══════════════════════════════════════════════════════════════════════
// Documents
// ═══════════════════════════════════════════════════════════════════════

/// Input formats accepted by the extraction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Png,
    Jpeg,
}

impl DocumentFormat {
    /// Infer the format from a filename extension.
    pub fn from_filename(filename: &str) -> Result<Self, Error> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(Error::UnsupportedFormat(if other.is_empty() {
                filename.to_string()
            } else {
                other.to_string()
            })),
        }
    }

    /// Image formats carry no text layer and always go through OCR.
    pub fn is_image(self) -> bool {
        matches!(self, Self::Png | Self::Jpeg)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "png" => Some(Self::Png),
            "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A file handed to the ingestor. The raw bytes live only as long as the
/// ingestion call; they are never written to the document store.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Explicit document id. `None` derives one from the filename, so
    /// re-uploading the same file replaces the earlier version.
    pub document_id: Option<String>,
    pub filename: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            document_id: None,
            filename: filename.into(),
            content,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }
}

/// Persistent document record tracked by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub format: DocumentFormat,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Extracted plain text (populated once extraction succeeded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub page_count: u32,
    /// Content hash of the active chunk set; `None` until first success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    /// Ids of the active chunk set, in position order.
    #[serde(default)]
    pub chunk_ids: Vec<String>,
    /// Mean OCR confidence when any page came from OCR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_confidence: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn pending(id: &str, filename: &str, format: DocumentFormat) -> Self {
        Self {
            id: id.to_string(),
            filename: filename.to_string(),
            format,
            status: DocumentStatus::Pending,
            failure_reason: None,
            text: None,
            page_count: 0,
            generation: None,
            chunk_ids: Vec::new(),
            ocr_confidence: None,
            updated_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Chunks
// ═══════════════════════════════════════════════════════════════════════

/// A page's byte range within the extracted document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    /// 1-based page number.
    pub number: u32,
    pub start: usize,
    pub end: usize,
}

/// Kind of content a chunk carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Table,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
        }
    }
}

/// An immutable retrieval unit cut from one document.
///
/// `start`/`end` are byte offsets into the document text, always on UTF-8
/// char boundaries; `text == document_text[start..end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub position: u32,
    /// Page holding the majority of this chunk's bytes.
    pub page: u32,
    /// Every page this chunk touches, ascending.
    pub pages: Vec<u32>,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub kind: ChunkKind,
    /// Content hash of the chunk set this chunk belongs to.
    pub generation: String,
    /// Explicit periods mentioned in the chunk text.
    #[serde(default)]
    pub periods: Vec<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn is_table(&self) -> bool {
        self.kind == ChunkKind::Table
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Query analysis
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Factual,
    Procedural,
    Comparative,
    Temporal,
    Definitional,
    Unknown,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Procedural => "procedural",
            Self::Comparative => "comparative",
            Self::Temporal => "temporal",
            Self::Definitional => "definitional",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }

    /// Default evidence budget when the caller does not pass `top_k`.
    pub fn default_top_k(self) -> usize {
        match self {
            Self::Simple => 3,
            Self::Moderate => 5,
            Self::Complex => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Organization,
    Regulation,
    Role,
    Control,
    Document,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Regulation => "regulation",
            Self::Role => "role",
            Self::Control => "control",
            Self::Document => "document",
        }
    }

    /// Map a collaborator label onto the closed set. Unknown labels yield
    /// `None` and the span is dropped.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "organization" | "organisation" | "org" => Some(Self::Organization),
            "regulation" | "law" | "section" | "standard" => Some(Self::Regulation),
            "role" | "person_role" | "title" => Some(Self::Role),
            "control" => Some(Self::Control),
            "document" | "work_of_art" => Some(Self::Document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

impl Entity {
    pub fn new(text: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            text: text.into(),
            entity_type,
        }
    }
}

/// An inclusive calendar range with a normalized human label
/// (`"Q3 2024"`, `"2023"`, `"March 2024"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: String,
}

impl DateRange {
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalKind {
    /// A concrete date or period ("Q3 2024", "as of 2023").
    Explicit,
    /// A period relative to the reference date ("last quarter").
    Relative,
    /// A word asking about or pointing at time ("when", "deadline").
    Indicator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalReference {
    pub text: String,
    pub kind: TemporalKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_range: Option<DateRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    pub has_temporal_aspect: bool,
    pub temporal_references: Vec<TemporalReference>,
}

impl TemporalContext {
    /// Resolved ranges, in reference order.
    pub fn ranges(&self) -> Vec<DateRange> {
        self.temporal_references
            .iter()
            .filter_map(|r| r.resolved_range.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    pub complexity: Complexity,
    pub confidence_score: f64,
    pub entities: Vec<Entity>,
    pub temporal_context: TemporalContext,
    #[serde(default)]
    pub augmentation_suggestions: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelevanceType {
    Direct,
    Supporting,
    Contextual,
}

impl RelevanceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Supporting => "supporting",
            Self::Contextual => "contextual",
        }
    }

    /// Weight applied to a source's confidence when aggregating.
    pub fn weight(self) -> f64 {
        match self {
            Self::Direct => 1.0,
            Self::Supporting => 0.8,
            Self::Contextual => 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    /// 1-based citation number used in the answer text (`[n]`).
    pub citation: usize,
    pub document_id: String,
    pub document: String,
    pub chunk_id: String,
    pub page: u32,
    pub relevance_type: RelevanceType,
    pub confidence: f64,
    pub excerpt: String,
}

/// Outcome class of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Answered,
    NoEvidence,
    Unavailable,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::NoEvidence => "no_evidence",
            Self::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub question: String,
    pub answer: String,
    pub status: ResponseStatus,
    pub confidence: f64,
    pub sources: Vec<SourceReference>,
    pub query_analysis: QueryAnalysis,
}

// ═══════════════════════════════════════════════════════════════════════
// Ingestion results
// ═══════════════════════════════════════════════════════════════════════

/// Per-document outcome of an ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub filename: String,
    pub status: DocumentStatus,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Aggregate result of a batch ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents_processed: usize,
    pub chunks_processed: usize,
    pub outcomes: Vec<DocumentOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_filename() {
        assert_eq!(DocumentFormat::from_filename("a.PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("b.docx").unwrap(), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_filename("scan.jpg").unwrap(), DocumentFormat::Jpeg);
        assert!(matches!(
            DocumentFormat::from_filename("notes.txt"),
            Err(Error::UnsupportedFormat(ext)) if ext == "txt"
        ));
        assert!(DocumentFormat::from_filename("README").is_err());
    }

    #[test]
    fn test_entity_label_sanitizing() {
        assert_eq!(EntityType::from_label("ORG"), Some(EntityType::Organization));
        assert_eq!(EntityType::from_label("law"), Some(EntityType::Regulation));
        assert_eq!(EntityType::from_label("CARDINAL"), None);
    }

    #[test]
    fn test_enums_serialize_lowercase() {
        let json = serde_json::to_string(&RelevanceType::Direct).unwrap();
        assert_eq!(json, "\"direct\"");
        let json = serde_json::to_string(&ResponseStatus::NoEvidence).unwrap();
        assert_eq!(json, "\"no_evidence\"");
    }

    #[test]
    fn test_date_range_overlap() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let q3 = DateRange { start: d(2024, 7, 1), end: d(2024, 9, 30), label: "Q3 2024".into() };
        let year = DateRange { start: d(2024, 1, 1), end: d(2024, 12, 31), label: "2024".into() };
        let q1_25 = DateRange { start: d(2025, 1, 1), end: d(2025, 3, 31), label: "Q1 2025".into() };
        assert!(q3.overlaps(&year));
        assert!(year.overlaps(&q3));
        assert!(!q3.overlaps(&q1_25));
    }
}
