//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional; omitted values fall back to the
//! defaults below. Secrets never live in the file: the OpenAI providers read
//! `OPENAI_API_KEY` from the environment.
//!
//! ```toml
//! [db]
//! path = "./data/crag.sqlite"
//!
//! [embedding]
//! provider = "openai"              # hash | openai | ollama
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"              # extractive | openai | ollama
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use compliance_rag_core::chunk::ChunkingConfig;
use compliance_rag_core::engine::EngineConfig;
use compliance_rag_core::ingest::IngestParams;
use compliance_rag_core::retrieve::RetrievalParams;
use compliance_rag_core::retry::RetryPolicy;
use compliance_rag_core::synthesize::SynthesisParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingSection,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub nlp: NlpConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingSection {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    250
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_temporal_boost")]
    pub temporal_boost: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            temporal_boost: default_temporal_boost(),
            candidate_multiplier: default_candidate_multiplier(),
            max_top_k: default_max_top_k(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_min_similarity() -> f64 {
    0.2
}
fn default_temporal_boost() -> f64 {
    0.05
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_max_top_k() -> usize {
    20
}
fn default_excerpt_chars() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Sentences quoted by the `extractive` provider.
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_sentences: default_max_sentences(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_temperature() -> f64 {
    0.1
}
fn default_max_output_tokens() -> u32 {
    512
}
fn default_max_sentences() -> usize {
    2
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `disabled`, `tesseract` (local binary) or `http`.
    #[serde(default = "default_ocr_provider")]
    pub provider: String,
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_ocr_language")]
    pub language: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_ocr_provider(),
            command: default_ocr_command(),
            language: default_ocr_language(),
            url: None,
            timeout_secs: default_ocr_timeout(),
        }
    }
}

impl OcrConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_ocr_provider() -> String {
    "disabled".to_string()
}
fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_language() -> String {
    "eng".to_string()
}
fn default_ocr_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct NlpConfig {
    /// `lexicon` (built in) or `http`.
    #[serde(default = "default_nlp_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_nlp_timeout")]
    pub timeout_secs: u64,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            provider: default_nlp_provider(),
            url: None,
            timeout_secs: default_nlp_timeout(),
        }
    }
}

fn default_nlp_provider() -> String {
    "lexicon".to_string()
}
fn default_nlp_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_concurrent_documents")]
    pub max_concurrent_documents: usize,
    #[serde(default = "default_concurrent_embeddings")]
    pub max_concurrent_embeddings: usize,
    /// Uploads larger than this are rejected before extraction.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: default_concurrent_documents(),
            max_concurrent_embeddings: default_concurrent_embeddings(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_concurrent_documents() -> usize {
    4
}
fn default_concurrent_embeddings() -> usize {
    8
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Per-attempt timeout applied to every collaborator call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_call_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens: self.chunking.max_tokens,
            overlap_tokens: self.chunking.overlap_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            timeout: Duration::from_secs(self.retry.call_timeout_secs),
        }
    }

    pub fn ingest_params(&self) -> IngestParams {
        IngestParams {
            chunking: self.chunking(),
            retry: self.retry_policy(),
            max_concurrent_documents: self.ingest.max_concurrent_documents,
            max_concurrent_embeddings: self.ingest.max_concurrent_embeddings,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            reference_date: None,
            retrieval: RetrievalParams {
                min_similarity: self.retrieval.min_similarity,
                temporal_boost: self.retrieval.temporal_boost,
                candidate_multiplier: self.retrieval.candidate_multiplier,
            },
            synthesis: SynthesisParams {
                excerpt_chars: self.retrieval.excerpt_chars,
                ..SynthesisParams::default()
            },
            retry: self.retry_policy(),
            max_top_k: self.retrieval.max_top_k,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config.chunking().validate()?;

    let r = &config.retrieval;
    if !(0.0..=1.0).contains(&r.min_similarity) {
        bail!("retrieval.min_similarity must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&r.temporal_boost) {
        bail!("retrieval.temporal_boost must be in [0.0, 1.0]");
    }
    if r.candidate_multiplier == 0 || r.max_top_k == 0 {
        bail!("retrieval.candidate_multiplier and retrieval.max_top_k must be >= 1");
    }
    if r.excerpt_chars < 40 {
        bail!("retrieval.excerpt_chars must be >= 40");
    }

    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.ingest.max_concurrent_documents == 0 || config.ingest.max_concurrent_embeddings == 0 {
        bail!("ingest concurrency limits must be >= 1");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "hash" => {}
        "openai" | "ollama" => {
            if e.model.is_none() {
                bail!("embedding.model must be specified when provider is '{}'", e.provider);
            }
            if e.dims.is_none() {
                bail!("embedding.dims must be specified when provider is '{}'", e.provider);
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or ollama.",
            other
        ),
    }
    if e.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    let g = &config.generation;
    match g.provider.as_str() {
        "extractive" => {}
        "openai" | "ollama" => {
            if g.model.is_none() {
                bail!("generation.model must be specified when provider is '{}'", g.provider);
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be extractive, openai, or ollama.",
            other
        ),
    }

    match config.ocr.provider.as_str() {
        "disabled" | "tesseract" => {}
        "http" if config.ocr.url.is_some() => {}
        "http" => bail!("ocr.url must be specified when provider is 'http'"),
        other => bail!(
            "Unknown OCR provider: '{}'. Must be disabled, tesseract, or http.",
            other
        ),
    }

    match config.nlp.provider.as_str() {
        "lexicon" => {}
        "http" if config.nlp.url.is_some() => {}
        "http" => bail!("nlp.url must be specified when provider is 'http'"),
        other => bail!("Unknown NLP provider: '{}'. Must be lexicon or http.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/crag.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.max_tokens, 250);
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.generation.provider, "extractive");
        assert!(!cfg.ocr.is_enabled());
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nmax_tokens = 100\noverlap_tokens = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let cfg = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
        )
        .unwrap();
        assert_eq!(cfg.embedding.dims, Some(768));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse_config("[db]\npath = \"x\"\n[generation]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[ocr]\nprovider = \"http\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[nlp]\nprovider = \"spacy\"\n").is_err());
    }

    #[test]
    fn test_engine_config_maps_retrieval() {
        let cfg = parse_config(
            "[db]\npath = \"x\"\n[retrieval]\nmin_similarity = 0.3\nexcerpt_chars = 120\n",
        )
        .unwrap();
        let engine = cfg.engine_config();
        assert_eq!(engine.retrieval.min_similarity, 0.3);
        assert_eq!(engine.synthesis.excerpt_chars, 120);
    }
}
