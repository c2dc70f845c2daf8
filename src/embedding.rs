//! Embedding providers behind the core [`Embedder`] trait.
//!
//! - **`hash`**: deterministic feature hashing via [`HashEmbedder`]; no network.
//! - **`openai`**: `POST {url}/embeddings` (default `https://api.openai.com/v1`).
//!   Requires `OPENAI_API_KEY`.
//! - **`ollama`**: `POST {url}/api/embed` on a local Ollama instance
//!   (default `http://localhost:11434`).
//!
//! Every returned vector is checked against the configured dimensionality;
//! a mismatch is a contract violation and is not retried.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;

use compliance_rag_core::embedding::Embedder;
use compliance_rag_core::offline::HashEmbedder;
use compliance_rag_core::{Error, Result};

use crate::config::EmbeddingConfig;
use crate::http;

pub const DEFAULT_HASH_DIMS: usize = 384;
const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the configured embedding provider.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn required(config: &EmbeddingConfig, provider: &str) -> anyhow::Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

fn parse_vector(service: &str, value: Option<&Value>, dims: usize) -> Result<Vec<f32>> {
    let values = value.and_then(|v| v.as_array()).ok_or_else(|| Error::Rejected {
        service: service.to_string(),
        message: "invalid response: missing embedding".into(),
    })?;
    let vector: Vec<f32> = values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();
    if vector.len() != dims {
        return Err(Error::Rejected {
            service: service.to_string(),
            message: format!("expected {} dimensions, got {}", dims, vector.len()),
        });
    }
    Ok(vector)
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    /// Reads the API key from `OPENAI_API_KEY`.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> anyhow::Result<Self> {
        let (model, dims) = required(config, "OpenAI")?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: http::trim_base(config.url.as_deref().unwrap_or(OPENAI_URL)),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        let json = http::send_json("openai", request, Error::EmbeddingService).await?;
        parse_vector("openai", json.pointer("/data/0/embedding"), self.dims)
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let (model, dims) = required(config, "Ollama")?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: http::trim_base(config.url.as_deref().unwrap_or(OLLAMA_URL)),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let request = self.client.post(format!("{}/api/embed", self.url)).json(&body);
        let json = http::send_json("ollama", request, Error::EmbeddingService).await?;
        parse_vector("ollama", json.pointer("/embeddings/0"), self.dims)
    }
}
