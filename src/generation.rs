//! Answer generators behind the core [`Generator`] trait.
//!
//! - **`extractive`**: quotes the best-matching excerpt sentences; no network.
//! - **`openai`**: chat completions at `{url}/chat/completions`. Requires
//!   `OPENAI_API_KEY`.
//! - **`ollama`**: `{url}/api/chat` with streaming disabled.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};

use compliance_rag_core::generate::{GenerationRequest, Generator};
use compliance_rag_core::offline::ExtractiveGenerator;
use compliance_rag_core::{Error, Result};

use crate::config::GenerationConfig;
use crate::http;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator::new(config.max_sentences))),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn messages(request: &GenerationRequest) -> Value {
    json!([
        {"role": "system", "content": request.system},
        {"role": "user", "content": request.user},
    ])
}

fn answer_text(service: &str, value: Option<&Value>) -> Result<String> {
    value
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::Rejected {
            service: service.to_string(),
            message: "invalid response: missing message content".into(),
        })
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &GenerationConfig, api_key: String) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: http::trim_base(config.url.as_deref().unwrap_or(OPENAI_URL)),
            api_key,
            model,
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages(request),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        let json = http::send_json("openai", req, Error::Generation).await?;
        answer_text("openai", json.pointer("/choices/0/message/content"))
    }

    async fn ping(&self) -> Result<()> {
        let req = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        http::send_json("openai", req, Error::Generation).await.map(|_| ())
    }
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f64,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: http::trim_base(config.url.as_deref().unwrap_or(OLLAMA_URL)),
            model,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages(request),
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        let req = self.client.post(format!("{}/api/chat", self.url)).json(&body);
        let json = http::send_json("ollama", req, Error::Generation).await?;
        answer_text("ollama", json.pointer("/message/content"))
    }

    async fn ping(&self) -> Result<()> {
        let req = self.client.get(format!("{}/api/tags", self.url));
        http::send_json("ollama", req, Error::Generation).await.map(|_| ())
    }
}
