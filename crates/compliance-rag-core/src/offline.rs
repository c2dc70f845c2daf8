//! Deterministic collaborators that need no external service.
//!
//! [`HashEmbedder`] maps text to a feature-hashed bag of content terms;
//! [`ExtractiveGenerator`] answers by quoting the best-matching sentence of
//! each cited excerpt. Both are selectable in configuration for offline use
//! and back the test suites.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::embedding::Embedder;
use crate::error::Result;
use crate::generate::{GenerationRequest, Generator};
use crate::text;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model: format!("hash-bow-{}", dims.max(1)),
        }
    }

    /// Unit-length term-hash vector; all zeros for text without terms.
    pub fn vector(&self, input: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for term in text::terms(input) {
            let digest = Sha256::digest(term.as_bytes());
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(idx) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Answers with the best sentence of the top excerpts, each cited.
#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    max_sentences: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let wanted = text::terms(&request.question);
        let mut picked: Vec<(f64, usize, String)> = Vec::new();
        for excerpt in &request.excerpts {
            let best = text::sentences(&excerpt.text)
                .into_iter()
                .map(|(s, e)| {
                    let sentence = &excerpt.text[s..e];
                    (text::coverage(&wanted, &text::terms(sentence)), sentence)
                })
                .fold(None, |best: Option<(f64, &str)>, cur| match best {
                    Some(b) if b.0 >= cur.0 => Some(b),
                    _ => Some(cur),
                });
            if let Some((score, sentence)) = best {
                if score > 0.0 {
                    picked.push((score, excerpt.citation, sentence.to_string()));
                }
            }
        }
        picked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        picked.truncate(self.max_sentences);

        let answer = picked
            .into_iter()
            .map(|(_, citation, sentence)| {
                let sentence = sentence.trim_end_matches(['.', ';']);
                format!("{sentence} [{citation}].")
            })
            .collect::<Vec<_>>()
            .join(" ");
        Ok(answer)
    }
}
