//! Text generation collaborator trait.

use async_trait::async_trait;

use crate::error::Result;

/// One numbered excerpt of the conditioning context.
#[derive(Debug, Clone, PartialEq)]
pub struct CitedExcerpt {
    /// Citation number, `[n]` in the answer.
    pub citation: usize,
    pub document: String,
    pub page: u32,
    pub text: String,
}

/// A fully assembled prompt for the generation collaborator.
///
/// `system` and `user` are the rendered prompt; `question` and `excerpts`
/// carry the same content in structured form for generators that do not
/// need a language model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub question: String,
    pub excerpts: Vec<CitedExcerpt>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
