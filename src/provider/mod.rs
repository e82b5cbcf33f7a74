use async_trait::async_trait;

use crate::error::ProviderError;

pub mod openai;

pub use openai::{OpenAiProvider, OpenAiSettings};

/// Request envelope shared by completion providers.
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            system: None,
            prompt,
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// A text-in/text-out model endpoint. Implementations must be safe to call concurrently.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ProviderError>;
}
