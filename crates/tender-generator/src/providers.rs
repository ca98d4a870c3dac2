/// Capability interfaces the pipeline depends on, and their concrete adapters.
///
/// The section generator only sees `EmbeddingProvider`, `SimilarityIndex` and
/// `TextGenerator`. Adapters are constructed once at startup from explicit configuration.
use std::sync::Arc;

use async_trait::async_trait;
use tender_common::embedding::{LocalEmbedder, RemoteEmbedder};
use tender_common::openai::{ChatCompletionRequest, Message, OpenAiClient};
use tracing::debug;

use crate::error::ProviderError;
use crate::model::{EmbeddingVector, RetrievedNeighbor, SectionId};
use crate::usage::UsageTracker;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed non-empty text no longer than `max_input_chars`.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError>;

    fn max_input_chars(&self) -> usize;
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Up to `top_k` neighbours ordered by descending score. When `section_filter` is set,
    /// only neighbours tagged with that section are returned.
    async fn query(
        &self,
        vector: &EmbeddingVector,
        top_k: usize,
        section_filter: Option<SectionId>,
    ) -> Result<Vec<RetrievedNeighbor>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;
}

fn ensure_embeddable(text: &str, max_chars: usize) -> Result<(), ProviderError> {
    if text.trim().is_empty() {
        return Err(ProviderError::Embedding("input text is empty".to_string()));
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(ProviderError::Embedding(format!(
            "input is {len} characters, provider limit is {max_chars}"
        )));
    }
    Ok(())
}

/// Embeddings from an OpenAI-compatible endpoint.
pub struct OpenAiEmbeddings {
    inner: RemoteEmbedder,
    max_input_chars: usize,
}

impl OpenAiEmbeddings {
    pub fn new(inner: RemoteEmbedder, max_input_chars: usize) -> Self {
        Self {
            inner,
            max_input_chars,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        ensure_embeddable(text, self.max_input_chars)?;
        let values = self
            .inner
            .embed(text)
            .await
            .map_err(|e| ProviderError::Embedding(e.to_string()))?;
        debug!(model = self.inner.model(), dims = values.len(), "query embedded");
        Ok(EmbeddingVector::new(values))
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}

/// Embeddings from the in-process fastembed model.
pub struct LocalEmbeddings {
    inner: LocalEmbedder,
    max_input_chars: usize,
}

impl LocalEmbeddings {
    pub fn new(inner: LocalEmbedder, max_input_chars: usize) -> Self {
        Self {
            inner,
            max_input_chars,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddings {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        ensure_embeddable(text, self.max_input_chars)?;
        self.inner
            .embed_query(text)
            .await
            .map(EmbeddingVector::new)
            .map_err(|e| ProviderError::Embedding(e.to_string()))
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}

/// Chat-completion generation against an OpenAI-compatible endpoint.
pub struct OpenAiGenerator {
    client: Arc<OpenAiClient>,
    model: String,
    usage: UsageTracker,
}

impl OpenAiGenerator {
    pub fn new(client: Arc<OpenAiClient>, model: impl Into<String>, usage: UsageTracker) -> Self {
        Self {
            client,
            model: model.into(),
            usage,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let chat = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(request.system.clone()),
                Message::user(request.prompt.clone()),
            ],
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
        };

        let response = self
            .client
            .chat_completions(&chat)
            .await
            .map_err(|e| ProviderError::Generation(e.to_string()))?;
        self.usage.record_generation(response.usage.as_ref()).await;

        response
            .first_content()
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::Generation("missing choices[0].message.content".to_string())
            })
    }
}
