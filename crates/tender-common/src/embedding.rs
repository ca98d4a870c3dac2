/// Embedding backends.
///
/// - `RemoteEmbedder` calls an OpenAI-compatible `/embeddings` endpoint.
/// - `LocalEmbedder` runs fastembed in-process. `TextEmbedding` is synchronous and CPU-bound,
///   so every call goes through `tokio::task::spawn_blocking`.
///
/// Neither backend caches or retries.
use std::sync::Arc;

use crate::error::CommonError;
use crate::openai::{EmbeddingRequest, OpenAiClient};

/// Embeds text through an OpenAI-compatible embeddings endpoint.
pub struct RemoteEmbedder {
    client: Arc<OpenAiClient>,
    model: String,
    dimensions: usize,
}

impl RemoteEmbedder {
    pub fn new(client: Arc<OpenAiClient>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, CommonError> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };
        let vector = self
            .client
            .embeddings(&request)
            .await
            .and_then(|resp| resp.into_first())
            .map_err(|e| CommonError::Embedding(format!("remote embedding failed: {e}")))?;
        if vector.len() != self.dimensions {
            return Err(CommonError::Embedding(format!(
                "model {} returned {} dimensions, expected {}",
                self.model,
                vector.len(),
                self.dimensions
            )));
        }
        Ok(vector)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Wraps fastembed's `TextEmbedding` model (nomic-embed-text-v1.5).
///
/// The model uses task-prefixed inputs; queries are sent as "search_query: {text}".
pub struct LocalEmbedder {
    model: Arc<fastembed::TextEmbedding>,
}

impl LocalEmbedder {
    /// Initialize the embedding model.
    ///
    /// This downloads the model on first run (~300MB). The download happens synchronously
    /// inside a blocking task.
    pub async fn new() -> Result<Self, CommonError> {
        let model = tokio::task::spawn_blocking(|| {
            let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(true);
            fastembed::TextEmbedding::try_new(options)
        })
        .await
        .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::Embedding(format!("model initialization failed: {e}")))?;

        Ok(Self {
            model: Arc::new(model),
        })
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError> {
        let prefixed = vec![format!("search_query: {query}")];
        let model = Arc::clone(&self.model);
        let mut results =
            tokio::task::spawn_blocking(move || model.embed(prefixed, None))
                .await
                .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
                .map_err(|e| CommonError::Embedding(format!("query embedding failed: {e}")))?;
        results
            .pop()
            .ok_or_else(|| CommonError::Embedding("empty embedding result".to_string()))
    }

    /// 768 for nomic-embed-text-v1.5.
    pub fn dimensions(&self) -> usize {
        768
    }
}
