use tender_common::error::CommonError;
use tender_common::openai::OpenAiClientError;

use crate::model::SectionId;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    OpenAi(#[from] OpenAiClientError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("config error: {0}")]
    Config(String),
}

/// A brief that cannot produce a meaningful tender. Aborts generation before any section runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("project title must not be empty")]
    EmptyTitle,

    #[error("project description must not be empty")]
    EmptyDescription,

    #[error("project description is too short: {len} characters, at least {min} required")]
    DescriptionTooShort { len: usize, min: usize },
}

/// Failure of one of the external providers (embedding, similarity index, generation).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("embedding provider: {0}")]
    Embedding(String),

    #[error("similarity index: {0}")]
    Index(String),

    #[error("generation provider: {0}")]
    Generation(String),

    #[error("degenerate output: {len} characters, at least {min} required")]
    Degenerate { len: usize, min: usize },
}

/// Terminal outcome of one section once retries are exhausted.
///
/// Never propagated out of the section generator; it is always converted into a failed
/// `SectionResult`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{section} failed after {attempts} generation attempt(s): {source}")]
pub struct SectionGenerationFailure {
    pub section: SectionId,
    pub attempts: u32,
    #[source]
    pub source: ProviderError,
}

impl SectionGenerationFailure {
    pub fn new(section: SectionId, attempts: u32, source: ProviderError) -> Self {
        Self {
            section,
            attempts,
            source,
        }
    }
}
