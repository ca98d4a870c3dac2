use std::str::FromStr;
use std::time::Duration;

use tender_common::openai::OpenAiClientConfig;
use tender_common::retry::RetryPolicy;

use crate::error::AppError;
use crate::section::GenerationSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
    /// In-process fastembed model (768 dimensions).
    Local,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    /// Must match the dimensionality the corpus was indexed with.
    pub dimensions: usize,
    pub max_input_chars: usize,
}

/// Application configuration, read once at startup and passed to constructors.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai: OpenAiClientConfig,
    pub generation_model: String,
    pub generation: GenerationSettings,
    pub embedding: EmbeddingConfig,
    /// Filesystem path (or URI) of the LanceDB database holding historical sections.
    pub lancedb_path: String,
    pub table: String,
    /// Sections generated at once; 1 keeps generation strictly sequential.
    pub section_concurrency: usize,
    /// Redis connection URL. `None` disables generation stats.
    pub redis_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LANCEDB_PATH`: path to the LanceDB database with the historical corpus
    ///
    /// Optional:
    /// - `OPENAI_BASE_URL`, `OPENAI_API_KEY`, `OPENAI_TIMEOUT_SECS`, `OPENAI_MAX_ERROR_BODY_BYTES`
    /// - `GENERATION_MODEL`, `GENERATION_MAX_TOKENS`, `GENERATION_TEMPERATURE`,
    ///   `GENERATION_MAX_ATTEMPTS`, `GENERATION_RETRY_INITIAL_MS`, `GENERATION_RETRY_MAX_MS`,
    ///   `MIN_OUTPUT_CHARS`
    /// - `EMBEDDING_BACKEND` (`openai` or `local`), `EMBEDDING_MODEL`, `EMBEDDING_DIMENSIONS`,
    ///   `EMBEDDING_MAX_INPUT_CHARS`
    /// - `TENDER_TABLE`, `RETRIEVAL_TOP_K`, `MIN_SIMILARITY`, `SECTION_CONCURRENCY`
    /// - `REDIS_URL`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let lancedb_path = env.get("LANCEDB_PATH").ok_or_else(|| {
            AppError::Config("LANCEDB_PATH environment variable is required".to_string())
        })?;

        let openai = OpenAiClientConfig {
            base_url: env
                .get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: env.get("OPENAI_API_KEY"),
            default_timeout: Duration::from_secs(env.parse("OPENAI_TIMEOUT_SECS", 60u64)?),
            max_error_body_bytes: env.parse("OPENAI_MAX_ERROR_BODY_BYTES", 8 * 1024usize)?,
        };
        if openai.default_timeout.is_zero() {
            return Err(AppError::Config(
                "OPENAI_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let backend = match env.get("EMBEDDING_BACKEND").as_deref() {
            None | Some("openai") => EmbeddingBackend::OpenAi,
            Some("local") => EmbeddingBackend::Local,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "EMBEDDING_BACKEND must be 'openai' or 'local', got '{other}'"
                )))
            }
        };
        let default_dimensions = match backend {
            EmbeddingBackend::OpenAi => 1536,
            EmbeddingBackend::Local => 768,
        };
        let embedding = EmbeddingConfig {
            backend,
            model: env
                .get("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-ada-002".to_string()),
            dimensions: env.parse("EMBEDDING_DIMENSIONS", default_dimensions)?,
            max_input_chars: env.parse("EMBEDDING_MAX_INPUT_CHARS", 8000usize)?,
        };

        let generation = GenerationSettings {
            top_k: env.parse("RETRIEVAL_TOP_K", 3usize)?.max(1),
            min_similarity: env.parse_finite_opt("MIN_SIMILARITY")?,
            max_tokens: env.parse("GENERATION_MAX_TOKENS", 2000u32)?,
            temperature: env.parse("GENERATION_TEMPERATURE", 0.7f32)?,
            min_output_chars: env.parse("MIN_OUTPUT_CHARS", 40usize)?.max(1),
            retry: RetryPolicy::new(
                env.parse("GENERATION_MAX_ATTEMPTS", 3u32)?,
                Duration::from_millis(env.parse("GENERATION_RETRY_INITIAL_MS", 500u64)?),
                Duration::from_millis(env.parse("GENERATION_RETRY_MAX_MS", 8_000u64)?),
            ),
        };

        Ok(Self {
            openai,
            generation_model: env
                .get("GENERATION_MODEL")
                .unwrap_or_else(|| "gpt-4".to_string()),
            generation,
            embedding,
            lancedb_path,
            table: env
                .get("TENDER_TABLE")
                .unwrap_or_else(|| "tender_sections".to_string()),
            section_concurrency: env.parse("SECTION_CONCURRENCY", 1usize)?,
            redis_url: env.get("REDIS_URL"),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value of `key`, treating blank values as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T: FromStr>(&self, key: &str) -> Result<Option<T>, AppError> {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|_| AppError::Config(format!("{key} has an invalid value: '{raw}'")))
            })
            .transpose()
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, AppError> {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    fn parse_finite_opt(&self, key: &str) -> Result<Option<f32>, AppError> {
        match self.parse_opt::<f32>(key)? {
            Some(v) if !v.is_finite() => Err(AppError::Config(format!(
                "{key} must be a finite number, got '{v}'"
            ))),
            other => Ok(other),
        }
    }
}
