/// Error types shared by the tender crates.
///
/// These errors represent failures in infrastructure components (Redis, vector DB, embeddings).
/// Domain errors are defined in the generator crate and wrap `CommonError` via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("vector db error: {0}")]
    VectorDb(String),

    #[error("embedding error: {0}")]
    Embedding(String),
}
