use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tender_common::embedding::{LocalEmbedder, RemoteEmbedder};
use tender_common::openai::OpenAiClient;
use tender_common::redis::RedisCache;
use tender_common::vectordb::VectorDb;
use tender_generator::config::{Config, EmbeddingBackend};
use tender_generator::orchestrator::TenderOrchestrator;
use tender_generator::providers::{
    EmbeddingProvider, LocalEmbeddings, OpenAiEmbeddings, OpenAiGenerator,
};
use tender_generator::retrieval::LanceIndex;
use tender_generator::section::SectionGenerator;
use tender_generator::server::TenderServer;
use tender_generator::usage::UsageTracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing to stderr (stdout is reserved for MCP JSON-RPC)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting tender-generator MCP server");

    // 1. Load config from environment
    let config = Config::from_env()?;
    info!(
        base_url = %config.openai.base_url,
        generation_model = %config.generation_model,
        embedding_backend = ?config.embedding.backend,
        lancedb_path = %config.lancedb_path,
        table = %config.table,
        top_k = config.generation.top_k,
        max_attempts = config.generation.retry.max_attempts(),
        concurrency = config.section_concurrency,
        redis = config.redis_url.is_some(),
        "configuration loaded"
    );

    // 2. Redis-backed generation stats (optional)
    let redis = RedisCache::new(config.redis_url.as_deref());
    if redis.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, running without generation stats");
    }
    let usage = UsageTracker::new(redis);

    // 3. Providers
    let openai = Arc::new(OpenAiClient::new(config.openai.clone())?);

    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding.backend {
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbeddings::new(
            RemoteEmbedder::new(
                Arc::clone(&openai),
                config.embedding.model.clone(),
                config.embedding.dimensions,
            ),
            config.embedding.max_input_chars,
        )),
        EmbeddingBackend::Local => {
            info!("initializing local embedding model (may download on first run)");
            let local = LocalEmbedder::new().await?;
            if local.dimensions() != config.embedding.dimensions {
                anyhow::bail!(
                    "local embedding model has {} dimensions but EMBEDDING_DIMENSIONS is {}",
                    local.dimensions(),
                    config.embedding.dimensions
                );
            }
            Arc::new(LocalEmbeddings::new(local, config.embedding.max_input_chars))
        }
    };
    info!("embedding provider ready");

    let vectordb = Arc::new(VectorDb::connect(&config.lancedb_path).await?);
    let index = Arc::new(LanceIndex::new(
        vectordb,
        config.table.clone(),
        config.embedding.dimensions,
    ));
    match index.count().await {
        Ok(count) => info!(table = %config.table, vectors = count, "lancedb connected"),
        Err(e) => tracing::warn!(error = %e, "historical tender index is not readable yet"),
    }

    let generator = Arc::new(OpenAiGenerator::new(
        Arc::clone(&openai),
        config.generation_model.clone(),
        usage.clone(),
    ));

    // 4. Pipeline
    let sections = Arc::new(SectionGenerator::new(
        embedder,
        index.clone(),
        generator,
        config.generation.clone(),
    ));
    let orchestrator = Arc::new(TenderOrchestrator::new(sections, config.section_concurrency));

    // No new sections start once shutdown is requested.
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, finishing in-flight sections");
            signal.cancel();
        }
    });

    // 5. Build MCP server and serve on stdio
    let server = TenderServer::new(orchestrator, index, usage, shutdown);

    info!("MCP server ready, serving on stdio");
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!(error = %e, "MCP server error");
    })?;

    service.waiting().await?;
    info!("MCP server shut down");
    Ok(())
}
