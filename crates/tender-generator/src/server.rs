/// MCP server exposing tender generation.
///
/// Exposes three tools:
/// - `generate_tender`: Generate the six-section tender for a project brief
/// - `index_stats`: Size of the historical tender index
/// - `get_usage_stats`: Document and per-section outcome counters, generation token totals
use std::sync::Arc;

use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::export::{self, StructuredTender};
use crate::model::{Budget, ProjectBrief};
use crate::orchestrator::{ProgressEvent, TenderOrchestrator};
use crate::retrieval::LanceIndex;
use crate::usage::{UsageStats, UsageTracker};

#[derive(Debug, Deserialize, JsonSchema)]
struct GenerateTenderParams {
    /// Project title, e.g. "Municipal Road Resurfacing".
    title: String,
    /// Where the work takes place.
    location: String,
    /// Free-form duration, e.g. "6 months".
    duration: String,
    /// Optional budget, either a number or free text.
    budget: Option<Budget>,
    /// What the project involves (at least 20 characters).
    description: String,
}

#[derive(Debug, Serialize, JsonSchema)]
struct GenerateTenderResponse {
    document: StructuredTender,
    /// Plain-text rendition with one headed block per section.
    text: String,
    /// Suggested file name (without extension) for downloads.
    file_stem: String,
}

#[derive(Debug, Serialize, JsonSchema)]
struct IndexStatsResponse {
    table: String,
    total_vectors: usize,
}

#[derive(Clone)]
pub struct TenderServer {
    orchestrator: Arc<TenderOrchestrator>,
    index: Arc<LanceIndex>,
    usage: UsageTracker,
    shutdown: CancellationToken,
    tool_router: ToolRouter<TenderServer>,
}

impl TenderServer {
    pub fn new(
        orchestrator: Arc<TenderOrchestrator>,
        index: Arc<LanceIndex>,
        usage: UsageTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            index,
            usage,
            shutdown,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl TenderServer {
    #[tool(description = "Generate a complete tender document (notice inviting tender, brief introduction, instruction to bidders, scope of work, terms and conditions, price bid) from a project brief, using similar historical tenders as examples.")]
    async fn generate_tender(
        &self,
        Parameters(params): Parameters<GenerateTenderParams>,
    ) -> Result<Json<GenerateTenderResponse>, String> {
        let mut brief = ProjectBrief::new(
            params.title,
            params.location,
            params.duration,
            params.description,
        );
        if let Some(budget) = params.budget {
            brief = brief.with_budget(budget);
        }

        let observer = |e: ProgressEvent| {
            info!(
                completed = e.completed,
                total = e.total,
                section = %e.section,
                status = ?e.status,
                "section progress"
            );
        };
        let cancel = self.shutdown.child_token();

        let document = self
            .orchestrator
            .generate(&brief, &observer, &cancel)
            .await
            .map_err(|e| format!("invalid project brief: {e}"))?;
        self.usage.record_document(&document).await;

        Ok(Json(GenerateTenderResponse {
            text: export::to_text(&document),
            file_stem: export::file_stem(document.brief()),
            document: export::to_structured(&document),
        }))
    }

    #[tool(description = "Report how many historical tender sections are available in the similarity index.")]
    async fn index_stats(&self) -> Result<Json<IndexStatsResponse>, String> {
        let total_vectors = self
            .index
            .count()
            .await
            .map_err(|e| format!("index_stats failed: {e}"))?;
        Ok(Json(IndexStatsResponse {
            table: self.index.table().to_string(),
            total_vectors,
        }))
    }

    #[tool(description = "Get generation stats: complete/partial documents, per-section successes, failures and attempts, and generation requests with token totals.")]
    async fn get_usage_stats(&self) -> Result<Json<UsageStats>, String> {
        Ok(Json(self.usage.get_usage_stats().await))
    }
}

#[tool_handler]
impl ServerHandler for TenderServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "tender-generator".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Tender document generator. Call generate_tender with a project brief (title, \
                 location, duration, optional budget, description) to receive all six tender \
                 sections as structured JSON and plain text. Sections that could not be generated \
                 are marked FAILED and the document status is PARTIAL. Use index_stats to check \
                 the historical corpus and get_usage_stats for generation outcomes."
                    .to_string(),
            ),
        }
    }
}
