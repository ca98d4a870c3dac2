/// LanceDB-backed similarity index over historical tender sections.
///
/// Expected table columns: `id` (Utf8), `section` (Utf8, a section id such as
/// "SCOPE_OF_WORK"), `text` (Utf8), `embedding` (FixedSizeList<Float32>). The corpus is
/// written by a separate ingestion job; this adapter only reads it.
use std::sync::Arc;

use arrow_array::{Array, Float32Array, RecordBatch, StringArray};
use async_trait::async_trait;
use tender_common::vectordb::{eq_filter, VectorDb};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::model::{EmbeddingVector, RetrievedNeighbor, SectionId};
use crate::providers::SimilarityIndex;

const SECTION_COLUMN: &str = "section";
const TEXT_COLUMN: &str = "text";
const DISTANCE_COLUMN: &str = "_distance";

pub struct LanceIndex {
    vectordb: Arc<VectorDb>,
    table: String,
    dimensions: usize,
}

impl LanceIndex {
    pub fn new(vectordb: Arc<VectorDb>, table: impl Into<String>, dimensions: usize) -> Self {
        Self {
            vectordb,
            table: table.into(),
            dimensions,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of historical sections stored in the index.
    pub async fn count(&self) -> Result<usize, ProviderError> {
        self.vectordb
            .count_rows(&self.table)
            .await
            .map_err(|e| ProviderError::Index(e.to_string()))
    }
}

#[async_trait]
impl SimilarityIndex for LanceIndex {
    async fn query(
        &self,
        vector: &EmbeddingVector,
        top_k: usize,
        section_filter: Option<SectionId>,
    ) -> Result<Vec<RetrievedNeighbor>, ProviderError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if vector.dimensions() != self.dimensions {
            return Err(ProviderError::Index(format!(
                "query vector has {} dimensions, index expects {}",
                vector.dimensions(),
                self.dimensions
            )));
        }

        let filter = section_filter.map(|s| eq_filter(SECTION_COLUMN, s.as_str()));
        let batches = self
            .vectordb
            .search(&self.table, vector.as_slice(), top_k, filter.as_deref())
            .await
            .map_err(|e| ProviderError::Index(e.to_string()))?;

        let mut neighbors = extract_neighbors(&batches, section_filter);
        rank(&mut neighbors, top_k);
        debug!(
            table = %self.table,
            section = ?section_filter,
            returned = neighbors.len(),
            "similarity query complete"
        );
        Ok(neighbors)
    }
}

/// Sort by descending score and keep the best `top_k`.
pub fn rank(neighbors: &mut Vec<RetrievedNeighbor>, top_k: usize) {
    neighbors.sort_by(|a, b| b.score.total_cmp(&a.score));
    neighbors.truncate(top_k);
}

/// Convert LanceDB result batches into neighbours.
///
/// Rows with an unknown section tag, or a tag other than `section_filter`, are dropped even
/// though the store already filtered them.
fn extract_neighbors(
    batches: &[RecordBatch],
    section_filter: Option<SectionId>,
) -> Vec<RetrievedNeighbor> {
    let mut neighbors = Vec::new();

    for batch in batches {
        let schema = batch.schema();
        let section_col = get_string_column(batch, &schema, SECTION_COLUMN);
        let text_col = get_string_column(batch, &schema, TEXT_COLUMN);
        let distance_col = get_float_column(batch, &schema, DISTANCE_COLUMN);

        let (Some(section_col), Some(text_col)) = (section_col, text_col) else {
            warn!("search result batch missing expected columns");
            continue;
        };
        if distance_col.is_none() && batch.num_rows() > 0 {
            warn!(
                rows = batch.num_rows(),
                "search result batch has no _distance column, scoring its rows as 0"
            );
        }

        for row in 0..batch.num_rows() {
            if section_col.is_null(row) || text_col.is_null(row) {
                continue;
            }
            let Ok(section) = section_col.value(row).parse::<SectionId>() else {
                warn!(tag = section_col.value(row), "skipping neighbour with unknown section tag");
                continue;
            };
            if section_filter.is_some_and(|wanted| wanted != section) {
                warn!(%section, "index returned a neighbour from another section");
                continue;
            }

            // Cosine distance is 1 - similarity.
            let distance = distance_col.map(|c| c.value(row)).unwrap_or(1.0);
            let score = (1.0_f32 - distance).clamp(-1.0, 1.0);

            neighbors.push(RetrievedNeighbor {
                text: text_col.value(row).to_string(),
                section,
                score,
            });
        }
    }

    neighbors
}

fn get_string_column<'a>(
    batch: &'a RecordBatch,
    schema: &arrow_schema::Schema,
    name: &str,
) -> Option<&'a StringArray> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<StringArray>()
}

fn get_float_column<'a>(
    batch: &'a RecordBatch,
    schema: &arrow_schema::Schema,
    name: &str,
) -> Option<&'a Float32Array> {
    let idx = schema.index_of(name).ok()?;
    batch.column(idx).as_any().downcast_ref::<Float32Array>()
}
