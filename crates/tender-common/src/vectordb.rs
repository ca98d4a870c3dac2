/// LanceDB vector database wrapper.
///
/// Read-only access to tables populated by a separate ingestion process. Searches use cosine
/// distance, so the `_distance` column LanceDB adds is `1 - cosine_similarity`.
use arrow_array::RecordBatch;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use tracing::debug;

use crate::error::CommonError;

pub struct VectorDb {
    db: lancedb::Connection,
}

impl VectorDb {
    /// Connect to a LanceDB database at the given filesystem path or URI.
    pub async fn connect(path: &str) -> Result<Self, CommonError> {
        let db = lancedb::connect(path)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("connection failed: {e}")))?;
        Ok(Self { db })
    }

    async fn open(&self, table_name: &str) -> Result<lancedb::Table, CommonError> {
        self.db
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("open table {table_name} failed: {e}")))
    }

    /// Search for the nearest vectors to the given query embedding.
    ///
    /// `filter` is a DataFusion SQL predicate applied before the limit. Returns up to `limit`
    /// rows as RecordBatches, including the `_distance` column.
    pub async fn search(
        &self,
        table_name: &str,
        query_embedding: &[f32],
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<RecordBatch>, CommonError> {
        let table = self.open(table_name).await?;

        let mut query = table
            .vector_search(query_embedding)
            .map_err(|e| CommonError::VectorDb(format!("vector search setup failed: {e}")))?
            .distance_type(DistanceType::Cosine)
            .limit(limit);
        if let Some(filter) = filter {
            debug!(table = table_name, filter, "applying search filter");
            query = query.only_if(filter);
        }

        let results = query
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("vector search failed: {e}")))?;

        futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| CommonError::VectorDb(format!("collecting search results failed: {e}")))
    }

    /// Total number of rows in the table.
    pub async fn count_rows(&self, table_name: &str) -> Result<usize, CommonError> {
        let table = self.open(table_name).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| CommonError::VectorDb(format!("count rows failed: {e}")))
    }
}

/// Build an equality predicate with the value quoted as a SQL string literal.
pub fn eq_filter(column: &str, value: &str) -> String {
    format!("{column} = '{}'", value.replace('\'', "''"))
}
