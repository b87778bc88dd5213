//! Query execution

use mongoz_core::{CollectionRef, CollectionResult, Connection, DocumentTree, QueryOptions, Result};
use std::sync::Arc;
use std::time::Instant;

/// Runs find or aggregate requests and collects the documents in store order
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute `options` against `collection`.
    ///
    /// A non-empty pipeline runs as an aggregation and every find fragment is
    /// ignored. Otherwise a find runs with the filter (default `{}`),
    /// projection, sort and limit.
    #[tracing::instrument(
        skip(self, conn, collection, options),
        fields(collection = %collection, aggregate = options.is_aggregate())
    )]
    pub async fn execute(
        &self,
        conn: &Arc<dyn Connection>,
        collection: &CollectionRef,
        options: &QueryOptions,
    ) -> Result<CollectionResult> {
        tracing::debug!("executing query");
        let start = Instant::now();

        let rows = conn
            .run(collection, &options.request())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "query execution failed");
                e
            })?;
        let documents: Vec<DocumentTree> = rows.into_iter().map(DocumentTree::from).collect();

        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            documents = documents.len(),
            execution_time_ms,
            "query executed successfully"
        );
        Ok(CollectionResult::new(documents, execution_time_ms))
    }
}

#[cfg(test)]
mod tests;
