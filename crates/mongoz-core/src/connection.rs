//! Connection trait

use crate::{CollectionRef, FindRequest, QueryRequest, Result};
use async_trait::async_trait;
use bson::{Bson, Document};

/// An open connection to a document store
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "mongodb")
    fn driver_name(&self) -> &str;

    /// Round-trip to the server
    async fn ping(&self) -> Result<()>;

    /// Run a find and collect every matching document in store order
    async fn find(&self, collection: &CollectionRef, request: &FindRequest)
    -> Result<Vec<Document>>;

    /// Run an aggregation pipeline and collect its output
    async fn aggregate(
        &self,
        collection: &CollectionRef,
        pipeline: &[Document],
    ) -> Result<Vec<Document>>;

    /// First document matching `filter`
    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &Document,
    ) -> Result<Option<Document>>;

    /// Replace the document whose `_id` equals `id`.
    ///
    /// Returns the number of matched documents.
    async fn replace_one(
        &self,
        collection: &CollectionRef,
        id: &Bson,
        replacement: &Document,
    ) -> Result<u64>;

    /// Delete the document whose `_id` equals `id`.
    ///
    /// Returns the number of deleted documents.
    async fn delete_one(&self, collection: &CollectionRef, id: &Bson) -> Result<u64>;

    async fn list_database_names(&self) -> Result<Vec<String>>;

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>>;

    /// Run a normalized query request
    async fn run(&self, collection: &CollectionRef, request: &QueryRequest) -> Result<Vec<Document>> {
        match request {
            QueryRequest::Aggregate { pipeline } => {
                tracing::debug!(
                    collection = %collection,
                    stages = pipeline.len(),
                    "running aggregation"
                );
                self.aggregate(collection, pipeline).await
            }
            QueryRequest::Find(find) => {
                tracing::debug!(
                    collection = %collection,
                    limit = ?find.limit,
                    "running find"
                );
                self.find(collection, find).await
            }
        }
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}
