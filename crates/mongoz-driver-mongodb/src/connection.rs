//! MongoDB connection

use crate::classify_error;
use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{Client, Collection};
use mongoz_core::{CollectionRef, Connection, FindRequest, MongozError, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// MongoDB connection wrapper implementing the Connection trait
pub struct MongoDbConnection {
    client: Client,
    user_database: Option<String>,
    closed: AtomicBool,
}

impl MongoDbConnection {
    pub fn new(client: Client, user_database: Option<String>) -> Self {
        Self {
            client,
            user_database,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the MongoDB client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MongozError::Connection("Connection is closed".to_string()));
        }
        Ok(())
    }

    fn collection(&self, collection: &CollectionRef) -> Collection<Document> {
        self.client
            .database(&collection.database)
            .collection::<Document>(&collection.name)
    }

    // Database-less commands run against the user database when set, admin otherwise.
    fn command_database(&self) -> mongodb::Database {
        self.client
            .database(self.user_database.as_deref().unwrap_or("admin"))
    }
}

#[async_trait]
impl Connection for MongoDbConnection {
    fn driver_name(&self) -> &str {
        "mongodb"
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_not_closed()?;
        self.command_database()
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(classify_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, collection, request), fields(collection = %collection))]
    async fn find(
        &self,
        collection: &CollectionRef,
        request: &FindRequest,
    ) -> Result<Vec<Document>> {
        self.ensure_not_closed()?;

        let coll = self.collection(collection);
        let mut action = coll.find(request.filter.clone());
        if let Some(projection) = &request.projection {
            action = action.projection(projection.clone());
        }
        if let Some(sort) = &request.sort {
            action = action.sort(sort.clone());
        }
        if let Some(limit) = request.limit {
            action = action.limit(limit);
        }

        let cursor = action.await.map_err(|e| {
            tracing::error!(error = %e, "find failed");
            classify_error(e)
        })?;
        cursor.try_collect().await.map_err(classify_error)
    }

    #[tracing::instrument(skip(self, collection, pipeline), fields(collection = %collection, stages = pipeline.len()))]
    async fn aggregate(
        &self,
        collection: &CollectionRef,
        pipeline: &[Document],
    ) -> Result<Vec<Document>> {
        self.ensure_not_closed()?;

        let cursor = self
            .collection(collection)
            .aggregate(pipeline.to_vec())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "aggregation failed");
                classify_error(e)
            })?;
        cursor.try_collect().await.map_err(classify_error)
    }

    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &Document,
    ) -> Result<Option<Document>> {
        self.ensure_not_closed()?;
        self.collection(collection)
            .find_one(filter.clone())
            .await
            .map_err(classify_error)
    }

    #[tracing::instrument(skip(self, collection, id, replacement), fields(collection = %collection, id = %id))]
    async fn replace_one(
        &self,
        collection: &CollectionRef,
        id: &Bson,
        replacement: &Document,
    ) -> Result<u64> {
        self.ensure_not_closed()?;
        let result = self
            .collection(collection)
            .replace_one(doc! { "_id": id.clone() }, replacement)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "replace failed");
                classify_error(e)
            })?;
        Ok(result.matched_count)
    }

    #[tracing::instrument(skip(self, collection, id), fields(collection = %collection, id = %id))]
    async fn delete_one(&self, collection: &CollectionRef, id: &Bson) -> Result<u64> {
        self.ensure_not_closed()?;
        let result = self
            .collection(collection)
            .delete_one(doc! { "_id": id.clone() })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "delete failed");
                classify_error(e)
            })?;
        Ok(result.deleted_count)
    }

    async fn list_database_names(&self) -> Result<Vec<String>> {
        self.ensure_not_closed()?;
        self.client
            .list_database_names()
            .await
            .map_err(classify_error)
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        self.ensure_not_closed()?;
        self.client
            .database(database)
            .list_collection_names()
            .await
            .map_err(classify_error)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.client.clone().shutdown().await;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
