//! Point operations on single documents

use bson::{Bson, doc};
use mongoz_core::{
    CollectionRef, Connection, DocumentTree, ID_FIELD, MongozError, Result,
};
use std::sync::Arc;

/// Fetches, replaces and deletes one document by its `_id`
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentMutator;

impl DocumentMutator {
    pub fn new() -> Self {
        Self
    }

    /// Fetch the document whose `_id` equals `id`
    #[tracing::instrument(skip(self, conn, collection, id), fields(collection = %collection, id = %id))]
    pub async fn find_one(
        &self,
        conn: &Arc<dyn Connection>,
        collection: &CollectionRef,
        id: &Bson,
    ) -> Result<DocumentTree> {
        let found = conn
            .find_one(collection, &doc! { ID_FIELD: id.clone() })
            .await?;
        match found {
            Some(document) => Ok(DocumentTree::from(document)),
            None => Err(not_found(collection, id)),
        }
    }

    /// Replace the stored document carrying the same `_id` as `document`.
    ///
    /// The whole document is written; fields removed from the tree are
    /// removed from the store.
    #[tracing::instrument(skip(self, conn, collection, document), fields(collection = %collection))]
    pub async fn update(
        &self,
        conn: &Arc<dyn Connection>,
        collection: &CollectionRef,
        document: &DocumentTree,
    ) -> Result<()> {
        let id = document.id_bson().ok_or_else(|| {
            MongozError::validation(ID_FIELD, "Document has no _id and cannot be updated")
        })?;

        let matched = conn
            .replace_one(collection, &id, &document.to_document())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, id = %id, "update failed");
                e
            })?;
        if matched == 0 {
            return Err(not_found(collection, &id));
        }
        tracing::debug!(id = %id, "document updated");
        Ok(())
    }

    /// Delete the document whose `_id` equals `id`
    #[tracing::instrument(skip(self, conn, collection, id), fields(collection = %collection, id = %id))]
    pub async fn delete(
        &self,
        conn: &Arc<dyn Connection>,
        collection: &CollectionRef,
        id: &Bson,
    ) -> Result<()> {
        let deleted = conn.delete_one(collection, id).await.map_err(|e| {
            tracing::error!(error = %e, "delete failed");
            e
        })?;
        if deleted == 0 {
            return Err(not_found(collection, id));
        }
        tracing::debug!("document deleted");
        Ok(())
    }
}

fn not_found(collection: &CollectionRef, id: &Bson) -> MongozError {
    MongozError::NotFound(format!("No document with _id {} in {}", id, collection))
}

#[cfg(test)]
mod tests;
