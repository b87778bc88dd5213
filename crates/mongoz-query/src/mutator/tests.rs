//! Tests for point operations by `_id`

use super::*;
use crate::test_helpers::{InjectedFailure, MemoryConnection, dummy_collection, dummy_documents};
use mongoz_core::{ErrorKind, NodePath};
use pretty_assertions::assert_eq;

fn seeded() -> (Arc<MemoryConnection>, Arc<dyn Connection>) {
    let memory = Arc::new(MemoryConnection::new());
    memory.insert(&dummy_collection(), dummy_documents());
    let conn: Arc<dyn Connection> = memory.clone();
    (memory, conn)
}

#[tokio::test]
async fn test_find_one_by_id() {
    let (_, conn) = seeded();

    let tree = DocumentMutator::new()
        .find_one(&conn, &dummy_collection(), &Bson::Int32(4))
        .await
        .unwrap();

    assert_eq!(
        tree.to_document(),
        doc! { "_id": 4, "label": "tete", "price": 20 }
    );
}

#[tokio::test]
async fn test_find_one_missing_is_not_found() {
    let (_, conn) = seeded();

    let err = DocumentMutator::new()
        .find_one(&conn, &dummy_collection(), &Bson::Int32(42))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_id_match_is_type_exact_for_strings() {
    let (_, conn) = seeded();

    let err = DocumentMutator::new()
        .find_one(&conn, &dummy_collection(), &Bson::String("4".to_string()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_update_then_find_one_sees_the_edit() {
    let (_, conn) = seeded();
    let mutator = DocumentMutator::new();
    let coll = dummy_collection();

    let mut tree = mutator.find_one(&conn, &coll, &Bson::Int32(4)).await.unwrap();
    tree.set_scalar(&NodePath::root().key("price"), mongoz_core::Node::Int32(25))
        .unwrap();
    tree.remove_key(&NodePath::root(), "label").unwrap();
    mutator.update(&conn, &coll, &tree).await.unwrap();

    let reloaded = mutator.find_one(&conn, &coll, &Bson::Int32(4)).await.unwrap();
    assert_eq!(reloaded.to_document(), doc! { "_id": 4, "price": 25 });
}

#[tokio::test]
async fn test_update_without_id_is_rejected() {
    let (memory, conn) = seeded();
    let tree = DocumentTree::from(doc! { "label": "orphan" });

    let err = DocumentMutator::new()
        .update(&conn, &dummy_collection(), &tree)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.field(), Some(ID_FIELD));
    assert_eq!(memory.documents(&dummy_collection()), dummy_documents());
}

#[tokio::test]
async fn test_update_of_deleted_document_is_not_found() {
    let (_, conn) = seeded();
    let tree = DocumentTree::from(doc! { "_id": 99, "label": "ghost" });

    let err = DocumentMutator::new()
        .update(&conn, &dummy_collection(), &tree)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete_then_find_one_is_not_found() {
    let (memory, conn) = seeded();
    let mutator = DocumentMutator::new();
    let coll = dummy_collection();

    mutator.delete(&conn, &coll, &Bson::Int32(4)).await.unwrap();

    assert_eq!(memory.documents(&coll).len(), 4);
    let err = mutator.find_one(&conn, &coll, &Bson::Int32(4)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = mutator.delete(&conn, &coll, &Bson::Int32(4)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_write_failure_is_propagated() {
    let (memory, conn) = seeded();
    memory
        .store()
        .fail_with(InjectedFailure::Query("not authorized".to_string()));

    let err = DocumentMutator::new()
        .delete(&conn, &dummy_collection(), &Bson::Int32(1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Query);
    memory.store().clear_failure();
    assert_eq!(memory.documents(&dummy_collection()).len(), 5);
}
