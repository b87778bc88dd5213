//! Tests for query execution against the in-memory connection

use super::*;
use crate::test_helpers::{InjectedFailure, MemoryConnection, dummy_collection, dummy_documents};
use bson::{Bson, doc};
use mongoz_core::{ErrorKind, Node, RawQuery};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn seeded() -> (Arc<MemoryConnection>, Arc<dyn Connection>) {
    let memory = Arc::new(MemoryConnection::new());
    memory.insert(&dummy_collection(), dummy_documents());
    let conn: Arc<dyn Connection> = memory.clone();
    (memory, conn)
}

async fn run(conn: &Arc<dyn Connection>, raw: RawQuery) -> Result<CollectionResult> {
    let options = QueryOptions::parse(&raw)?;
    QueryExecutor::new()
        .execute(conn, &dummy_collection(), &options)
        .await
}

fn labels(result: &CollectionResult) -> Vec<String> {
    result
        .documents
        .iter()
        .map(|doc| doc.to_document().get_str("label").unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_empty_options_return_every_document_in_store_order() {
    let (_, conn) = seeded();

    let result = run(&conn, RawQuery::new()).await.unwrap();

    assert_eq!(labels(&result), vec!["toto", "tutu", "tata", "tete", "tata"]);
    assert_eq!(result.total_count, Some(5));
}

#[tokio::test]
async fn test_limit_three_of_five() {
    let (_, conn) = seeded();

    let result = run(&conn, RawQuery::new().filter("{}").limit("3")).await.unwrap();

    assert_eq!(labels(&result), vec!["toto", "tutu", "tata"]);
}

#[rstest]
#[case::zero("0")]
#[case::blank("   ")]
#[tokio::test]
async fn test_unbounded_limits(#[case] limit: &str) {
    let (_, conn) = seeded();

    let result = run(&conn, RawQuery::new().limit(limit)).await.unwrap();

    assert_eq!(result.len(), 5);
}

#[tokio::test]
async fn test_filter_with_projection_keeps_only_label() {
    let (_, conn) = seeded();

    let result = run(
        &conn,
        RawQuery::new()
            .filter(r#"{"label":"tata"}"#)
            .projection(r#"{"label":1,"_id":0}"#)
            .limit("3"),
    )
    .await
    .unwrap();

    assert_eq!(result.len(), 2);
    for tree in &result.documents {
        assert_eq!(tree.to_document(), doc! { "label": "tata" });
        assert!(tree.id().is_none());
    }
}

#[tokio::test]
async fn test_sort_by_price() {
    let (_, conn) = seeded();

    let result = run(
        &conn,
        RawQuery::new()
            .filter(r#"{"label":"tata"}"#)
            .projection(r#"{"label":1,"_id":0,"price":1}"#)
            .sort(r#"{"price":1}"#)
            .limit("3"),
    )
    .await
    .unwrap();

    let prices: Vec<Option<&Node>> = result
        .documents
        .iter()
        .map(|doc| doc.fields().get("price"))
        .collect();
    assert_eq!(prices, vec![Some(&Node::Int32(10)), Some(&Node::Int32(15))]);
}

#[tokio::test]
async fn test_pipeline_supersedes_find_options() {
    let (_, conn) = seeded();

    let result = run(
        &conn,
        RawQuery::new()
            .filter(r#"{"label":"nothing matches"}"#)
            .limit("1")
            .pipeline(
                "[{'$match': {'price': 15}}, {'$project': {'label': 1, 'price': 1}}, \
                 {'$group': {'_id': '$label', 'total': {'$sum': '$price'}}}]",
            ),
    )
    .await
    .unwrap();

    let rows: Vec<_> = result.documents.iter().map(|d| d.to_document()).collect();
    assert_eq!(
        rows,
        vec![
            doc! { "_id": "tutu", "total": 15 },
            doc! { "_id": "tata", "total": 15 },
        ]
    );
}

#[tokio::test]
async fn test_result_ids_keep_their_type() {
    let (_, conn) = seeded();

    let result = run(&conn, RawQuery::new().filter("{_id: 4}")).await.unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.documents[0].id_bson(), Some(Bson::Int32(4)));
}

#[tokio::test]
async fn test_store_rejection_is_a_query_error() {
    let (_, conn) = seeded();

    let err = run(&conn, RawQuery::new().filter(r#"{"price": {"$near": 3}}"#))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Query);
    assert!(err.to_string().contains("$near"));
}

#[tokio::test]
async fn test_lost_connection_is_a_connection_error() {
    let (memory, conn) = seeded();
    memory
        .store()
        .fail_with(InjectedFailure::Connection("connection reset".to_string()));

    let err = run(&conn, RawQuery::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("connection reset"));
}

#[tokio::test]
async fn test_empty_collection_gives_empty_result() {
    let conn: Arc<dyn Connection> = Arc::new(MemoryConnection::new());

    let result = run(&conn, RawQuery::new()).await.unwrap();

    assert!(result.is_empty());
    assert!(!result.has_documents());
}
