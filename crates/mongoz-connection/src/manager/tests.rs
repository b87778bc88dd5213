//! Connection manager tests against the in-memory driver
//!
//! Tests are organized by category:
//! - Connection lifecycle (cache, disconnect, test_connection)
//! - Loading and point operations
//! - Server listing
//! - Sinks

use super::*;
use mongoz_core::{ErrorKind, Node, NodePath, RawQuery};
use mongoz_query::test_helpers::{
    InjectedFailure, MemoryDriver, dummy_collection, dummy_documents,
};
use pretty_assertions::assert_eq;
use std::cell::RefCell;

fn seeded() -> (Arc<MemoryDriver>, ConnectionManager) {
    let driver = Arc::new(MemoryDriver::new());
    driver.store().insert(&dummy_collection(), dummy_documents());
    let manager = ConnectionManager::with_driver(driver.clone()).unwrap();
    (driver, manager)
}

fn options(raw: RawQuery) -> QueryOptions {
    QueryOptions::parse(&raw).unwrap()
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[test]
fn test_manager_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ConnectionManager>();
}

#[test]
fn test_connections_are_cached_by_identity() {
    let (driver, manager) = seeded();
    let profile = ConnectionProfile::localhost();

    let first = manager.connect(&profile).unwrap();
    let relabeled = manager.connect(&profile.clone().with_label("renamed")).unwrap();

    assert!(Arc::ptr_eq(&first, &relabeled));
    assert_eq!(driver.connect_count(), 1);

    manager
        .connect(&ConnectionProfile::new(["localhost:27018"]))
        .unwrap();
    assert_eq!(driver.connect_count(), 2);
}

#[test]
fn test_invalid_profile_never_reaches_the_driver() {
    let (driver, manager) = seeded();

    let err = manager
        .connect(&ConnectionProfile::new(["badhost"]))
        .err().expect("expected an error");

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("'badhost'"));
    assert_eq!(driver.connect_count(), 0);
}

#[test]
fn test_refused_connection_is_not_cached() {
    let (driver, manager) = seeded();
    let profile = ConnectionProfile::localhost();
    driver.refuse_connections(InjectedFailure::Connection(
        "No servers available".to_string(),
    ));

    let err = manager.connect(&profile).err().expect("expected an error");

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("No servers available"));
    assert!(!manager.is_connected(&profile));
}

#[test]
fn test_disconnect_closes_and_next_use_reconnects() {
    let (driver, manager) = seeded();
    let profile = ConnectionProfile::localhost();
    manager.connect(&profile).unwrap();

    manager.disconnect(&profile).unwrap();

    assert!(!manager.is_connected(&profile));
    assert!(driver.opened()[0].is_closed());

    manager.connect(&profile).unwrap();
    assert_eq!(driver.connect_count(), 2);
    assert!(manager.is_connected(&profile));
}

#[test]
fn test_disconnect_all() {
    let (driver, manager) = seeded();
    manager.connect(&ConnectionProfile::localhost()).unwrap();
    manager
        .connect(&ConnectionProfile::new(["localhost:27018"]))
        .unwrap();

    manager.disconnect_all().unwrap();

    assert!(driver.opened().iter().all(|conn| conn.is_closed()));
}

#[test]
fn test_test_connection_closes_and_leaves_cache_alone() {
    let (driver, manager) = seeded();
    let profile = ConnectionProfile::localhost();

    manager.test_connection(&profile).unwrap();

    assert_eq!(driver.opened().len(), 1);
    assert!(driver.opened()[0].is_closed());
    assert!(!manager.is_connected(&profile));
}

#[test]
fn test_test_connection_failure_still_closes() {
    let (driver, manager) = seeded();
    driver
        .store()
        .fail_with(InjectedFailure::Connection("Authentication failed".to_string()));

    let err = manager
        .test_connection(&ConnectionProfile::localhost())
        .err().expect("expected an error");

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("Authentication failed"));
    assert!(driver.opened()[0].is_closed());
}

#[test]
fn test_test_connection_times_out() {
    let driver = Arc::new(MemoryDriver::new());
    driver.delay_connections(Duration::from_millis(500));
    let manager = ConnectionManager::with_driver(driver.clone())
        .unwrap()
        .with_test_timeout(Duration::from_millis(20));

    let err = manager
        .test_connection(&ConnectionProfile::localhost())
        .err().expect("expected an error");

    assert!(matches!(err, MongozError::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(driver.opened().is_empty());
}

// ============================================================================
// Loading and point operations
// ============================================================================

#[test]
fn test_load_limit_three_of_five() {
    let (_, manager) = seeded();

    let result = manager
        .load_collection_values(
            &ConnectionProfile::localhost(),
            &dummy_collection(),
            &options(RawQuery::new().filter("{}").limit("3")),
        )
        .unwrap();

    assert_eq!(result.len(), 3);
    let ids: Vec<_> = result.documents.iter().map(|d| d.id_bson()).collect();
    assert_eq!(
        ids,
        vec![Some(Bson::Int32(1)), Some(Bson::Int32(2)), Some(Bson::Int32(3))]
    );
}

#[test]
fn test_load_with_projection() {
    let (_, manager) = seeded();

    let result = manager
        .load_collection_values(
            &ConnectionProfile::localhost(),
            &dummy_collection(),
            &options(
                RawQuery::new()
                    .filter(r#"{"label":"tata"}"#)
                    .projection(r#"{"label":1,"_id":0}"#)
                    .limit("3"),
            ),
        )
        .unwrap();

    assert_eq!(result.len(), 2);
    for tree in &result.documents {
        assert_eq!(tree.fields().len(), 1);
        assert_eq!(tree.fields().get("label"), Some(&Node::String("tata".to_string())));
    }
}

#[test]
fn test_update_and_reload_observes_the_edit() {
    let (_, manager) = seeded();
    let profile = ConnectionProfile::localhost();
    let coll = dummy_collection();
    let query = options(RawQuery::new().filter("{'label': 'tete'}"));

    let mut tree = manager.find_one(&profile, &coll, &Bson::Int32(4)).unwrap();
    tree.set_scalar(&NodePath::root().key("price"), Node::Int32(25))
        .unwrap();
    let reloaded = manager
        .update_and_reload(&profile, &coll, &tree, &query)
        .unwrap();

    assert_eq!(reloaded.len(), 1);
    assert_eq!(
        reloaded.documents[0].fields().get("price"),
        Some(&Node::Int32(25))
    );
}

#[test]
fn test_delete_and_reload_removes_the_document() {
    let (_, manager) = seeded();
    let profile = ConnectionProfile::localhost();
    let coll = dummy_collection();
    let query = options(RawQuery::new().filter("{'label': 'tete'}"));

    let reloaded = manager
        .delete_and_reload(&profile, &coll, &Bson::Int32(4), &query)
        .unwrap();

    assert!(reloaded.is_empty());
    let err = manager.find_one(&profile, &coll, &Bson::Int32(4)).err().expect("expected an error");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_delete_missing_document_is_not_found() {
    let (_, manager) = seeded();

    let err = manager
        .delete(
            &ConnectionProfile::localhost(),
            &dummy_collection(),
            &Bson::Int32(99),
        )
        .err().expect("expected an error");

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_loads_from_several_threads() {
    let (_, manager) = seeded();
    let manager = Arc::new(manager);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            std::thread::spawn(move || {
                manager
                    .load_collection_values(
                        &ConnectionProfile::localhost(),
                        &dummy_collection(),
                        &QueryOptions::new(),
                    )
                    .map(|result| result.len())
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 5);
    }
}

// ============================================================================
// Server listing
// ============================================================================

fn server_driver() -> Arc<MemoryDriver> {
    let driver = Arc::new(MemoryDriver::new());
    let store = driver.store();
    for (database, name) in [
        ("test", "dummyCollection"),
        ("test", "system.profile"),
        ("test", "archive"),
        ("admin", "users"),
        ("inventory", "items"),
    ] {
        store.insert(&CollectionRef::new(database, name), Vec::new());
    }
    driver
}

#[test]
fn test_load_server_sorts_and_ignores() {
    let driver = server_driver();
    let manager = ConnectionManager::with_driver(driver).unwrap();
    let profile = ConnectionProfile::localhost().with_ignored_collections(["system.*"]);

    let info = manager.load_server(&profile).unwrap();

    let names: Vec<&str> = info.databases.iter().map(|db| db.name.as_str()).collect();
    assert_eq!(names, vec!["admin", "inventory", "test"]);
    assert_eq!(
        info.database("test").map(|db| db.collections.clone()),
        Some(vec!["archive".to_string(), "dummyCollection".to_string()])
    );
}

#[test]
fn test_load_server_with_user_database() {
    let driver = server_driver();
    let manager = ConnectionManager::with_driver(driver).unwrap();
    let profile = ConnectionProfile::localhost().with_user_database("inventory");

    let info = manager.load_server(&profile).unwrap();

    assert_eq!(
        info.databases,
        vec![DatabaseInfo {
            name: "inventory".to_string(),
            collections: vec!["items".to_string()],
        }]
    );
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<String>>,
}

impl LoadingSink for Recorder {
    fn loading_started(&self) {
        self.events.borrow_mut().push("started".to_string());
    }

    fn loading_finished(&self) {
        self.events.borrow_mut().push("finished".to_string());
    }
}

impl ResultSink for Recorder {
    fn deliver(&self, result: Result<CollectionResult>) {
        let event = match result {
            Ok(result) => format!("documents:{}", result.len()),
            Err(e) => format!("error:{}", e.kind().as_str()),
        };
        self.events.borrow_mut().push(event);
    }
}

#[test]
fn test_run_query_notifies_in_order() {
    let (_, manager) = seeded();
    let recorder = Recorder::default();

    manager.run_query(
        &ConnectionProfile::localhost(),
        &dummy_collection(),
        &QueryOptions::new(),
        &recorder,
        &recorder,
    );

    assert_eq!(
        recorder.events.into_inner(),
        vec!["started", "documents:5", "finished"]
    );
}

#[test]
fn test_run_query_delivers_errors_and_still_finishes() {
    let (driver, manager) = seeded();
    driver
        .store()
        .fail_with(InjectedFailure::Query("bad query".to_string()));
    let recorder = Recorder::default();

    manager.run_query(
        &ConnectionProfile::localhost(),
        &dummy_collection(),
        &QueryOptions::new(),
        &recorder,
        &recorder,
    );

    assert_eq!(
        recorder.events.into_inner(),
        vec!["started".to_string(), format!("error:{}", ErrorKind::Query.as_str()), "finished".to_string()]
    );
}

#[test]
fn test_closure_result_sink() {
    let (_, manager) = seeded();
    let delivered = RefCell::new(None);

    manager.run_query(
        &ConnectionProfile::localhost(),
        &dummy_collection(),
        &options(RawQuery::new().limit("2")),
        &crate::NoLoadingSink,
        &|result: Result<CollectionResult>| {
            *delivered.borrow_mut() = Some(result.map(|r| r.len()).ok());
        },
    );

    assert_eq!(delivered.into_inner(), Some(Some(2)));
}
