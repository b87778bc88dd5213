//! Connection manager for handling active connections

use bson::Bson;
use mongoz_core::{
    CollectionRef, CollectionResult, Connection, ConnectionProfile, DatabaseDriver, DatabaseInfo,
    DocumentTree, MongozError, ProfileIdentity, QueryOptions, Result, ServerInfo,
};
use mongoz_driver_mongodb::MongoDbDriver;
use mongoz_query::{DocumentMutator, QueryExecutor};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use crate::runtime::build_runtime;
use crate::sinks::{LoadingGuard, LoadingSink, ResultSink};

/// Blocking entry point for every server operation.
///
/// Each method blocks the calling thread until the work is done. Calling
/// one from inside another Tokio runtime panics.
///
/// Connections are opened on first use and cached by
/// [`ProfileIdentity`], so sequential operations under the same profile
/// share one connection.
pub struct ConnectionManager {
    driver: Arc<dyn DatabaseDriver>,

    /// Active connections
    active: RwLock<HashMap<ProfileIdentity, Arc<dyn Connection>>>,

    executor: QueryExecutor,
    mutator: DocumentMutator,

    /// Overrides the profile-derived `test_connection` deadline
    test_timeout: Option<Duration>,

    runtime: Runtime,
}

impl ConnectionManager {
    /// Create a manager backed by the MongoDB driver
    pub fn new() -> Result<Self> {
        Self::with_driver(Arc::new(MongoDbDriver::new()))
    }

    /// Create a manager backed by any driver
    pub fn with_driver(driver: Arc<dyn DatabaseDriver>) -> Result<Self> {
        tracing::debug!(driver = driver.id(), "creating connection manager");
        Ok(Self {
            driver,
            active: RwLock::new(HashMap::new()),
            executor: QueryExecutor::new(),
            mutator: DocumentMutator::new(),
            test_timeout: None,
            runtime: build_runtime()?,
        })
    }

    /// Bound `test_connection` by `timeout` instead of the profile's
    /// connect plus server-selection timeouts
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = Some(timeout);
        self
    }

    /// Get the driver
    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    /// Open a transient connection, ping it, and close it.
    ///
    /// The connection cache is never touched. The connection is closed on
    /// success, on failure and when the deadline passes.
    #[tracing::instrument(skip(self, profile), fields(profile = %profile.display_name()))]
    pub fn test_connection(&self, profile: &ConnectionProfile) -> Result<()> {
        tracing::debug!("testing connection");
        profile.validate()?;

        let timeout = self.test_timeout.unwrap_or_else(|| {
            Duration::from_millis(
                profile
                    .connect_timeout_ms
                    .saturating_add(profile.server_selection_timeout_ms),
            )
        });

        self.runtime.block_on(async {
            let connection =
                match tokio::time::timeout(timeout, self.driver.connect(profile)).await {
                    Ok(Ok(connection)) => connection,
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "test connection failed");
                        return Err(e);
                    }
                    Err(_) => return Err(timed_out(timeout)),
                };

            let outcome = match tokio::time::timeout(timeout, connection.ping()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(timed_out(timeout)),
            };
            if let Err(e) = connection.close().await {
                tracing::warn!(error = %e, "failed to close test connection");
            }
            if let Err(e) = &outcome {
                tracing::error!(error = %e, "test connection failed");
            }
            outcome
        })
    }

    /// Cached connection for `profile`, opening one if needed
    #[tracing::instrument(skip(self, profile), fields(profile = %profile.display_name()))]
    pub fn connect(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Connection>> {
        let identity = profile.identity();
        if let Some(conn) = self.active.read().get(&identity)
            && !conn.is_closed()
        {
            return Ok(conn.clone());
        }

        profile.validate()?;
        tracing::info!("opening connection");
        let conn = self
            .runtime
            .block_on(self.driver.connect(profile))
            .map_err(|e| {
                tracing::error!(error = %e, "failed to connect");
                e
            })?;

        let mut active = self.active.write();
        // Another thread may have connected first; keep its connection
        if let Some(existing) = active.get(&identity).filter(|c| !c.is_closed()).cloned() {
            drop(active);
            if let Err(e) = self.runtime.block_on(conn.close()) {
                tracing::warn!(error = %e, "failed to close redundant connection");
            }
            return Ok(existing);
        }
        active.insert(identity, conn.clone());
        tracing::info!("connection established");
        Ok(conn)
    }

    /// Check if a profile has a live cached connection
    pub fn is_connected(&self, profile: &ConnectionProfile) -> bool {
        self.active
            .read()
            .get(&profile.identity())
            .is_some_and(|conn| !conn.is_closed())
    }

    /// Drop and close the cached connection for `profile`
    #[tracing::instrument(skip(self, profile), fields(profile = %profile.display_name()))]
    pub fn disconnect(&self, profile: &ConnectionProfile) -> Result<()> {
        let conn = self.active.write().remove(&profile.identity());
        if let Some(conn) = conn {
            tracing::info!("disconnecting");
            self.runtime.block_on(conn.close())?;
        }
        Ok(())
    }

    /// Close every cached connection
    pub fn disconnect_all(&self) -> Result<()> {
        let connections: Vec<_> = self.active.write().drain().map(|(_, conn)| conn).collect();
        tracing::debug!(count = connections.len(), "disconnecting all connections");
        self.runtime.block_on(async {
            for conn in connections {
                conn.close().await?;
            }
            Ok(())
        })
    }

    /// Run `options` against `collection`
    #[tracing::instrument(skip(self, profile, collection, options), fields(collection = %collection))]
    pub fn load_collection_values(
        &self,
        profile: &ConnectionProfile,
        collection: &CollectionRef,
        options: &QueryOptions,
    ) -> Result<CollectionResult> {
        let conn = self.connect(profile)?;
        self.runtime
            .block_on(self.executor.execute(&conn, collection, options))
    }

    /// Fetch one document by `_id`
    pub fn find_one(
        &self,
        profile: &ConnectionProfile,
        collection: &CollectionRef,
        id: &Bson,
    ) -> Result<DocumentTree> {
        let conn = self.connect(profile)?;
        self.runtime
            .block_on(self.mutator.find_one(&conn, collection, id))
    }

    /// Replace the stored document with the same `_id` as `document`
    pub fn update(
        &self,
        profile: &ConnectionProfile,
        collection: &CollectionRef,
        document: &DocumentTree,
    ) -> Result<()> {
        let conn = self.connect(profile)?;
        self.runtime
            .block_on(self.mutator.update(&conn, collection, document))
    }

    /// Delete the document whose `_id` equals `id`
    pub fn delete(
        &self,
        profile: &ConnectionProfile,
        collection: &CollectionRef,
        id: &Bson,
    ) -> Result<()> {
        let conn = self.connect(profile)?;
        self.runtime
            .block_on(self.mutator.delete(&conn, collection, id))
    }

    /// Update, then re-run `options` and return the fresh result
    pub fn update_and_reload(
        &self,
        profile: &ConnectionProfile,
        collection: &CollectionRef,
        document: &DocumentTree,
        options: &QueryOptions,
    ) -> Result<CollectionResult> {
        self.update(profile, collection, document)?;
        self.load_collection_values(profile, collection, options)
    }

    /// Delete, then re-run `options` and return the fresh result
    pub fn delete_and_reload(
        &self,
        profile: &ConnectionProfile,
        collection: &CollectionRef,
        id: &Bson,
        options: &QueryOptions,
    ) -> Result<CollectionResult> {
        self.delete(profile, collection, id)?;
        self.load_collection_values(profile, collection, options)
    }

    /// Databases and their collections, sorted by name.
    ///
    /// With a user database only that database is listed. Collections on
    /// the profile's ignore list are left out.
    #[tracing::instrument(skip(self, profile), fields(profile = %profile.display_name()))]
    pub fn load_server(&self, profile: &ConnectionProfile) -> Result<ServerInfo> {
        let conn = self.connect(profile)?;
        let ignored = profile.ignore_matcher()?;

        let info = self.runtime.block_on(async {
            let mut names = match &profile.user_database {
                Some(database) => vec![database.clone()],
                None => conn.list_database_names().await?,
            };
            names.sort();

            let mut databases = Vec::with_capacity(names.len());
            for name in names {
                let mut collections: Vec<String> = conn
                    .list_collection_names(&name)
                    .await?
                    .into_iter()
                    .filter(|collection| !ignored.is_match(collection))
                    .collect();
                collections.sort();
                databases.push(DatabaseInfo { name, collections });
            }
            Ok::<_, MongozError>(ServerInfo { databases })
        })?;

        tracing::debug!(databases = info.databases.len(), "server loaded");
        Ok(info)
    }

    /// Load `options` and hand the outcome to `results`.
    ///
    /// `loading` hears `loading_started` first and `loading_finished` last,
    /// after the result or error has been delivered.
    pub fn run_query(
        &self,
        profile: &ConnectionProfile,
        collection: &CollectionRef,
        options: &QueryOptions,
        loading: &dyn LoadingSink,
        results: &dyn ResultSink,
    ) {
        let _guard = LoadingGuard::start(loading);
        results.deliver(self.load_collection_values(profile, collection, options));
    }
}

fn timed_out(timeout: Duration) -> MongozError {
    tracing::error!(timeout_ms = timeout.as_millis() as u64, "test connection timed out");
    MongozError::Timeout(format!(
        "No answer from the server within {} ms",
        timeout.as_millis()
    ))
}

#[cfg(test)]
mod tests;
