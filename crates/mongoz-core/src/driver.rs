//! Database driver trait definition

use crate::{Connection, ConnectionProfile, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Opens connections for profiles
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "mongodb")
    fn id(&self) -> &'static str {
        self.name()
    }

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Default connection port
    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Create a new connection
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Connection>>;

    /// Open a connection, ping, and close it again whatever the outcome
    async fn test_connection(&self, profile: &ConnectionProfile) -> Result<()> {
        let connection = self.connect(profile).await?;
        let outcome = connection.ping().await;
        if let Err(e) = connection.close().await {
            tracing::warn!(error = %e, "failed to close test connection");
        }
        outcome
    }

    /// Build the connection string for a profile
    fn build_connection_string(&self, profile: &ConnectionProfile) -> Result<String>;
}
