//! MongoDB driver implementation

use crate::MongoDbConnection;
use async_trait::async_trait;
use mongodb::error::{Error as DriverError, ErrorKind as DriverErrorKind};
use mongodb::{Client, options::ClientOptions};
use mongoz_core::{
    Connection, ConnectionProfile, DatabaseDriver, MongozError, ReadPreference, Result,
    profile::DEFAULT_PORT,
};
use std::sync::Arc;
use std::time::Duration;

const APP_NAME: &str = "mongoz";

/// MongoDB database driver
pub struct MongoDbDriver;

impl MongoDbDriver {
    /// Create a new MongoDB driver instance
    pub fn new() -> Self {
        tracing::debug!("MongoDB driver initialized");
        Self
    }

    /// Client options for a profile: the parsed connection string plus timeouts
    pub async fn client_options(&self, profile: &ConnectionProfile) -> Result<ClientOptions> {
        let connection_string = self.build_connection_string(profile)?;

        let mut options = ClientOptions::parse(&connection_string)
            .await
            .map_err(|e| {
                MongozError::Configuration(format!("Failed to parse MongoDB options: {}", e))
            })?;
        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(Duration::from_millis(profile.connect_timeout_ms));
        options.server_selection_timeout =
            Some(Duration::from_millis(profile.server_selection_timeout_ms));
        Ok(options)
    }
}

impl Default for MongoDbDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for MongoDbDriver {
    fn id(&self) -> &'static str {
        "mongodb"
    }

    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn default_port(&self) -> Option<u16> {
        Some(DEFAULT_PORT)
    }

    #[tracing::instrument(skip(self, profile), fields(endpoints = %profile.endpoints.join(",")))]
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Connection>> {
        tracing::debug!("connecting to MongoDB");
        profile.validate()?;

        let options = self.client_options(profile).await?;
        let client = Client::with_options(options).map_err(|e| {
            tracing::error!(error = %e, "failed to create MongoDB client");
            classify_error(e)
        })?;

        let connection = MongoDbConnection::new(client, profile.user_database.clone());

        // Client creation is lazy; ping so an unreachable server fails here
        if let Err(e) = connection.ping().await {
            tracing::error!(error = %e, "failed to connect to MongoDB");
            let _ = connection.close().await;
            return Err(e);
        }

        Ok(Arc::new(connection))
    }

    fn build_connection_string(&self, profile: &ConnectionProfile) -> Result<String> {
        let hosts = profile
            .server_addresses()?
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut conn_str = String::from("mongodb://");

        // Add credentials if present
        if let Some(user) = &profile.username {
            conn_str.push_str(&urlencoding::encode(user));
            if let Some(pass) = &profile.password {
                conn_str.push(':');
                conn_str.push_str(&urlencoding::encode(pass));
            }
            conn_str.push('@');
        }

        conn_str.push_str(&hosts);
        conn_str.push('/');
        if let Some(database) = &profile.user_database {
            conn_str.push_str(&urlencoding::encode(database));
        }

        // Add options
        let mut options = Vec::new();
        if profile.username.is_some() {
            if let Some(auth_db) = &profile.auth_database {
                options.push(format!("authSource={}", urlencoding::encode(auth_db)));
            }
            if let Some(mechanism) = profile.auth_mechanism.uri_value() {
                options.push(format!("authMechanism={}", mechanism));
            }
        }
        if profile.read_preference != ReadPreference::Primary {
            options.push(format!("readPreference={}", profile.read_preference));
        }
        if profile.tls {
            options.push("tls=true".to_string());
        }

        if !options.is_empty() {
            conn_str.push('?');
            conn_str.push_str(&options.join("&"));
        }

        Ok(conn_str)
    }
}

/// Map a driver error onto the mongoz taxonomy.
///
/// Transport, server-selection, authentication, DNS, TLS and pool failures
/// are connection errors; everything else was rejected by the server.
pub fn classify_error(error: DriverError) -> MongozError {
    match *error.kind {
        DriverErrorKind::Io(_)
        | DriverErrorKind::ServerSelection { .. }
        | DriverErrorKind::Authentication { .. }
        | DriverErrorKind::DnsResolve { .. }
        | DriverErrorKind::ConnectionPoolCleared { .. }
        | DriverErrorKind::InvalidTlsConfig { .. } => MongozError::Connection(error.to_string()),
        _ => MongozError::Query(error.to_string()),
    }
}

/// Percent-encoding for connection string components
pub(crate) mod urlencoding {
    pub fn encode(s: &str) -> String {
        let mut result = String::with_capacity(s.len() * 3);
        for b in s.bytes() {
            match b {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    result.push(b as char)
                }
                _ => result.push_str(&format!("%{:02X}", b)),
            }
        }
        result
    }
}
