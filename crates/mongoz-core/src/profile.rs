//! Connection profiles
//!
//! A [`ConnectionProfile`] describes how to reach one server: endpoints,
//! credentials, TLS, authentication mechanism and read preference. Profiles
//! are immutable snapshots once handed to the engine; every operation takes
//! one by reference and never mutates it.

use crate::{MongozError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default port of a MongoDB server
pub const DEFAULT_PORT: u16 = 27017;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SERVER_SELECTION_TIMEOUT_MS: u64 = 10_000;

/// Authentication mechanism used when credentials are present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMechanism {
    /// Let the driver negotiate the mechanism with the server
    #[default]
    Default,
    /// Legacy challenge-response (MONGODB-CR)
    MongoDbCr,
    /// Salted challenge-response (SCRAM-SHA-1)
    ScramSha1,
}

impl AuthMechanism {
    /// Value of the `authMechanism` URI option, `None` for driver negotiation
    pub fn uri_value(&self) -> Option<&'static str> {
        match self {
            AuthMechanism::Default => None,
            AuthMechanism::MongoDbCr => Some("MONGODB-CR"),
            AuthMechanism::ScramSha1 => Some("SCRAM-SHA-1"),
        }
    }
}

impl FromStr for AuthMechanism {
    type Err = MongozError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "DEFAULT" => Ok(AuthMechanism::Default),
            "MONGODB-CR" | "MONGODB_CR" => Ok(AuthMechanism::MongoDbCr),
            "SCRAM-SHA-1" | "SCRAM_SHA_1" => Ok(AuthMechanism::ScramSha1),
            other => Err(MongozError::validation(
                "auth_mechanism",
                format!("unknown authentication mechanism '{}'", other),
            )),
        }
    }
}

/// Replica role allowed to serve reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreference {
    pub const ALL: [ReadPreference; 5] = [
        ReadPreference::Primary,
        ReadPreference::PrimaryPreferred,
        ReadPreference::Secondary,
        ReadPreference::SecondaryPreferred,
        ReadPreference::Nearest,
    ];

    /// Name used by the `readPreference` URI option
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPreference::Primary => "primary",
            ReadPreference::PrimaryPreferred => "primaryPreferred",
            ReadPreference::Secondary => "secondary",
            ReadPreference::SecondaryPreferred => "secondaryPreferred",
            ReadPreference::Nearest => "nearest",
        }
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadPreference {
    type Err = MongozError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(ReadPreference::Primary);
        }
        ReadPreference::ALL
            .into_iter()
            .find(|pref| pref.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                MongozError::validation(
                    "read_preference",
                    format!("unknown read preference '{}'", trimmed),
                )
            })
    }
}

/// A validated `host:port` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Validate a list of `host:port` endpoints.
///
/// At least one endpoint is required. Each one must split into exactly a host
/// part and a positive numeric port; the error message names the offending
/// endpoint.
pub fn validate_endpoints<S: AsRef<str>>(endpoints: &[S]) -> Result<Vec<ServerAddress>> {
    if endpoints.is_empty() {
        return Err(MongozError::validation("endpoints", "URL(s) should be set"));
    }

    endpoints
        .iter()
        .map(|endpoint| parse_endpoint(endpoint.as_ref()))
        .collect()
}

fn parse_endpoint(endpoint: &str) -> Result<ServerAddress> {
    let parts: Vec<&str> = endpoint.split(':').collect();
    let [host, port] = parts.as_slice() else {
        return Err(MongozError::validation(
            "endpoints",
            format!(
                "URL '{}' format is incorrect. It should be 'host:port'",
                endpoint
            ),
        ));
    };
    if host.trim().is_empty() {
        return Err(MongozError::validation(
            "endpoints",
            format!(
                "URL '{}' format is incorrect. It should be 'host:port'",
                endpoint
            ),
        ));
    }

    match port.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(ServerAddress {
            host: host.trim().to_string(),
            port,
        }),
        _ => Err(MongozError::validation(
            "endpoints",
            format!(
                "Port in the URL '{}' is incorrect. It should be a number",
                endpoint
            ),
        )),
    }
}

/// Trim a free-text value and map blank input to `None`
pub fn non_blank(value: impl AsRef<str>) -> Option<String> {
    let trimmed = value.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// Passwords keep surrounding whitespace; only fully empty input becomes unset.
fn non_empty_secret(value: impl AsRef<str>) -> Option<String> {
    let value = value.as_ref();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn deserialize_non_blank<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.and_then(non_blank))
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.and_then(non_empty_secret))
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_server_selection_timeout_ms() -> u64 {
    DEFAULT_SERVER_SELECTION_TIMEOUT_MS
}

/// Description of how to reach one database server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Stable identifier used by profile storage
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Display name
    #[serde(default, deserialize_with = "deserialize_non_blank")]
    pub label: Option<String>,

    /// Ordered `host:port` endpoints
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub auth_mechanism: AuthMechanism,

    #[serde(default, deserialize_with = "deserialize_non_blank")]
    pub username: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<String>,

    /// Database the credentials are defined in
    #[serde(default, deserialize_with = "deserialize_non_blank")]
    pub auth_database: Option<String>,

    /// Restricts operations to one database when the user lacks cluster-wide access
    #[serde(default, deserialize_with = "deserialize_non_blank")]
    pub user_database: Option<String>,

    #[serde(default)]
    pub read_preference: ReadPreference,

    /// Exact names or glob patterns hidden from server listings
    #[serde(default)]
    pub collections_to_ignore: Vec<String>,

    /// Passed through to an external shell, never interpreted here
    #[serde(default, deserialize_with = "deserialize_non_blank")]
    pub shell_working_dir: Option<String>,

    /// Passed through to an external shell, never interpreted here
    #[serde(default, deserialize_with = "deserialize_non_blank")]
    pub shell_arguments: Option<String>,

    #[serde(default)]
    pub auto_connect: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_server_selection_timeout_ms")]
    pub server_selection_timeout_ms: u64,
}

/// Hashable projection of every connection-relevant profile field.
///
/// Two profiles with the same identity can share one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileIdentity {
    endpoints: Vec<String>,
    tls: bool,
    auth_mechanism: AuthMechanism,
    username: Option<String>,
    password: Option<String>,
    auth_database: Option<String>,
    user_database: Option<String>,
    read_preference: ReadPreference,
    connect_timeout_ms: u64,
    server_selection_timeout_ms: u64,
}

impl ConnectionProfile {
    /// Create a profile for the given endpoints with default settings
    pub fn new<S: Into<String>>(endpoints: impl IntoIterator<Item = S>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: None,
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            tls: false,
            auth_mechanism: AuthMechanism::Default,
            username: None,
            password: None,
            auth_database: None,
            user_database: None,
            read_preference: ReadPreference::Primary,
            collections_to_ignore: Vec::new(),
            shell_working_dir: None,
            shell_arguments: None,
            auto_connect: false,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            server_selection_timeout_ms: DEFAULT_SERVER_SELECTION_TIMEOUT_MS,
        }
    }

    /// Profile for a single local server on the default port
    pub fn localhost() -> Self {
        Self::new([format!("localhost:{}", DEFAULT_PORT)])
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = non_blank(label);
        self
    }

    /// Set credentials; blank input leaves the field unset
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = non_blank(username);
        self.password = non_empty_secret(password);
        self
    }

    pub fn with_auth_database(mut self, database: &str) -> Self {
        self.auth_database = non_blank(database);
        self
    }

    pub fn with_user_database(mut self, database: &str) -> Self {
        self.user_database = non_blank(database);
        self
    }

    pub fn with_auth_mechanism(mut self, mechanism: AuthMechanism) -> Self {
        self.auth_mechanism = mechanism;
        self
    }

    pub fn with_read_preference(mut self, preference: ReadPreference) -> Self {
        self.read_preference = preference;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_ignored_collections<S: Into<String>>(
        mut self,
        patterns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.collections_to_ignore = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeouts_ms(mut self, connect: u64, server_selection: u64) -> Self {
        self.connect_timeout_ms = connect;
        self.server_selection_timeout_ms = server_selection;
        self
    }

    /// Label if set, otherwise the endpoint list
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.endpoints.join(","))
    }

    /// Validated endpoints
    pub fn server_addresses(&self) -> Result<Vec<ServerAddress>> {
        validate_endpoints(&self.endpoints)
    }

    /// Check everything that can be checked without a server
    pub fn validate(&self) -> Result<()> {
        self.server_addresses()?;
        if self.password.is_some() && self.username.is_none() {
            return Err(MongozError::validation(
                "username",
                "a password is set but the username is empty",
            ));
        }
        self.ignore_matcher()?;
        Ok(())
    }

    pub fn identity(&self) -> ProfileIdentity {
        ProfileIdentity {
            endpoints: self.endpoints.clone(),
            tls: self.tls,
            auth_mechanism: self.auth_mechanism,
            username: self.username.clone(),
            password: self.password.clone(),
            auth_database: self.auth_database.clone(),
            user_database: self.user_database.clone(),
            read_preference: self.read_preference,
            connect_timeout_ms: self.connect_timeout_ms,
            server_selection_timeout_ms: self.server_selection_timeout_ms,
        }
    }

    /// Compile the collections-to-ignore patterns
    pub fn ignore_matcher(&self) -> Result<IgnoreMatcher> {
        IgnoreMatcher::new(&self.collections_to_ignore)
    }

    /// Whether a collection name is hidden by the ignore list
    pub fn is_ignored(&self, collection: &str) -> bool {
        match self.ignore_matcher() {
            Ok(matcher) => matcher.is_match(collection),
            Err(e) => {
                tracing::warn!(error = %e, "invalid collections-to-ignore pattern");
                self.collections_to_ignore.iter().any(|c| c == collection)
            }
        }
    }
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self::localhost()
    }
}

/// Compiled collections-to-ignore list: exact names plus glob patterns
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    exact: Vec<String>,
    globs: GlobSet,
}

impl IgnoreMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut exact = Vec::new();
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            exact.push(pattern.to_string());
            let glob = Glob::new(pattern).map_err(|e| {
                MongozError::validation(
                    "collections_to_ignore",
                    format!("invalid pattern '{}': {}", pattern, e),
                )
            })?;
            builder.add(glob);
        }
        let globs = builder.build().map_err(|e| {
            MongozError::validation("collections_to_ignore", e.to_string())
        })?;
        Ok(Self { exact, globs })
    }

    pub fn is_match(&self, collection: &str) -> bool {
        self.exact.iter().any(|name| name == collection) || self.globs.is_match(collection)
    }
}

/// Raw text form of a profile, as gathered by a configuration form.
///
/// Lists are comma-joined. [`ProfileFields::into_profile`] performs the
/// normalization and validation the form would otherwise have to repeat.
#[derive(Debug, Clone, Default)]
pub struct ProfileFields {
    pub label: String,
    /// Comma-joined `host:port` list
    pub server_urls: String,
    pub username: String,
    pub password: String,
    pub auth_database: String,
    pub user_database: String,
    /// `""`, `"MONGODB-CR"` or `"SCRAM-SHA-1"`
    pub auth_mechanism: String,
    pub tls: bool,
    pub read_preference: String,
    /// Comma-joined names or globs
    pub collections_to_ignore: String,
    pub shell_working_dir: String,
    pub shell_arguments: String,
    pub auto_connect: bool,
}

impl ProfileFields {
    /// Normalize and validate into a profile
    pub fn into_profile(self) -> Result<ConnectionProfile> {
        let endpoints: Vec<String> = self
            .server_urls
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let collections_to_ignore = self
            .collections_to_ignore
            .split(',')
            .filter_map(non_blank)
            .collect::<Vec<_>>();

        let profile = ConnectionProfile {
            label: non_blank(&self.label),
            tls: self.tls,
            auth_mechanism: self.auth_mechanism.parse()?,
            username: non_blank(&self.username),
            password: non_empty_secret(&self.password),
            auth_database: non_blank(&self.auth_database),
            user_database: non_blank(&self.user_database),
            read_preference: self.read_preference.parse()?,
            collections_to_ignore,
            shell_working_dir: non_blank(&self.shell_working_dir),
            shell_arguments: non_blank(&self.shell_arguments),
            auto_connect: self.auto_connect,
            ..ConnectionProfile::new(endpoints)
        };

        profile.validate()?;
        Ok(profile)
    }
}

impl From<&ConnectionProfile> for ProfileFields {
    fn from(profile: &ConnectionProfile) -> Self {
        Self {
            label: profile.label.clone().unwrap_or_default(),
            server_urls: profile.endpoints.join(","),
            username: profile.username.clone().unwrap_or_default(),
            password: profile.password.clone().unwrap_or_default(),
            auth_database: profile.auth_database.clone().unwrap_or_default(),
            user_database: profile.user_database.clone().unwrap_or_default(),
            auth_mechanism: profile
                .auth_mechanism
                .uri_value()
                .unwrap_or_default()
                .to_string(),
            tls: profile.tls,
            read_preference: profile.read_preference.as_str().to_string(),
            collections_to_ignore: profile.collections_to_ignore.join(","),
            shell_working_dir: profile.shell_working_dir.clone().unwrap_or_default(),
            shell_arguments: profile.shell_arguments.clone().unwrap_or_default(),
            auto_connect: profile.auto_connect,
        }
    }
}
