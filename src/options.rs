//! Store configuration.
//!
//! `StoreOptions` deserializes from the key names used by existing
//! deployments (`db`, `collection`, `expirationTime`, ...). Live handles
//! cannot be expressed in JSON and are attached with the `with_*` setters.

use crate::backend::{ExistingConnection, FrameworkConnection};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 27017;
pub const DEFAULT_COLLECTION: &str = "sessions";
/// Two weeks.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 14);

pub const ENV_URL: &str = "SESSION_MONGO_URL";
pub const ENV_COLLECTION: &str = "SESSION_MONGO_COLLECTION";

#[derive(Clone, Default, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default, deny_unknown_fields)]
pub struct StoreOptions {
    /// Database name.
    pub db: Option<String>,
    /// Collection name. Defaults to `sessions`.
    pub collection: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<bool>,
    pub auto_reconnect: Option<bool>,
    /// TTL in seconds. Wins over `defaultExpirationTimeMs`.
    #[serde(rename = "expirationTime")]
    pub expiration_time_secs: Option<u64>,
    /// TTL in milliseconds.
    #[serde(rename = "defaultExpirationTimeMs")]
    pub default_expiration_time_ms: Option<u64>,
    /// `scheme://[user:pass@]host[:port]/db[/collection]`
    ///
    /// Query parameters (`authSource`, `replicaSet`, timeouts, ...) are not
    /// forwarded to the driver; only the parts above are read.
    pub url: Option<String>,
    #[serde(skip)]
    #[cfg_attr(feature = "schema", schemars(skip))]
    pub connection: Option<ExistingConnection>,
    #[serde(skip)]
    #[cfg_attr(feature = "schema", schemars(skip))]
    pub framework: Option<Arc<dyn FrameworkConnection>>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options pointing at a database by name, everything else defaulted.
    pub fn database(db: impl Into<String>) -> Self {
        Self::new().with_db(db)
    }

    /// Options built from a connection URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new().with_url(url)
    }

    /// Reads `SESSION_MONGO_URL` and, if set, `SESSION_MONGO_COLLECTION`.
    /// Returns `None` when no URL is configured.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(ENV_URL).ok().filter(|v| !v.is_empty())?;
        let mut options = Self::from_url(url);
        if let Ok(collection) = std::env::var(ENV_COLLECTION) {
            if !collection.is_empty() {
                options.collection = Some(collection);
            }
        }
        Some(options)
    }

    /// Parses options from a JSON document.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = Some(ssl);
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = Some(auto_reconnect);
        self
    }

    /// Sets the TTL. Sub-second precision is dropped when the index is built.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expiration_time_secs = Some(ttl.as_secs());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_connection(mut self, connection: ExistingConnection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_framework(mut self, framework: Arc<dyn FrameworkConnection>) -> Self {
        self.framework = Some(framework);
        self
    }

    /// TTL taken from `expirationTime`, then `defaultExpirationTimeMs`.
    pub fn ttl(&self) -> Option<Duration> {
        self.expiration_time_secs
            .map(Duration::from_secs)
            .or_else(|| self.default_expiration_time_ms.map(Duration::from_millis))
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("db", &self.db)
            .field("collection", &self.collection)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssl", &self.ssl)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("expiration_time_secs", &self.expiration_time_secs)
            .field("default_expiration_time_ms", &self.default_expiration_time_ms)
            .field("url", &self.url.as_ref().map(|_| "<set>"))
            .field("connection", &self.connection)
            .field("framework", &self.framework.as_ref().map(|_| "<set>"))
            .finish()
    }
}
