use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

/// Field watched by the expiry index.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Persisted session document: `{ _id, blob, updatedAt }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub blob: String,
    #[serde(rename = "updatedAt", with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SessionRecord {
    /// Builds a record stamped with the current time.
    pub fn fresh(id: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            blob: blob.into(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns true once `updated_at + ttl` lies in the past.
    pub fn is_expired(&self, ttl: Duration, now: OffsetDateTime) -> bool {
        let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
        match self.updated_at.checked_add(ttl) {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parameters embedded in an already-established connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub credentials: Option<Credentials>,
    pub tls: bool,
    pub auto_reconnect: bool,
}

/// Normalized result of resolving [`crate::options::StoreOptions`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub collection: String,
    pub credentials: Option<Credentials>,
    pub ttl: Duration,
    pub tls: bool,
    pub auto_reconnect: bool,
    /// True when an existing open handle is reused instead of opening a new one.
    pub borrowed: bool,
}

impl ConnectionDescriptor {
    /// TTL in whole seconds, as written to the expiry index.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Connection-level part of the descriptor.
    pub fn params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            credentials: self.credentials.clone(),
            tls: self.tls,
            auto_reconnect: self.auto_reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_external_field_names() {
        let record = SessionRecord::fresh("abc", "payload");
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["_id"], "abc");
        assert_eq!(value["blob"], "payload");
        assert!(value.get("updatedAt").is_some());
    }

    #[test]
    fn expiry_is_relative_to_updated_at() {
        let record = SessionRecord::fresh("abc", "payload");
        let later = record.updated_at + time::Duration::seconds(10);
        assert!(record.is_expired(Duration::from_secs(5), later));
        assert!(!record.is_expired(Duration::from_secs(60), later));
        assert!(record.is_expired(Duration::ZERO, record.updated_at));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
