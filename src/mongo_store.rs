//! MongoDB backend built on the official `mongodb` driver.
//!
//! Constructors take a resolved descriptor; no driver types leak into the
//! rest of the crate apart from [`MongoConnection::from_client`], which wraps
//! a client the caller already holds.

use crate::backend::{BackendResult, Connection, Connector, SessionCollection};
use crate::error::{BackendError, BackendErrorKind};
use crate::model::{ConnectionDescriptor, ConnectionParams, Credentials, SessionRecord};
use async_trait::async_trait;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, Credential, IndexOptions, ServerAddress, Tls, TlsOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Server error code for rejected SASL credentials.
const AUTHENTICATION_FAILED: i32 = 18;

pub(crate) fn mongo_error(err: mongodb::error::Error) -> BackendError {
    let kind = match err.kind.as_ref() {
        ErrorKind::Authentication { .. } => BackendErrorKind::Authentication,
        ErrorKind::Command(command) if command.code == AUTHENTICATION_FAILED => {
            BackendErrorKind::Authentication
        }
        ErrorKind::Command(_) | ErrorKind::Write(_) | ErrorKind::InvalidArgument { .. } => {
            BackendErrorKind::Command
        }
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            BackendErrorKind::Serialization
        }
        ErrorKind::Shutdown => BackendErrorKind::Closed,
        _ => BackendErrorKind::Unavailable,
    };
    BackendError::new(kind, err.to_string())
}

/// Wire shape of a session document.
#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(rename = "_id")]
    id: String,
    blob: String,
    #[serde(rename = "updatedAt")]
    updated_at: BsonDateTime,
}

impl From<SessionRecord> for SessionDocument {
    fn from(record: SessionRecord) -> Self {
        let millis = record.updated_at.unix_timestamp_nanos() / 1_000_000;
        Self {
            id: record.id,
            blob: record.blob,
            updated_at: BsonDateTime::from_millis(millis as i64),
        }
    }
}

impl TryFrom<SessionDocument> for SessionRecord {
    type Error = BackendError;

    fn try_from(doc: SessionDocument) -> Result<Self, Self::Error> {
        let nanos = i128::from(doc.updated_at.timestamp_millis()) * 1_000_000;
        let updated_at = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|err| BackendError::new(BackendErrorKind::Serialization, err.to_string()))?;
        Ok(Self {
            id: doc.id,
            blob: doc.blob,
            updated_at,
        })
    }
}

fn client_options(params: &ConnectionParams) -> ClientOptions {
    let mut options = ClientOptions::builder()
        .hosts(vec![ServerAddress::Tcp {
            host: params.host.clone(),
            port: Some(params.port),
        }])
        .build();
    if let Some(creds) = params.credentials.as_ref() {
        let mut credential = Credential::default();
        credential.username = Some(creds.username.clone());
        credential.password = Some(creds.password.clone());
        credential.source = Some(params.database.clone());
        options.credential = Some(credential);
    }
    if params.tls {
        options.tls = Some(Tls::Enabled(TlsOptions::default()));
    }
    options
}

/// Options for checking `supplied` against the server, or `None` when the
/// connection was opened with exactly these credentials and its own
/// handshake already checks them.
fn verification_options(params: &ConnectionParams, supplied: &Credentials) -> Option<ClientOptions> {
    if params.credentials.as_ref() == Some(supplied) {
        return None;
    }
    let mut params = params.clone();
    params.credentials = Some(supplied.clone());
    Some(client_options(&params))
}

async fn ping(database: &Database) -> BackendResult<()> {
    database
        .run_command(doc! { "ping": 1 })
        .await
        .map(|_| ())
        .map_err(mongo_error)
}

/// Opens MongoDB clients from resolved descriptors.
#[derive(Clone, Debug, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> BackendResult<Arc<dyn Connection>> {
        if descriptor.auto_reconnect {
            tracing::debug!("the driver always re-establishes dropped connections");
        }
        let params = descriptor.params();
        let client = Client::with_options(client_options(&params)).map_err(mongo_error)?;
        let connection = MongoConnection::from_client(client, params);
        if descriptor.credentials.is_none() {
            // With credentials the handshake happens during authentication.
            ping(&connection.database).await?;
        }
        Ok(Arc::new(connection))
    }
}

/// A MongoDB client bound to one database.
pub struct MongoConnection {
    client: Mutex<Option<Client>>,
    database: Database,
    params: ConnectionParams,
}

impl MongoConnection {
    /// Wraps an existing client. `params` must describe how the client was
    /// built: credentials other than `params.credentials` are verified with a
    /// separate short-lived client against the same host.
    pub fn from_client(client: Client, params: ConnectionParams) -> Self {
        let database = client.database(&params.database);
        Self {
            client: Mutex::new(Some(client)),
            database,
            params,
        }
    }
}

#[async_trait]
impl Connection for MongoConnection {
    async fn authenticate(&self, credentials: &Credentials) -> BackendResult<()> {
        if self.client.lock().is_none() {
            return Err(BackendError::closed());
        }
        let Some(options) = verification_options(&self.params, credentials) else {
            // The client carries these credentials; its first command runs
            // the authentication handshake.
            return ping(&self.database).await;
        };
        tracing::debug!(username = %credentials.username, "verifying credentials with a separate client");
        let client = Client::with_options(options).map_err(mongo_error)?;
        let result = ping(&client.database(&self.params.database)).await;
        client.shutdown().await;
        result
    }

    async fn collection(&self, name: &str) -> BackendResult<Arc<dyn SessionCollection>> {
        if self.client.lock().is_none() {
            return Err(BackendError::closed());
        }
        Ok(Arc::new(MongoCollection {
            inner: self.database.collection::<SessionDocument>(name),
        }))
    }

    async fn close(&self) -> BackendResult<()> {
        let client = self.client.lock().take();
        if let Some(client) = client {
            client.shutdown().await;
        }
        Ok(())
    }
}

struct MongoCollection {
    inner: Collection<SessionDocument>,
}

#[async_trait]
impl SessionCollection for MongoCollection {
    async fn find(&self, id: &str) -> BackendResult<Option<SessionRecord>> {
        let found = self
            .inner
            .find_one(doc! { "_id": id })
            .await
            .map_err(mongo_error)?;
        found.map(SessionRecord::try_from).transpose()
    }

    async fn upsert(&self, record: SessionRecord) -> BackendResult<()> {
        let filter = doc! { "_id": record.id.as_str() };
        self.inner
            .replace_one(filter, SessionDocument::from(record))
            .upsert(true)
            .await
            .map(|_| ())
            .map_err(mongo_error)
    }

    async fn delete(&self, id: &str) -> BackendResult<()> {
        self.inner
            .delete_one(doc! { "_id": id })
            .await
            .map(|_| ())
            .map_err(mongo_error)
    }

    async fn ensure_ttl_index(&self, field: &str, expire_after: Duration) -> BackendResult<()> {
        let mut keys = Document::new();
        keys.insert(field, 1);
        let options = IndexOptions::builder().expire_after(expire_after).build();
        let model = IndexModel::builder().keys(keys).options(options).build();
        self.inner
            .create_index(model)
            .await
            .map(|_| ())
            .map_err(mongo_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "db.example".into(),
            port: 27018,
            database: "app".into(),
            collection: "sessions".into(),
            credentials: Some(Credentials::new("svc", "pw")),
            ttl: Duration::from_secs(60),
            tls: true,
            auto_reconnect: false,
            borrowed: false,
        }
    }

    #[test]
    fn client_options_follow_descriptor() {
        let options = client_options(&descriptor().params());
        assert_eq!(
            options.hosts,
            vec![ServerAddress::Tcp {
                host: "db.example".into(),
                port: Some(27018),
            }]
        );
        let credential = options.credential.expect("credential");
        assert_eq!(credential.username.as_deref(), Some("svc"));
        assert_eq!(credential.source.as_deref(), Some("app"));
        assert!(matches!(options.tls, Some(Tls::Enabled(_))));
    }

    #[test]
    fn own_credentials_need_no_separate_check() {
        let params = descriptor().params();
        assert!(verification_options(&params, &Credentials::new("svc", "pw")).is_none());
    }

    #[test]
    fn other_credentials_are_checked_against_the_same_server() {
        let mut params = descriptor().params();
        params.credentials = None;

        let options = verification_options(&params, &Credentials::new("admin", "wrong"))
            .expect("credentials differ from the client's");
        assert_eq!(
            options.hosts,
            vec![ServerAddress::Tcp {
                host: "db.example".into(),
                port: Some(27018),
            }]
        );
        let credential = options.credential.expect("credential");
        assert_eq!(credential.username.as_deref(), Some("admin"));
        assert_eq!(credential.password.as_deref(), Some("wrong"));
        assert_eq!(credential.source.as_deref(), Some("app"));

        let params = descriptor().params();
        let options = verification_options(&params, &Credentials::new("svc", "other"))
            .expect("password differs");
        assert_eq!(
            options.credential.and_then(|c| c.password).as_deref(),
            Some("other")
        );
    }

    #[test]
    fn document_timestamps_keep_millisecond_precision() {
        let record = SessionRecord::fresh("abc", "blob");
        let back = SessionRecord::try_from(SessionDocument::from(record.clone())).expect("convert");
        assert_eq!(back.id, "abc");
        assert_eq!(back.blob, "blob");
        let drift = record.updated_at - back.updated_at;
        assert!(drift >= time::Duration::ZERO && drift < time::Duration::milliseconds(1));
    }
}
