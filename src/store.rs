use crate::backend::{Connection, Connector, SessionCollection};
use crate::error::{authenticate_error, connect_error, storage_error, ConnectPhase, SessionResult};
use crate::model::{ConnectionDescriptor, SessionRecord, UPDATED_AT_FIELD};
use crate::options::StoreOptions;
use crate::registry::ConnectionRegistry;
use crate::resolver;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Session persistence interface used by session middleware.
///
/// Blobs are opaque: the caller owns the serialization format. Expiry is left
/// to the backing database, so an expired session may still load until the
/// database sweeps it.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Fetches the blob stored under `session_id`, if any.
    async fn load(&self, session_id: &str) -> SessionResult<Option<String>>;

    /// Stores `blob` under `session_id`, replacing any previous value and
    /// refreshing its expiry clock.
    async fn save(&self, session_id: &str, blob: &str) -> SessionResult<()>;

    /// Deletes the session. Removing an unknown id succeeds.
    async fn remove(&self, session_id: &str) -> SessionResult<()>;
}

/// Session store over one collection of a document database.
#[derive(Clone)]
pub struct CollectionStore {
    collection: Arc<dyn SessionCollection>,
    // Keeps the connection alive for as long as any clone of the store.
    owned_connection: Option<Arc<dyn Connection>>,
    collection_name: String,
    ttl: Duration,
}

impl CollectionStore {
    /// Wraps a collection directly, without connection bookkeeping.
    pub fn new(collection: Arc<dyn SessionCollection>, collection_name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            collection,
            owned_connection: None,
            collection_name: collection_name.into(),
            ttl,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionStore")
            .field("collection", &self.collection_name)
            .field("ttl", &self.ttl)
            .field("owns_connection", &self.owned_connection.is_some())
            .finish()
    }
}

/// Leading characters of a session id for log correlation. Ids shorter than
/// twice the shown prefix are omitted entirely.
fn id_prefix(session_id: &str) -> &str {
    const SHOWN: usize = 6;
    match session_id.char_indices().nth(SHOWN * 2) {
        Some(_) => session_id
            .char_indices()
            .nth(SHOWN)
            .map_or("", |(end, _)| &session_id[..end]),
        None => "",
    }
}

#[async_trait]
impl SessionStore for CollectionStore {
    async fn load(&self, session_id: &str) -> SessionResult<Option<String>> {
        tracing::debug!(session = id_prefix(session_id), collection = %self.collection_name, "loading session");
        let record = self.collection.find(session_id).await.map_err(storage_error)?;
        Ok(record.map(|record| record.blob))
    }

    async fn save(&self, session_id: &str, blob: &str) -> SessionResult<()> {
        tracing::debug!(session = id_prefix(session_id), collection = %self.collection_name, "saving session");
        let record = SessionRecord::fresh(session_id, blob);
        self.collection.upsert(record).await.map_err(storage_error)
    }

    async fn remove(&self, session_id: &str) -> SessionResult<()> {
        tracing::debug!(session = id_prefix(session_id), collection = %self.collection_name, "removing session");
        self.collection.delete(session_id).await.map_err(storage_error)
    }
}

/// Runs the creation sequence: resolve, open, authenticate, address the
/// collection, ensure the expiry index, register.
pub struct SessionStoreBuilder {
    connector: Arc<dyn Connector>,
    registry: Option<Arc<ConnectionRegistry>>,
}

impl SessionStoreBuilder {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            registry: None,
        }
    }

    /// Records every connection this builder opens in `registry`.
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn create(&self, options: StoreOptions) -> SessionResult<CollectionStore> {
        let descriptor = resolver::resolve(&options)?;
        tracing::debug!(
            host = %descriptor.host,
            port = descriptor.port,
            database = %descriptor.database,
            collection = %descriptor.collection,
            borrowed = descriptor.borrowed,
            "resolved session store options"
        );

        let connection = match options.connection.as_ref().filter(|_| descriptor.borrowed) {
            Some(existing) => existing.connection.clone(),
            None => self
                .connector
                .connect(&descriptor)
                .await
                .map_err(connect_error(ConnectPhase::Open))?,
        };

        match Self::prepare(&connection, &descriptor).await {
            Ok(collection) => {
                if !descriptor.borrowed {
                    if let Some(registry) = self.registry.as_ref() {
                        registry.register(&connection);
                    }
                }
                tracing::info!(
                    database = %descriptor.database,
                    collection = %descriptor.collection,
                    ttl_secs = descriptor.ttl_secs(),
                    "session store ready"
                );
                Ok(CollectionStore {
                    collection,
                    owned_connection: (!descriptor.borrowed).then_some(connection),
                    collection_name: descriptor.collection,
                    ttl: descriptor.ttl,
                })
            }
            Err(err) => {
                if !descriptor.borrowed {
                    if let Err(close_err) = connection.close().await {
                        tracing::warn!(error = %close_err, "failed to close connection after setup error");
                    }
                }
                Err(err)
            }
        }
    }

    async fn prepare(
        connection: &Arc<dyn Connection>,
        descriptor: &ConnectionDescriptor,
    ) -> SessionResult<Arc<dyn SessionCollection>> {
        if let Some(credentials) = descriptor.credentials.as_ref() {
            tracing::debug!(username = %credentials.username, "authenticating");
            connection
                .authenticate(credentials)
                .await
                .map_err(authenticate_error(&credentials.username))?;
        }

        let collection = connection
            .collection(&descriptor.collection)
            .await
            .map_err(connect_error(ConnectPhase::Collection {
                name: descriptor.collection.clone(),
            }))?;

        collection
            .ensure_ttl_index(UPDATED_AT_FIELD, Duration::from_secs(descriptor.ttl_secs()))
            .await
            .map_err(connect_error(ConnectPhase::Index {
                collection: descriptor.collection.clone(),
            }))?;

        Ok(collection)
    }
}
