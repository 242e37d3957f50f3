#![forbid(unsafe_code)]

pub mod backend;
pub mod error;
pub mod inmemory;
pub mod model;
#[cfg(feature = "mongo")]
pub mod mongo_store;
pub mod options;
pub mod registry;
pub mod resolver;
pub mod store;

use std::sync::Arc;

pub use error::{BackendError, BackendErrorKind, ConnectPhase, SessionError, SessionResult};
pub use model::{ConnectionDescriptor, ConnectionParams, Credentials, SessionRecord};
pub use options::StoreOptions;
pub use registry::ConnectionRegistry;
pub use store::{CollectionStore, SessionStore, SessionStoreBuilder};

/// Backend selection for [`create_session_store`].
#[derive(Debug)]
pub enum SessionBackendConfig {
    /// Fresh in-process backend; `StoreOptions` still decide database,
    /// collection and TTL.
    InMemory(StoreOptions),
    #[cfg(feature = "mongo")]
    Mongo(StoreOptions),
}

/// Creates a session store for the configured backend.
pub async fn create_session_store(config: SessionBackendConfig) -> SessionResult<CollectionStore> {
    match config {
        SessionBackendConfig::InMemory(options) => {
            let connector = Arc::new(inmemory::InMemoryConnector::default());
            SessionStoreBuilder::new(connector).create(options).await
        }
        #[cfg(feature = "mongo")]
        SessionBackendConfig::Mongo(options) => {
            let connector = Arc::new(mongo_store::MongoConnector::new());
            SessionStoreBuilder::new(connector).create(options).await
        }
    }
}
