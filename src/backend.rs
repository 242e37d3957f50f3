//! Seam between the session store and the document database driver.
//!
//! The store only needs a handful of calls: open a connection, authenticate,
//! address a collection, and run single-document find/upsert/delete plus an
//! expiry-index bootstrap. Backends implement these traits; the driver itself
//! stays a black box.

use crate::error::BackendError;
use crate::model::{ConnectionDescriptor, ConnectionParams, Credentials, SessionRecord};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type BackendResult<T> = Result<T, BackendError>;

/// Opens connections described by a resolved [`ConnectionDescriptor`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> BackendResult<Arc<dyn Connection>>;
}

/// An open connection to a database.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Verifies the supplied credentials against the connection's database.
    async fn authenticate(&self, credentials: &Credentials) -> BackendResult<()>;

    /// Addresses a collection within the connection's database.
    async fn collection(&self, name: &str) -> BackendResult<Arc<dyn SessionCollection>>;

    /// Releases the connection. Closing twice is not an error.
    async fn close(&self) -> BackendResult<()>;
}

/// Single collection holding session records.
#[async_trait]
pub trait SessionCollection: Send + Sync + 'static {
    async fn find(&self, id: &str) -> BackendResult<Option<SessionRecord>>;

    /// Replaces the document with the same `_id`, inserting it when absent.
    async fn upsert(&self, record: SessionRecord) -> BackendResult<()>;

    async fn delete(&self, id: &str) -> BackendResult<()>;

    /// Ensures an expiry index on `field`. Repeating the call with the same
    /// arguments leaves the collection unchanged.
    async fn ensure_ttl_index(&self, field: &str, expire_after: Duration) -> BackendResult<()>;
}

/// Connection managed by a host framework (an ORM or application container).
///
/// Only its parameters are used; a fresh connection is opened from them.
pub trait FrameworkConnection: Send + Sync + 'static {
    fn params(&self) -> ConnectionParams;
}

impl FrameworkConnection for ConnectionParams {
    fn params(&self) -> ConnectionParams {
        self.clone()
    }
}

/// An already-open connection supplied by the caller together with the
/// parameters it was opened with. The store reuses it and never closes it.
#[derive(Clone)]
pub struct ExistingConnection {
    pub params: ConnectionParams,
    pub connection: Arc<dyn Connection>,
}

impl ExistingConnection {
    pub fn new(params: ConnectionParams, connection: Arc<dyn Connection>) -> Self {
        Self { params, connection }
    }
}

impl fmt::Debug for ExistingConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExistingConnection")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
