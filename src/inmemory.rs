//! In-process document backend.
//!
//! Mirrors the pieces of the database the store relies on: named databases
//! and collections, password checks, single-document upsert/find/delete and an
//! expiry index swept in the background. The sweep runs lazily on access at a
//! fixed interval, so like the real thing an expired record may linger until
//! the next sweep.

use crate::backend::{BackendResult, Connection, Connector, SessionCollection};
use crate::error::{BackendError, BackendErrorKind};
use crate::model::{ConnectionDescriptor, Credentials, SessionRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Default gap between expiry sweeps, matching MongoDB's TTL monitor.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
struct TtlIndex {
    field: String,
    expire_after: Duration,
}

struct CollectionState {
    records: DashMap<String, SessionRecord>,
    ttl_index: Mutex<Option<TtlIndex>>,
    last_sweep: Mutex<OffsetDateTime>,
    sweep_interval: Duration,
}

impl CollectionState {
    fn new(sweep_interval: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl_index: Mutex::new(None),
            last_sweep: Mutex::new(OffsetDateTime::now_utc()),
            sweep_interval,
        }
    }

    fn maybe_sweep(&self, now: OffsetDateTime) {
        let mut guard = self.last_sweep.lock();
        let interval = time::Duration::try_from(self.sweep_interval).unwrap_or(time::Duration::MAX);
        if now - *guard < interval {
            return;
        }

        if let Some(index) = self.ttl_index.lock().clone() {
            let before = self.records.len();
            self.records
                .retain(|_, record| !record.is_expired(index.expire_after, now));
            let swept = before.saturating_sub(self.records.len());
            if swept > 0 {
                tracing::debug!(swept, "expiry sweep removed records");
            }
        }

        *guard = now;
    }
}

/// Shared state standing in for a database server.
pub struct InMemoryServer {
    databases: DashMap<String, Arc<DashMap<String, Arc<CollectionState>>>>,
    users: DashMap<(String, String), String>,
    sweep_interval: Duration,
    reachable: AtomicBool,
    opened: AtomicUsize,
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl InMemoryServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Builds a server whose expiry sweep runs at most once per `interval`.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        Self {
            databases: DashMap::new(),
            users: DashMap::new(),
            sweep_interval: interval,
            reachable: AtomicBool::new(true),
            opened: AtomicUsize::new(0),
        }
    }

    /// Registers a user allowed to authenticate against `database`.
    pub fn add_user(&self, database: &str, username: &str, password: &str) {
        self.users
            .insert((database.to_string(), username.to_string()), password.to_string());
    }

    /// Makes subsequent connection attempts fail as if the server were down.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Expire-after duration of the TTL index on a collection, if one exists.
    pub fn ttl_index(&self, database: &str, collection: &str) -> Option<(String, Duration)> {
        let db = self.databases.get(database)?;
        let state = db.get(collection)?;
        let index = state.ttl_index.lock().clone()?;
        Some((index.field, index.expire_after))
    }

    /// Reads a record directly, bypassing the expiry sweep.
    pub fn raw_record(&self, database: &str, collection: &str, id: &str) -> Option<SessionRecord> {
        let db = self.databases.get(database)?;
        let state = db.get(collection)?;
        let record = state.records.get(id).map(|r| r.value().clone());
        record
    }

    /// Copies every stored record of a collection, bypassing the expiry sweep.
    pub fn records(&self, database: &str, collection: &str) -> HashMap<String, SessionRecord> {
        let Some(db) = self.databases.get(database) else {
            return HashMap::new();
        };
        let Some(state) = db.get(collection).map(|state| state.clone()) else {
            return HashMap::new();
        };
        state
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn collection_state(&self, database: &str, collection: &str) -> Arc<CollectionState> {
        let db = self
            .databases
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone();
        let state = db
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(CollectionState::new(self.sweep_interval)))
            .clone();
        state
    }

    fn check_password(&self, database: &str, credentials: &Credentials) -> bool {
        self.users
            .get(&(database.to_string(), credentials.username.clone()))
            .map(|stored| *stored == credentials.password)
            .unwrap_or(false)
    }
}

/// Connector that opens connections to an [`InMemoryServer`].
#[derive(Clone)]
pub struct InMemoryConnector {
    server: Arc<InMemoryServer>,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new(InMemoryServer::new())
    }
}

impl InMemoryConnector {
    pub fn new(server: Arc<InMemoryServer>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<InMemoryServer> {
        &self.server
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> BackendResult<Arc<dyn Connection>> {
        if !self.server.reachable.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable(format!(
                "failed to connect to {}:{}",
                descriptor.host, descriptor.port
            )));
        }
        self.server.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryConnection::new(
            self.server.clone(),
            descriptor.database.clone(),
        )))
    }
}

/// Open connection to one database of an [`InMemoryServer`].
pub struct InMemoryConnection {
    server: Arc<InMemoryServer>,
    database: String,
    closed: Arc<AtomicBool>,
}

impl InMemoryConnection {
    pub fn new(server: Arc<InMemoryServer>, database: impl Into<String>) -> Self {
        Self {
            server,
            database: database.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.is_closed() {
            return Err(BackendError::closed());
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn authenticate(&self, credentials: &Credentials) -> BackendResult<()> {
        self.ensure_open()?;
        if self.server.check_password(&self.database, credentials) {
            Ok(())
        } else {
            Err(BackendError::authentication("auth fails"))
        }
    }

    async fn collection(&self, name: &str) -> BackendResult<Arc<dyn SessionCollection>> {
        self.ensure_open()?;
        if name.is_empty() || name.contains('$') {
            return Err(BackendError::new(
                BackendErrorKind::Command,
                format!("invalid collection name: {name:?}"),
            ));
        }
        Ok(Arc::new(InMemoryCollection {
            state: self.server.collection_state(&self.database, name),
            closed: self.closed.clone(),
        }))
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct InMemoryCollection {
    state: Arc<CollectionState>,
    closed: Arc<AtomicBool>,
}

impl InMemoryCollection {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::closed());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionCollection for InMemoryCollection {
    async fn find(&self, id: &str) -> BackendResult<Option<SessionRecord>> {
        self.ensure_open()?;
        self.state.maybe_sweep(OffsetDateTime::now_utc());
        Ok(self.state.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, record: SessionRecord) -> BackendResult<()> {
        self.ensure_open()?;
        self.state.maybe_sweep(OffsetDateTime::now_utc());
        self.state.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> BackendResult<()> {
        self.ensure_open()?;
        self.state.records.remove(id);
        Ok(())
    }

    async fn ensure_ttl_index(&self, field: &str, expire_after: Duration) -> BackendResult<()> {
        self.ensure_open()?;
        let wanted = TtlIndex {
            field: field.to_string(),
            expire_after: Duration::from_secs(expire_after.as_secs()),
        };
        let mut guard = self.state.ttl_index.lock();
        match guard.as_ref() {
            Some(existing) if *existing == wanted => Ok(()),
            Some(existing) => Err(BackendError::new(
                BackendErrorKind::Command,
                format!(
                    "index on {} already exists with expireAfterSeconds {}",
                    existing.field,
                    existing.expire_after.as_secs()
                ),
            )),
            None => {
                *guard = Some(wanted);
                Ok(())
            }
        }
    }
}
