//! Tracks connections opened by store builders so an owner (an application
//! shutdown hook or a test harness) can close them together.

use crate::backend::Connection;
use crate::error::BackendError;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Registry of opened connections.
///
/// Holds weak references: stores own their connections, the registry only
/// knows about them. Dropped connections are skipped at close time.
#[derive(Default)]
pub struct ConnectionRegistry {
    handles: Mutex<Vec<Weak<dyn Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, connection: &Arc<dyn Connection>) {
        self.handles.lock().push(Arc::downgrade(connection));
    }

    /// Number of registered handles that are still alive.
    pub fn live(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|handle| handle.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Closes every live registered connection, one after another, and empties
    /// the registry. Every handle is attempted; the first failure is returned.
    pub async fn close_all(&self) -> Result<(), BackendError> {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        let mut first_error = None;
        let mut closed = 0usize;

        for handle in handles {
            let Some(connection) = handle.upgrade() else {
                continue;
            };
            match connection.close().await {
                Ok(()) => closed += 1,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to close session store connection");
                    first_error.get_or_insert(err);
                }
            }
        }

        tracing::debug!(closed, "closed registered connections");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
