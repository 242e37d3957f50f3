use std::fmt;

/// Result alias used across the crate.
pub type SessionResult<T> = Result<T, SessionError>;

/// Broad classification of a failure reported by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The server could not be reached or the transport failed.
    Unavailable,
    /// Credentials were rejected.
    Authentication,
    /// The server rejected the command.
    Command,
    /// A document could not be encoded or decoded.
    Serialization,
    /// The handle was already closed.
    Closed,
}

/// Error surfaced by a [`crate::backend::Connector`], connection or collection.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Authentication, message)
    }

    pub fn closed() -> Self {
        Self::new(BackendErrorKind::Closed, "connection closed")
    }
}

/// Store-creation step that failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectPhase {
    Open,
    Authenticate { username: String },
    Collection { name: String },
    Index { collection: String },
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectPhase::Open => f.write_str("opening db"),
            ConnectPhase::Authenticate { username } => write!(f, "authenticating with {username}"),
            ConnectPhase::Collection { name } => write!(f, "opening collection {name}"),
            ConnectPhase::Index { collection } => write!(f, "creating index on {collection}"),
        }
    }
}

/// Errors returned by store creation and session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Options are missing or malformed. Raised before any connection attempt.
    #[error("{0}")]
    Configuration(String),

    /// A store-creation step failed.
    #[error("Error {phase}: {source}")]
    Connection {
        phase: ConnectPhase,
        #[source]
        source: BackendError,
    },

    /// `load`, `save` or `remove` failed at the transport or database level.
    #[error("Storage error: {0}")]
    Storage(#[source] BackendError),
}

impl SessionError {
    /// Returns the failing creation phase, if this is a connection error.
    pub fn phase(&self) -> Option<&ConnectPhase> {
        match self {
            SessionError::Connection { phase, .. } => Some(phase),
            _ => None,
        }
    }
}

pub(crate) fn missing_option(name: &str) -> SessionError {
    SessionError::Configuration(format!("Missing option: {name}"))
}

pub(crate) fn invalid_option(name: &str, reason: impl fmt::Display) -> SessionError {
    SessionError::Configuration(format!("Invalid option {name}: {reason}"))
}

pub(crate) fn connect_error(phase: ConnectPhase) -> impl FnOnce(BackendError) -> SessionError {
    move |source| SessionError::Connection { phase, source }
}

/// Maps a failure from the authenticate step. Only rejected credentials are
/// tagged as authentication; anything else means the server was never reached.
pub(crate) fn authenticate_error(username: &str) -> impl FnOnce(BackendError) -> SessionError + '_ {
    move |source| {
        let phase = match source.kind {
            BackendErrorKind::Authentication => ConnectPhase::Authenticate {
                username: username.to_string(),
            },
            _ => ConnectPhase::Open,
        };
        SessionError::Connection { phase, source }
    }
}

pub(crate) fn storage_error(err: BackendError) -> SessionError {
    SessionError::Storage(err)
}
