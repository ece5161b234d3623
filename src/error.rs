//! Error types
//!
//! One enum per concern. Hub-side routing failures are scoped to the single
//! call that caused them; nothing here is meant to tear down a connection or
//! the process on its own.

use crate::types::SessionId;
use thiserror::Error;

/// Failures raised by a [`crate::store::Storage`] implementation
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {name}")]
    Conflict { entity: &'static str, name: String },

    #[error("invalid {entity} name: '{name}'")]
    InvalidName { entity: &'static str, name: String },

    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Malformed or illegal frame traffic
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame name must not be empty")]
    EmptyName,

    #[error("malformed payload on channel '{channel}': {source}")]
    Malformed {
        channel: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported channel '{0}'")]
    UnknownChannel(String),
}

/// Agent config blob does not satisfy its declared schema
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("config field '{field}' expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("config field '{0}' declared twice")]
    DuplicateField(String),
}

/// Failures of a single hub operation
#[derive(Debug, Error)]
pub enum HubError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),
}

/// Client/server transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection rejected by hub")]
    Rejected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("bind failed: {0}")]
    Bind(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,
}

/// Scheduler registration failures
#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}

/// Agent runtime failures
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("hub rejected the agent token")]
    Authentication,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("config sync failed: {0}")]
    ConfigSync(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("not connected to hub")]
    Disconnected,
}

/// Supervisor failures (worker crashes are not errors)
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process '{0}' already exists")]
    DuplicateProcess(String),

    #[error("failed to spawn process '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stop process '{name}': {source}")]
    Stop {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error for configuration, bootstrap and CLI paths
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    StorageError(#[from] StorageError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
