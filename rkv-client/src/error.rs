//! # Client Errors
//!
//! Purpose: One error type for every facade call, classified so the retry
//! executor and the failure policy can decide what to do without string
//! matching at each call site.
//!
//! ## Classes
//! - **Transient**: transport failures, timeouts, pool exhaustion. Retried.
//! - **Rejection**: the server refused the command. Surfaced immediately.
//! - **Caller errors**: serialization and invalid arguments. Never retried,
//!   never defaulted.

use std::fmt;
use std::time::Duration;

use deadpool_redis::PoolError;
use redis::{ErrorKind, RedisError};
use rkv_common::RkvError;
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Which batching mechanism failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Transaction,
    Pipeline,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKind::Transaction => f.write_str("transaction"),
            BatchKind::Pipeline => f.write_str("pipeline"),
        }
    }
}

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while talking to the store.
    #[error("transport error: {0}")]
    Transport(String),

    /// One attempt exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// No pooled connection became free in time.
    #[error("connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// The pool was closed underneath the caller.
    #[error("connection pool closed")]
    PoolClosed,

    /// The server rejected the command (wrong type, bad argument, ...).
    #[error("command rejected: {0}")]
    Command(String),

    /// The target is a read-only replica.
    #[error("store is read-only: {0}")]
    ReadOnly(String),

    /// The caller passed arguments the client refuses to send.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A value could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Settings were invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The underlying pool or cluster client could not be built.
    #[error("failed to set up connection: {0}")]
    Setup(String),

    /// A transaction or pipeline failed as a whole.
    #[error("{kind} failed: {message}")]
    Batch { kind: BatchKind, message: String },
}

impl ClientError {
    /// Returns true for failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::Timeout(_)
                | ClientError::PoolExhausted(_)
                | ClientError::PoolClosed
        )
    }

    /// Returns true when a read-style call may hide this error behind a safe
    /// default.
    pub fn is_defaultable(&self) -> bool {
        self.is_transient() || matches!(self, ClientError::Command(_))
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ClientError::InvalidArgument(message.into())
    }
}

impl From<RkvError> for ClientError {
    fn from(err: RkvError) -> Self {
        match err {
            RkvError::Serialization(message) => ClientError::Serialization(message),
            other @ RkvError::InvalidConfig { .. } => ClientError::Config(other.to_string()),
        }
    }
}

impl From<RedisError> for ClientError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            return ClientError::Transport(err.to_string());
        }
        if err.code() == Some("READONLY") {
            return ClientError::ReadOnly(err.to_string());
        }

        match err.kind() {
            ErrorKind::IoError
            | ErrorKind::ClusterDown
            | ErrorKind::TryAgain
            | ErrorKind::MasterDown
            | ErrorKind::BusyLoadingError => ClientError::Transport(err.to_string()),
            ErrorKind::InvalidClientConfig => ClientError::Setup(err.to_string()),
            _ => ClientError::Command(err.to_string()),
        }
    }
}

impl From<PoolError> for ClientError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(kind) => ClientError::PoolExhausted(format!("{kind:?} timeout")),
            PoolError::Backend(err) => ClientError::from(err),
            PoolError::Closed => ClientError::PoolClosed,
            other => ClientError::Setup(other.to_string()),
        }
    }
}
