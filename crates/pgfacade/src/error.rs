//! Error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a driver (the pool and its connections).
///
/// The facade never rewrites these; a failed query surfaces to the caller
/// as [`Error::Driver`] carrying the driver error as it was produced.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// Establishing a physical connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// A connection could not be acquired from the pool.
    #[error("failed to acquire connection: {0}")]
    Acquire(String),

    /// Waiting for a pooled connection timed out.
    #[error("connection acquisition timeout after {0:?}")]
    AcquireTimeout(Duration),

    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The server rejected the statement.
    #[error("server error {code}: {message}")]
    Server {
        /// SQLSTATE code.
        code: String,
        /// Severity tag reported by the server (`ERROR`, `FATAL`, ...).
        severity: String,
        /// Primary message.
        message: String,
        /// Optional detail message.
        detail: Option<String>,
    },

    /// Statement execution failed without a server error.
    #[error("query error: {0}")]
    Query(String),

    /// A parameter could not be encoded for the server.
    #[error("cannot encode parameter {index}: {message}")]
    Encode {
        /// Zero-based parameter position.
        index: usize,
        /// Reason.
        message: String,
    },

    /// A column value could not be decoded.
    #[error("cannot decode column {column}: {message}")]
    Decode {
        /// Column name.
        column: String,
        /// Reason.
        message: String,
    },

    /// Any other driver failure.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl DriverError {
    /// Check if this error happened while obtaining a connection.
    #[must_use]
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            Self::Acquire(_) | Self::AcquireTimeout(_) | Self::Connection(_) | Self::PoolClosed
        )
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// The facade never retries; this is a hint for callers.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AcquireTimeout(_) | Self::ConnectionClosed | Self::Connection(_)
        )
    }

    /// Get the SQLSTATE code if this is a server error.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            return Self::Server {
                code: db.code().code().to_string(),
                severity: db.severity().to_string(),
                message: db.message().to_string(),
                detail: db.detail().map(str::to_string),
            };
        }
        if err.is_closed() {
            return Self::ConnectionClosed;
        }
        Self::Other(Box::new(err))
    }
}

/// Errors returned by the lifecycle controller and the facades.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or invalid configuration. Returned from `start`, never logged.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start` was called while a pool is already running.
    #[error("component is already started")]
    AlreadyStarted,

    /// Error from the underlying driver, unchanged.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl Error {
    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Get the driver error, if any.
    #[must_use]
    pub fn as_driver(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
