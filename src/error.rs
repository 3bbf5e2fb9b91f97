//! Error types reported by the sender.
//!
//! [`SenderError`] values never propagate out of `send`; they are published on
//! the sender's error channel. [`BuildError`] is returned synchronously while
//! constructing a sender.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Connection-level failure published on the error channel.
#[derive(Debug, Error)]
pub enum SenderError {
    /// The endpoint actively refused the connection.
    ///
    /// Without a backoff policy no retry is scheduled; the next `send`
    /// re-arms the connection attempt.
    #[error("connection to {endpoint} refused")]
    ConnectionRefused {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// DNS, TCP or TLS handshake failure.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Writing a request failed; the message stays queued.
    #[error("failed to write request: {0}")]
    Write(#[source] io::Error),
    /// Reading from the connection failed.
    #[error("connection read failed: {0}")]
    Read(#[source] io::Error),
    /// Closing the write side of the connection failed.
    #[error("failed to close connection: {0}")]
    Close(#[source] io::Error),
}

impl SenderError {
    /// Classify an establishment failure for `endpoint`.
    pub(crate) fn connect(endpoint: String, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::ConnectionRefused {
            Self::ConnectionRefused { endpoint, source }
        } else {
            Self::Connect { endpoint, source }
        }
    }

    /// Returns `true` when the endpoint refused the connection.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused { .. })
    }

    /// Kind of the underlying I/O error.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::ConnectionRefused { source, .. } | Self::Connect { source, .. } => source.kind(),
            Self::Write(err) | Self::Read(err) | Self::Close(err) => err.kind(),
        }
    }
}

/// Errors that may occur while building a sender.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid sender configuration: {0}")]
    InvalidConfig(String),
    /// Configuration file could not be read or parsed.
    #[error("failed to load configuration from {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },
    /// TLS connector could not be created.
    #[error(transparent)]
    Tls(#[from] native_tls::Error),
    /// Underlying I/O error whilst creating the sender.
    #[error(transparent)]
    Io(#[from] io::Error),
}
