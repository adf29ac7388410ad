//! Error types for the replay engine.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for replay operations.
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Errors that can occur while replaying traffic.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// No source log was configured.
    #[error("missing path to replay file")]
    MissingPath,

    /// No target host was configured.
    #[error("missing host to replay to")]
    MissingHost,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The source log could not be opened or read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path of the source log.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Codec failure while reading the log.
    #[error("codec error: {0}")]
    Codec(#[from] traffic_codec::CodecError),

    /// A request processor failed.
    #[error("processor {name} failed: {message}")]
    Processor {
        /// Name of the failing processor.
        name: String,
        /// Error reported by the processor.
        message: String,
    },

    /// Connection-level failure (refused, reset, write error).
    #[error("transport error: {0}")]
    Transport(String),

    /// TLS handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The target sent something that is not an HTTP/1.x response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The target answered with a non-2xx status.
    #[error("unexpected status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Connect or response deadline elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ReplayError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Returns true if this error halts the whole run.
    ///
    /// Everything else only affects a single record or request.
    pub fn is_fatal(&self) -> bool {
        match self {
            ReplayError::MissingPath
            | ReplayError::MissingHost
            | ReplayError::InvalidConfig(_)
            | ReplayError::Io { .. }
            | ReplayError::Processor { .. } => true,
            ReplayError::Codec(err) => !err.is_recoverable(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for ReplayError {
    fn from(err: std::io::Error) -> Self {
        ReplayError::Transport(err.to_string())
    }
}
