use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

// ------------------------------------------------------------
// Failure classification
// ------------------------------------------------------------
//
// Every failed exchange call maps to exactly one kind. The
// request executor decides whether to retry purely on the kind,
// so adapters never make retry decisions themselves.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// DNS, TCP, TLS or other transport level failure
    Connection,

    /// The request did not complete within the client timeout
    Timeout,

    /// The exchange answered with a non-2xx status
    HttpStatus,

    /// The body was received but did not have the expected shape
    Malformed,

    /// The adapter does not offer this operation (or lacks credentials)
    Unsupported,

    /// Retry budget spent; never retried again
    Exhausted,
}

/// Errors produced by exchange adapters and the request executor.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("gave up after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        attempts: u32,
        last_error: Box<FetchError>,
    },
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Connection(_) => FailureKind::Connection,
            FetchError::Timeout(_) => FailureKind::Timeout,
            FetchError::Status { .. } => FailureKind::HttpStatus,
            FetchError::Malformed(_) => FailureKind::Malformed,
            FetchError::Unsupported(_) => FailureKind::Unsupported,
            FetchError::ExhaustedRetries { .. } => FailureKind::Exhausted,
        }
    }

    /// Shorthand used by adapters when a JSON field is missing.
    pub fn missing(field: &str) -> Self {
        FetchError::Malformed(format!("missing field `{field}`"))
    }
}

/// Maps a reqwest error that is not a timeout.
///
/// reqwest does not expose the configured timeout on the error, so
/// timeouts are classified by `exchanges::http`, which knows it.
impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

/// Errors produced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
