//! Error types for API access, the record cache, and reconciliation.

use std::path::PathBuf;

use thiserror::Error;

use crate::http::HttpError;

/// Errors from a single call to the remote API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure or per-request timeout.
    #[error("transport error: {0}")]
    Transport(#[from] HttpError),

    /// The API answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the JSON we expected.
    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),

    /// A request URL could not be built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Every attempt of a retried request failed.
    #[error("gave up after {attempts} attempts: {last}")]
    FetchExhausted {
        attempts: usize,
        #[source]
        last: Box<ApiError>,
    },
}

impl From<std::convert::Infallible> for ApiError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl ApiError {
    /// Transport and status failures are retried; everything else is final.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. })
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::FetchExhausted { .. })
    }
}

/// Errors reading or writing the on-disk record cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {0} does not exist")]
    Missing(PathBuf),

    /// The document does not parse; treated as an interrupted write.
    #[error("cache file {path} is incomplete or corrupt: {source}")]
    Incomplete {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize record {id}: {source}")]
    Serialize {
        id: u64,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that abort a fetch-and-cache run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Errors that abort a reconciliation run.
///
/// Per-record failures never surface here; they are outcomes in the report.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list project members: {0}")]
    Membership(#[source] ApiError),
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which keeps API bodies with
/// embedded stack traces out of progress output.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}
