// src/error.rs

use std::time::Duration;
use thiserror::Error;

/// Why a dataset refresh did not produce fresh records.
///
/// None of these reach the caller of `Fetcher::load`; they decide which
/// fallback is served and what gets logged.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid source url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("GET {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GET {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("GET {url} answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("{url} yielded no usable records")]
    EmptyParse { url: String },

    /// A newer fetch for the same dataset took over, or the fetch was cancelled.
    #[error("fetch aborted before completion")]
    Aborted,

    #[error("fetch task failed: {0}")]
    Task(String),
}

impl IngestError {
    /// Transient failures worth another attempt under the retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Network { .. } | IngestError::Timeout { .. } => true,
            IngestError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// A durable store rejected an operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("capacity exceeded: writing {needed} bytes would pass the {limit} byte limit")]
    CapacityExceeded { needed: usize, limit: usize },
}

/// A row that cannot become a record under the active column policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRow {
    #[error("expected {expected} fields, found {found}")]
    ColumnCount { expected: usize, found: usize },
}
