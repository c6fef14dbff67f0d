//! Typed error kinds for the ingestion and retrieval pipeline.
//!
//! The synchronizer recovers extraction- and index-level failures into
//! per-source failure records rather than aborting a whole batch, so the
//! error types here carry enough of a tag for callers to tell recoverable
//! per-item failures apart from fatal infrastructure failures without
//! string-matching messages. Only startup errors (cannot reach storage,
//! registry, or the vector backend at all) propagate as `anyhow` errors
//! out of the application.

use thiserror::Error;

/// Errors raised by the vector index gateway.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The backend could not be reached at all (connect/timeout).
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    /// The backend was reachable but refused or failed the operation.
    #[error("vector index operation failed: {0}")]
    OperationFailed(String),

    /// The embedding collaborator failed while preparing vectors.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl IndexError {
    /// Map a transport error onto the unavailable/failed split: connection
    /// and timeout errors mean the backend is down, everything else is an
    /// operation-level failure.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            IndexError::Unavailable(err.to_string())
        } else {
            IndexError::OperationFailed(err.to_string())
        }
    }
}

/// Fatal-to-that-source extraction errors.
///
/// Transient conditions (network failures, empty pages) are *not* errors:
/// the extractor reports them as "no content" and the synchronizer skips
/// the source. An unsupported content type indicates a caller bug and is
/// reported distinctly so the UI can tell the user to remove or reformat
/// the file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedFormat(String),
}

/// Errors raised by the chat-model collaborator.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat model request failed: {0}")]
    Request(String),

    #[error("chat model returned an error: {0}")]
    Upstream(String),
}

/// Why a source ended up in the failed set of a sync result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Extraction produced no content (fetch/parse failure or empty body).
    NoContent,
    /// The source's content type cannot be extracted.
    UnsupportedFormat,
    /// The vector index rejected the insertion or deletion.
    Index,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::NoContent => write!(f, "no content"),
            FailureKind::UnsupportedFormat => write!(f, "unsupported format"),
            FailureKind::Index => write!(f, "index error"),
        }
    }
}
