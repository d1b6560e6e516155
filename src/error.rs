//! Error taxonomy for the document store and generation pipeline.
//!
//! Every failure surfaced by the library is an [`Error`] variant naming the
//! concrete problem. [`Error::kind`] groups variants into the coarse
//! categories callers act on: fix the request ([`ErrorKind::InvalidInput`],
//! [`ErrorKind::Conflict`]), give up ([`ErrorKind::NotFound`]), or report an
//! upstream or storage fault.

use thiserror::Error;

/// Coarse error category used to decide how a caller should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any mutation; user-correctable.
    InvalidInput,
    /// Topic, document, summary, or template does not exist.
    NotFound,
    /// The request contradicts current state (non-empty topic, missing destination).
    Conflict,
    /// Text extraction, generation backend, or URL fetch failed.
    UpstreamFailure,
    /// Manifest, binary, and summary disagree on disk.
    Inconsistency,
    /// Raw I/O or serialization fault.
    Internal,
}

/// Library error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid topic name: {0:?}")]
    InvalidName(String),

    #[error("invalid document hash: {0:?}")]
    InvalidHash(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("summary not found for document {0}")]
    SummaryNotFound(String),

    #[error("prompt template not found: {0}")]
    TemplateNotFound(String),

    #[error("topic already exists: {0}")]
    AlreadyExists(String),

    #[error("topic {topic} still contains {count} document(s)")]
    NotEmpty { topic: String, count: usize },

    #[error("topic {topic} contains files pdfman does not manage: {}", .entries.join(", "))]
    UnmanagedFiles { topic: String, entries: Vec<String> },

    #[error("destination topic does not exist: {0}")]
    DestinationNotFound(String),

    #[error("failed to fetch source: {0}")]
    SourceFetchFailed(String),

    #[error("unreadable PDF: {0}")]
    UnreadablePdf(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("storage inconsistency: {0}")]
    Inconsistency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidName(_) | Error::InvalidHash(_) | Error::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            Error::TopicNotFound(_)
            | Error::DocumentNotFound(_)
            | Error::SummaryNotFound(_)
            | Error::TemplateNotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_)
            | Error::NotEmpty { .. }
            | Error::UnmanagedFiles { .. }
            | Error::DestinationNotFound(_) => ErrorKind::Conflict,
            Error::SourceFetchFailed(_) | Error::UnreadablePdf(_) | Error::Generation(_) => {
                ErrorKind::UpstreamFailure
            }
            Error::Inconsistency(_) => ErrorKind::Inconsistency,
            Error::Io(_) | Error::Manifest(_) => ErrorKind::Internal,
        }
    }
}

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;
