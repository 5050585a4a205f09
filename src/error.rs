//! Typed failures for each pipeline stage.
//!
//! Stage functions return these so the orchestrator can tell host-signaled
//! failures, malformed input, storage and catalog problems apart. Command
//! entry points wrap them in `anyhow`.

use thiserror::Error;

/// Failure of a remote fetch that the retry policy does not absorb.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request rate threshold exceeded; invalid data retrieved for {0}")]
    RateLimited(String),
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("access denied for remote path: {0}")]
    AccessDenied(String),
    #[error("unable to resolve remote path {path}: {message}")]
    Transport { path: String, message: String },
}

/// A single transport-level failure. Always retryable.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportFailure(pub String);

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("listing for {0} has no main-content container")]
    MissingContainer(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("unable to parse registrant identifier from filing header")]
    MissingCik,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type for text extraction: {0}")]
    UnsupportedContentType(String),
    #[error("document body is uuencoded binary")]
    Uuencoded,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("remote object store error: {0}")]
    Remote(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("filing {0} already exists")]
    AlreadyExists(String),
    #[error("company {0} vanished after a creation conflict")]
    ConflictUnresolved(i64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Returns `true` when a sqlx error is a uniqueness-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
