//! Error types for the load pipeline
//!
//! The taxonomy separates what went wrong with the source ([`MalformedInputError`]),
//! with writing a batch ([`WriteError`]) and with the audit ledger itself
//! ([`AuditPersistenceError`]). [`LoadError`] is what a load run returns.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::database::DatabaseError;

/// The source stream does not have the expected shape.
#[derive(Debug, Error)]
pub enum MalformedInputError {
    /// Reading from the underlying stream failed
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    /// A structural token other than the expected one was found
    #[error("expected {expected} at byte {offset}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        offset: u64,
    },

    /// The stream ended in the middle of the document
    #[error("unexpected end of input at byte {offset}")]
    UnexpectedEof { offset: u64 },

    /// The top-level object has no property with the records key
    #[error("top-level object has no \"{key}\" property")]
    MissingArray { key: String },

    /// The records property exists but does not hold an array
    #[error("property \"{key}\" is not an array (found {found})")]
    NotAnArray { key: String, found: String },

    /// A property name or skipped scalar is not valid JSON
    #[error("invalid JSON at byte {offset}: {source}")]
    Syntax {
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    /// An array element is not valid JSON
    #[error("invalid JSON in record {index}: {source}")]
    Json {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A record parsed but does not carry the required fields
    #[error("record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

/// A batch could not be written to the target store.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The store rejected the batch or the connection failed
    #[error("batch write failed: {0}")]
    Store(#[from] DatabaseError),

    /// The batch did not finish within the configured timeout
    #[error("batch write of {rows} rows timed out after {timeout:?}")]
    Timeout { rows: usize, timeout: Duration },
}

/// The load audit ledger could not be written.
#[derive(Debug, Error)]
pub enum AuditPersistenceError {
    /// The store failed while reading or writing the ledger
    #[error("audit ledger error: {0}")]
    Store(#[from] DatabaseError),

    /// A seal found the entry no longer in progress
    #[error("load {load_id} is not in progress and cannot be sealed again")]
    AlreadySealed { load_id: i64 },
}

/// Failure of a whole load run.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The source file could not be opened
    #[error("failed to open source {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed input: {0}")]
    MalformedInput(#[from] MalformedInputError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Audit(#[from] AuditPersistenceError),

    /// Cancellation was requested; observed at a batch boundary
    #[error("load cancelled after {batches} committed batches")]
    Cancelled { batches: usize },
}

/// Result type for load runs
pub type LoadResult<T> = Result<T, LoadError>;
