//! Raw Entity Loader - streaming, idempotent loads of large JSON entity exports
//!
//! Reads one JSON document whose records sit in a single array property,
//! without holding the document in memory, and upserts the records into a raw
//! relational table:
//! - Records are decoded one at a time, in source order
//! - Each record is hashed over a canonical (key-sorted) serialization
//! - Batches are deduplicated by identifier and written in one statement
//! - Rows are only rewritten when their content hash changed
//! - Every run is bracketed by an entry in the load audit ledger
//!
//! The target store is PostgreSQL or an embedded DuckDB database, behind the
//! [`LoadStore`] trait.

pub mod audit;
pub mod batch;
pub mod config;
pub mod database;
pub mod decode;
pub mod error;
pub mod hash;
pub mod pipeline;
pub mod record;
pub mod writer;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
pub use audit::{LoadAuditTracker, LoadRun};
pub use batch::{Batch, BatchAccumulator};
pub use config::{DatabaseBackendType, LoaderConfig};
pub use database::{
    DatabaseError, DatabaseResult, LoadAuditEntry, LoadStatus, LoadStore, RawRow, TargetTables,
};
pub use decode::RecordStream;
pub use error::{AuditPersistenceError, LoadError, LoadResult, MalformedInputError, WriteError};
pub use hash::{ContentHash, canonical_json, content_hash};
pub use pipeline::{LoadContext, LoadOptions, LoadSummary};
pub use record::{BatchRow, EntityRecord, SourceLayout};
pub use writer::UpsertWriter;

#[cfg(feature = "duckdb-backend")]
pub use database::DuckDBBackend;
#[cfg(feature = "postgres-backend")]
pub use database::PostgresBackend;
