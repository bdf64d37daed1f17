//! Target store abstraction
//!
//! This module provides the storage layer the load pipeline writes to:
//! - PostgreSQL: the production target, read by downstream transformations
//! - DuckDB: embedded store for local runs and tests (file or in-memory)
//!
//! Both backends hold the same two tables: the raw entity table, keyed by the
//! record identifier and carrying the content hash used for change detection,
//! and the load audit ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod schema;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDBBackend;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresBackend;

pub use schema::TargetTables;

use crate::config::DatabaseBackendType;
use crate::hash::ContentHash;
use crate::record::BatchRow;

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema creation failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Transaction failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Lifecycle state of a load run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    InProgress,
    Completed,
    Error,
}

impl LoadStatus {
    /// Value stored in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::InProgress => "in_progress",
            LoadStatus::Completed => "completed",
            LoadStatus::Error => "error",
        }
    }

    /// True for `completed` and `error`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoadStatus::InProgress)
    }
}

impl std::str::FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_progress" => Ok(LoadStatus::InProgress),
            "completed" => Ok(LoadStatus::Completed),
            "error" => Ok(LoadStatus::Error),
            _ => Err(format!("Unknown load status: {}", s)),
        }
    }
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the load audit ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadAuditEntry {
    pub load_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: LoadStatus,
    pub records_processed: u64,
    pub error_message: Option<String>,
}

/// Terminal values written when a run is sealed
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSeal<'a> {
    pub status: LoadStatus,
    pub records_processed: u64,
    pub error_message: Option<&'a str>,
    pub finished_at: DateTime<Utc>,
}

/// A row of the raw entity table as stored
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub id: i64,
    pub secondary_id: Option<String>,
    pub payload: serde_json::Value,
    pub content_hash: ContentHash,
    pub loaded_at: DateTime<Utc>,
}

/// Store the load pipeline writes to
///
/// Implementations must apply [`LoadStore::upsert_batch`] atomically: either
/// every row of the batch is visible afterwards or none is.
#[async_trait(?Send)]
pub trait LoadStore: Send + Sync {
    /// Create the schema, raw table and audit table if they don't exist
    async fn initialize(&self) -> DatabaseResult<()>;

    /// Insert new rows and update existing rows whose hash differs
    ///
    /// # Arguments
    /// * `rows` - Rows to write; identifiers must be unique within the slice
    /// * `loaded_at` - Timestamp recorded on inserted and changed rows
    ///
    /// # Returns
    /// Rows affected as reported by the database
    async fn upsert_batch(&self, rows: &[BatchRow], loaded_at: DateTime<Utc>)
    -> DatabaseResult<u64>;

    /// Insert an `in_progress` audit entry and return its id
    async fn begin_load(&self, started_at: DateTime<Utc>) -> DatabaseResult<i64>;

    /// Move an `in_progress` entry to a terminal state
    ///
    /// # Returns
    /// `false` when no in-progress entry with that id exists
    async fn seal_load(&self, load_id: i64, seal: &LoadSeal<'_>) -> DatabaseResult<bool>;

    /// Get an audit entry by id
    async fn get_load(&self, load_id: i64) -> DatabaseResult<Option<LoadAuditEntry>>;

    /// Most recent audit entries, newest first
    async fn recent_loads(&self, limit: usize) -> DatabaseResult<Vec<LoadAuditEntry>>;

    /// Get a raw row by identifier
    async fn get_raw_row(&self, id: i64) -> DatabaseResult<Option<RawRow>>;

    /// Number of rows in the raw table
    async fn raw_row_count(&self) -> DatabaseResult<u64>;

    /// Check if database is healthy and accessible
    async fn health_check(&self) -> DatabaseResult<bool>;

    /// Backend type string ("duckdb" or "postgres")
    fn backend_type(&self) -> &'static str;
}

#[async_trait(?Send)]
impl<S: LoadStore + ?Sized> LoadStore for Box<S> {
    async fn initialize(&self) -> DatabaseResult<()> {
        (**self).initialize().await
    }

    async fn upsert_batch(
        &self,
        rows: &[BatchRow],
        loaded_at: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        (**self).upsert_batch(rows, loaded_at).await
    }

    async fn begin_load(&self, started_at: DateTime<Utc>) -> DatabaseResult<i64> {
        (**self).begin_load(started_at).await
    }

    async fn seal_load(&self, load_id: i64, seal: &LoadSeal<'_>) -> DatabaseResult<bool> {
        (**self).seal_load(load_id, seal).await
    }

    async fn get_load(&self, load_id: i64) -> DatabaseResult<Option<LoadAuditEntry>> {
        (**self).get_load(load_id).await
    }

    async fn recent_loads(&self, limit: usize) -> DatabaseResult<Vec<LoadAuditEntry>> {
        (**self).recent_loads(limit).await
    }

    async fn get_raw_row(&self, id: i64) -> DatabaseResult<Option<RawRow>> {
        (**self).get_raw_row(id).await
    }

    async fn raw_row_count(&self) -> DatabaseResult<u64> {
        (**self).raw_row_count().await
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        (**self).health_check().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Open the store for a backend
///
/// # Arguments
/// * `backend` - Which backend to open
/// * `url` - PostgreSQL connection URL, or DuckDB file path (`:memory:` for in-memory)
/// * `tables` - Schema holding the raw and audit tables
pub async fn connect(
    backend: DatabaseBackendType,
    url: &str,
    tables: TargetTables,
) -> DatabaseResult<Box<dyn LoadStore>> {
    match backend {
        DatabaseBackendType::DuckDB => open_duckdb(url, tables),
        DatabaseBackendType::Postgres => connect_postgres(url, tables).await,
    }
}

#[cfg(feature = "duckdb-backend")]
fn open_duckdb(url: &str, tables: TargetTables) -> DatabaseResult<Box<dyn LoadStore>> {
    let backend = if url == ":memory:" {
        DuckDBBackend::in_memory()?
    } else {
        DuckDBBackend::new(url)?
    };
    info!(path = url, schema = tables.schema(), "opened DuckDB store");
    Ok(Box::new(backend.with_tables(tables)))
}

#[cfg(not(feature = "duckdb-backend"))]
fn open_duckdb(_url: &str, _tables: TargetTables) -> DatabaseResult<Box<dyn LoadStore>> {
    Err(DatabaseError::ConfigError(
        "DuckDB backend not enabled. Build with --features duckdb-backend".to_string(),
    ))
}

#[cfg(feature = "postgres-backend")]
async fn connect_postgres(url: &str, tables: TargetTables) -> DatabaseResult<Box<dyn LoadStore>> {
    let backend = PostgresBackend::new(url).await?;
    info!(
        url = %backend.connection_string_masked(),
        schema = tables.schema(),
        "connected to PostgreSQL"
    );
    Ok(Box::new(backend.with_tables(tables)))
}

#[cfg(not(feature = "postgres-backend"))]
async fn connect_postgres(_url: &str, _tables: TargetTables) -> DatabaseResult<Box<dyn LoadStore>> {
    Err(DatabaseError::ConfigError(
        "PostgreSQL backend not enabled. Build with --features postgres-backend".to_string(),
    ))
}
