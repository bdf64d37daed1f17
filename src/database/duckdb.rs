//! DuckDB database backend implementation
//!
//! Provides an embedded target store using DuckDB, for local loads and tests.
//! Supports both file-based persistence and in-memory mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::types::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::schema::TargetTables;
use super::{
    DatabaseError, DatabaseResult, LoadAuditEntry, LoadSeal, LoadStatus, LoadStore, RawRow,
};
use crate::hash::ContentHash;
use crate::record::BatchRow;

/// Columns selected for an audit entry, timestamps as epoch microseconds
const AUDIT_COLUMNS: &str = "load_id, epoch_us(start_time), epoch_us(end_time), status, records_processed, error_message";

/// DuckDB database backend
///
/// Timestamps are stored as UTC `TIMESTAMP` values bound from the loader, so
/// no timezone extension is required.
pub struct DuckDBBackend {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    /// DuckDB connection (wrapped in Mutex for thread safety)
    connection: Mutex<duckdb::Connection>,
    tables: TargetTables,
}

impl DuckDBBackend {
    /// Create a new DuckDB backend with a file-based database
    ///
    /// # Arguments
    /// * `db_path` - Path to the DuckDB database file
    ///
    /// # Returns
    /// A new DuckDB backend instance
    pub fn new(db_path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            connection: Mutex::new(connection),
            tables: TargetTables::default(),
        })
    }

    /// Create an in-memory DuckDB backend
    ///
    /// Useful for testing where persistence is not needed.
    pub fn in_memory() -> DatabaseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection: Mutex::new(connection),
            tables: TargetTables::default(),
        })
    }

    /// Use tables in a different schema
    pub fn with_tables(mut self, tables: TargetTables) -> Self {
        self.tables = tables;
        self
    }

    pub fn tables(&self) -> &TargetTables {
        &self.tables
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    fn lock(&self) -> DatabaseResult<MutexGuard<'_, duckdb::Connection>> {
        self.connection
            .lock()
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))
    }

    /// Multi-row upsert that only rewrites rows whose hash changed
    fn upsert_sql(&self, row_count: usize) -> String {
        let values = vec!["(?, ?, CAST(? AS JSON), ?, CAST(? AS TIMESTAMP))"; row_count].join(", ");
        format!(
            r#"
INSERT INTO {raw} (ce_id, id_340b, data, data_hash, _loaded_at)
VALUES {values}
ON CONFLICT (ce_id) DO UPDATE SET
    id_340b = EXCLUDED.id_340b,
    data = EXCLUDED.data,
    data_hash = EXCLUDED.data_hash,
    _loaded_at = EXCLUDED._loaded_at
WHERE data_hash <> EXCLUDED.data_hash
"#,
            raw = self.tables.raw_table(),
        )
    }

    fn read_audit_row(row: &duckdb::Row) -> DatabaseResult<LoadAuditEntry> {
        let query_err = |e: duckdb::Error| DatabaseError::QueryFailed(format!("Row read error: {}", e));

        let load_id: i64 = row.get(0).map_err(query_err)?;
        let started_us: i64 = row.get(1).map_err(query_err)?;
        let finished_us: Option<i64> = row.get(2).map_err(query_err)?;
        let status: String = row.get(3).map_err(query_err)?;
        let records_processed: i64 = row.get(4).map_err(query_err)?;
        let error_message: Option<String> = row.get(5).map_err(query_err)?;

        Ok(LoadAuditEntry {
            load_id,
            started_at: from_epoch_micros(started_us)?,
            finished_at: finished_us.map(from_epoch_micros).transpose()?,
            status: status
                .parse::<LoadStatus>()
                .map_err(DatabaseError::SerializationError)?,
            records_processed: records_processed as u64,
            error_message,
        })
    }
}

/// Format a UTC timestamp for `CAST(? AS TIMESTAMP)`
fn to_timestamp_literal(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn from_epoch_micros(micros: i64) -> DatabaseResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        DatabaseError::SerializationError(format!("Timestamp out of range: {}", micros))
    })
}

#[async_trait(?Send)]
impl LoadStore for DuckDBBackend {
    async fn initialize(&self) -> DatabaseResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&self.tables.duckdb_sql())
            .map_err(|e| DatabaseError::MigrationFailed(format!("Failed to create tables: {}", e)))
    }

    async fn upsert_batch(
        &self,
        rows: &[BatchRow],
        loaded_at: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = self.upsert_sql(rows.len());
        let timestamp = to_timestamp_literal(loaded_at);

        let mut values: Vec<Value> = Vec::with_capacity(rows.len() * 5);
        for row in rows {
            values.push(Value::BigInt(row.id));
            values.push(match &row.secondary_id {
                Some(s) => Value::Text(s.clone()),
                None => Value::Null,
            });
            values.push(Value::Text(row.payload.clone()));
            values.push(Value::Text(row.content_hash.to_string()));
            values.push(Value::Text(timestamp.clone()));
        }
        let param_refs: Vec<&dyn duckdb::ToSql> =
            values.iter().map(|v| v as &dyn duckdb::ToSql).collect();

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| {
            DatabaseError::TransactionFailed(format!("Failed to begin transaction: {}", e))
        })?;

        // Dropping the transaction on error rolls the whole batch back
        let affected = tx
            .execute(&sql, param_refs.as_slice())
            .map_err(|e| DatabaseError::QueryFailed(format!("Upsert failed: {}", e)))?;

        tx.commit().map_err(|e| {
            DatabaseError::TransactionFailed(format!("Failed to commit batch: {}", e))
        })?;

        Ok(affected as u64)
    }

    async fn begin_load(&self, started_at: DateTime<Utc>) -> DatabaseResult<i64> {
        let conn = self.lock()?;
        let sql = format!(
            "INSERT INTO {} (start_time, status, records_processed) VALUES (CAST(? AS TIMESTAMP), 'in_progress', 0) RETURNING load_id",
            self.tables.audit_table()
        );

        conn.query_row(&sql, [to_timestamp_literal(started_at)], |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to open audit entry: {}", e)))
    }

    async fn seal_load(&self, load_id: i64, seal: &LoadSeal<'_>) -> DatabaseResult<bool> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE {} SET end_time = CAST(? AS TIMESTAMP), status = ?, records_processed = ?, error_message = ? WHERE load_id = ? AND status = 'in_progress'",
            self.tables.audit_table()
        );

        let updated = conn
            .execute(
                &sql,
                duckdb::params![
                    to_timestamp_literal(seal.finished_at),
                    seal.status.as_str().to_string(),
                    seal.records_processed as i64,
                    seal.error_message.map(str::to_string),
                    load_id,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to seal audit entry: {}", e)))?;

        Ok(updated == 1)
    }

    async fn get_load(&self, load_id: i64) -> DatabaseResult<Option<LoadAuditEntry>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE load_id = ?",
            AUDIT_COLUMNS,
            self.tables.audit_table()
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let mut rows = stmt
            .query([load_id])
            .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

        match rows
            .next()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?
        {
            Some(row) => Self::read_audit_row(row).map(Some),
            None => Ok(None),
        }
    }

    async fn recent_loads(&self, limit: usize) -> DatabaseResult<Vec<LoadAuditEntry>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY load_id DESC LIMIT ?",
            AUDIT_COLUMNS,
            self.tables.audit_table()
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let mut rows = stmt
            .query([limit as i64])
            .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?
        {
            entries.push(Self::read_audit_row(row)?);
        }
        Ok(entries)
    }

    async fn get_raw_row(&self, id: i64) -> DatabaseResult<Option<RawRow>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT ce_id, id_340b, CAST(data AS VARCHAR), data_hash, epoch_us(_loaded_at) FROM {} WHERE ce_id = ?",
            self.tables.raw_table()
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let mut rows = stmt
            .query([id])
            .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

        let Some(row) = rows
            .next()
            .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?
        else {
            return Ok(None);
        };

        let query_err = |e: duckdb::Error| DatabaseError::QueryFailed(format!("Row read error: {}", e));
        let id: i64 = row.get(0).map_err(query_err)?;
        let secondary_id: Option<String> = row.get(1).map_err(query_err)?;
        let data: String = row.get(2).map_err(query_err)?;
        let hash: String = row.get(3).map_err(query_err)?;
        let loaded_us: i64 = row.get(4).map_err(query_err)?;

        Ok(Some(RawRow {
            id,
            secondary_id,
            payload: serde_json::from_str(&data)
                .map_err(|e| DatabaseError::SerializationError(e.to_string()))?,
            content_hash: ContentHash::from_hex(hash),
            loaded_at: from_epoch_micros(loaded_us)?,
        }))
    }

    async fn raw_row_count(&self) -> DatabaseResult<u64> {
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.tables.raw_table());

        let count: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(format!("Count failed: {}", e)))?;
        Ok(count as u64)
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        let conn = self.lock()?;
        let one: i32 = conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(format!("Health check failed: {}", e)))?;
        Ok(one == 1)
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }
}
