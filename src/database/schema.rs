//! Target table definitions
//!
//! Provides the DDL for the raw entity table and the load audit ledger. The
//! column layout is shared; DuckDB and PostgreSQL differ only in the document
//! type (JSON vs JSONB), timestamp type and how the audit id is assigned.

use super::{DatabaseError, DatabaseResult};

/// Default schema holding the loader's tables
pub const DEFAULT_SCHEMA: &str = "raw_340b";

/// Raw entity table name
pub const RAW_TABLE: &str = "covered_entities";

/// Load audit table name
pub const AUDIT_TABLE: &str = "load_audit";

/// Sequence backing the DuckDB audit id
pub const AUDIT_SEQUENCE: &str = "load_audit_seq";

/// Qualified names of the tables a store reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTables {
    schema: String,
}

impl Default for TargetTables {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }
}

impl TargetTables {
    /// Use a custom schema; it must be a plain identifier since it is
    /// interpolated into SQL
    pub fn new(schema: impl Into<String>) -> DatabaseResult<Self> {
        let schema = schema.into();
        if !is_plain_identifier(&schema) {
            return Err(DatabaseError::ConfigError(format!(
                "Invalid schema name '{}': use letters, digits and underscores",
                schema
            )));
        }
        Ok(Self { schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// `schema.covered_entities`
    pub fn raw_table(&self) -> String {
        format!("{}.{}", self.schema, RAW_TABLE)
    }

    /// `schema.load_audit`
    pub fn audit_table(&self) -> String {
        format!("{}.{}", self.schema, AUDIT_TABLE)
    }

    /// `schema.load_audit_seq`
    pub fn audit_sequence(&self) -> String {
        format!("{}.{}", self.schema, AUDIT_SEQUENCE)
    }

    /// DDL for PostgreSQL
    pub fn postgres_sql(&self) -> String {
        format!(
            r#"
CREATE SCHEMA IF NOT EXISTS {schema};

-- Latest known state of each entity
CREATE TABLE IF NOT EXISTS {raw} (
    ce_id BIGINT PRIMARY KEY,
    id_340b TEXT,
    data JSONB NOT NULL,
    data_hash VARCHAR(64) NOT NULL,
    _loaded_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- One row per load run
CREATE TABLE IF NOT EXISTS {audit} (
    load_id BIGSERIAL PRIMARY KEY,
    start_time TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    end_time TIMESTAMPTZ,
    status TEXT NOT NULL CHECK (status IN ('in_progress', 'completed', 'error')),
    records_processed BIGINT NOT NULL DEFAULT 0,
    error_message TEXT
);
"#,
            schema = self.schema,
            raw = self.raw_table(),
            audit = self.audit_table(),
        )
    }

    /// DDL for DuckDB
    ///
    /// Timestamps are stored as UTC `TIMESTAMP` values supplied by the loader.
    pub fn duckdb_sql(&self) -> String {
        format!(
            r#"
CREATE SCHEMA IF NOT EXISTS {schema};

CREATE SEQUENCE IF NOT EXISTS {sequence} START 1;

CREATE TABLE IF NOT EXISTS {raw} (
    ce_id BIGINT PRIMARY KEY,
    id_340b VARCHAR,
    data JSON NOT NULL,
    data_hash VARCHAR NOT NULL,
    _loaded_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS {audit} (
    load_id BIGINT PRIMARY KEY DEFAULT nextval('{sequence}'),
    start_time TIMESTAMP NOT NULL,
    end_time TIMESTAMP,
    status VARCHAR NOT NULL CHECK (status IN ('in_progress', 'completed', 'error')),
    records_processed BIGINT NOT NULL DEFAULT 0,
    error_message VARCHAR
);
"#,
            schema = self.schema,
            sequence = self.audit_sequence(),
            raw = self.raw_table(),
            audit = self.audit_table(),
        )
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
