//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use raw_entity_loader::database::{LoadSeal, LoadStore};
use raw_entity_loader::{
    BatchRow, DatabaseError, DatabaseResult, DuckDBBackend, LoadAuditEntry, LoadOptions, RawRow,
};
use serde_json::{Value, json};

/// In-memory DuckDB store that records batch writes and injects failures
pub struct RecordingStore {
    inner: DuckDBBackend,
    batch_sizes: Mutex<Vec<usize>>,
    fail_on_call: Option<usize>,
    write_delay: Option<Duration>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
    fail_seal: bool,
}

impl RecordingStore {
    pub async fn new() -> Self {
        let inner = DuckDBBackend::in_memory().unwrap();
        inner.initialize().await.unwrap();
        Self {
            inner,
            batch_sizes: Mutex::new(Vec::new()),
            fail_on_call: None,
            write_delay: None,
            cancel_after: None,
            fail_seal: false,
        }
    }

    /// Reject the n-th batch write (1-based)
    pub fn fail_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Sleep before every batch write
    pub fn write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Set the flag once `calls` batches have been written
    pub fn cancel_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((calls, flag));
        self
    }

    /// Reject every audit seal
    pub fn fail_seal(mut self) -> Self {
        self.fail_seal = true;
        self
    }

    /// Sizes of the batches passed to the store, in call order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl LoadStore for RecordingStore {
    async fn initialize(&self) -> DatabaseResult<()> {
        self.inner.initialize().await
    }

    async fn upsert_batch(
        &self,
        rows: &[BatchRow],
        loaded_at: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        let call = {
            let mut sizes = self.batch_sizes.lock().unwrap();
            sizes.push(rows.len());
            sizes.len()
        };

        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on_call == Some(call) {
            return Err(DatabaseError::QueryFailed("injected failure".to_string()));
        }

        let affected = self.inner.upsert_batch(rows, loaded_at).await?;

        if let Some((after, flag)) = &self.cancel_after
            && call >= *after
        {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(affected)
    }

    async fn begin_load(&self, started_at: DateTime<Utc>) -> DatabaseResult<i64> {
        self.inner.begin_load(started_at).await
    }

    async fn seal_load(&self, load_id: i64, seal: &LoadSeal<'_>) -> DatabaseResult<bool> {
        if self.fail_seal {
            return Err(DatabaseError::ConnectionFailed("ledger unavailable".to_string()));
        }
        self.inner.seal_load(load_id, seal).await
    }

    async fn get_load(&self, load_id: i64) -> DatabaseResult<Option<LoadAuditEntry>> {
        self.inner.get_load(load_id).await
    }

    async fn recent_loads(&self, limit: usize) -> DatabaseResult<Vec<LoadAuditEntry>> {
        self.inner.recent_loads(limit).await
    }

    async fn get_raw_row(&self, id: i64) -> DatabaseResult<Option<RawRow>> {
        self.inner.get_raw_row(id).await
    }

    async fn raw_row_count(&self) -> DatabaseResult<u64> {
        self.inner.raw_row_count().await
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        self.inner.health_check().await
    }

    fn backend_type(&self) -> &'static str {
        "recording"
    }
}

/// A source document holding `records` under the default key
pub fn document(records: &[Value]) -> String {
    json!({ "coveredEntities": records }).to_string()
}

/// A covered-entity-like record
pub fn entity(id: i64, name: &str) -> Value {
    json!({
        "ceId": id,
        "id340B": format!("CH{id:04}"),
        "name": name,
        "addresses": [{ "city": "Springfield", "state": "IL" }],
    })
}

pub fn options(batch_size: usize) -> LoadOptions {
    LoadOptions {
        batch_size,
        ..Default::default()
    }
}
