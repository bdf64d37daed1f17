//! Batch writer
//!
//! Applies one batch to the target store as a single conditional upsert,
//! bounded by a timeout.

use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::batch::Batch;
use crate::database::LoadStore;
use crate::error::WriteError;

/// Default time allowed for one batch write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(300);

/// Writes batches to a [`LoadStore`]
pub struct UpsertWriter<'a, S: LoadStore + ?Sized> {
    store: &'a S,
    timeout: Duration,
}

impl<'a, S: LoadStore + ?Sized> UpsertWriter<'a, S> {
    pub fn new(store: &'a S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Upsert a batch; rows whose stored hash matches are left untouched
    ///
    /// # Returns
    /// Rows affected as reported by the store. An empty batch returns 0
    /// without contacting the store.
    pub async fn write(&self, batch: &Batch) -> Result<u64, WriteError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let loaded_at = Utc::now();
        let affected = tokio::time::timeout(
            self.timeout,
            self.store.upsert_batch(batch.rows(), loaded_at),
        )
        .await
        .map_err(|_| WriteError::Timeout {
            rows: batch.len(),
            timeout: self.timeout,
        })??;

        debug!(rows = batch.len(), affected, "batch upserted");
        Ok(affected)
    }
}
