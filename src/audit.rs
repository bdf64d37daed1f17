//! Load audit ledger
//!
//! Every run opens an `in_progress` entry and finishes it exactly once as
//! `completed` or `error`. [`LoadRun`] is consumed by the sealing calls, so a
//! run cannot be sealed twice through the tracker.

use chrono::Utc;
use tracing::{info, warn};

use crate::database::{LoadSeal, LoadStatus, LoadStore};
use crate::error::AuditPersistenceError;

/// Handle to an open audit entry
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a load run must be sealed with complete() or fail()"]
pub struct LoadRun {
    load_id: i64,
}

impl LoadRun {
    pub fn load_id(&self) -> i64 {
        self.load_id
    }
}

/// Opens and seals audit entries in a [`LoadStore`]
pub struct LoadAuditTracker<'a, S: LoadStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: LoadStore + ?Sized> LoadAuditTracker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Insert an `in_progress` entry
    pub async fn begin(&self) -> Result<LoadRun, AuditPersistenceError> {
        let load_id = self.store.begin_load(Utc::now()).await?;
        info!(load_id, "load started");
        Ok(LoadRun { load_id })
    }

    /// Seal the run as `completed`
    pub async fn complete(
        &self,
        run: LoadRun,
        records_processed: u64,
    ) -> Result<(), AuditPersistenceError> {
        self.seal(run, LoadStatus::Completed, records_processed, None)
            .await
    }

    /// Seal the run as `error` with a message
    pub async fn fail(
        &self,
        run: LoadRun,
        records_processed: u64,
        error_message: &str,
    ) -> Result<(), AuditPersistenceError> {
        self.seal(run, LoadStatus::Error, records_processed, Some(error_message))
            .await
    }

    async fn seal(
        &self,
        run: LoadRun,
        status: LoadStatus,
        records_processed: u64,
        error_message: Option<&str>,
    ) -> Result<(), AuditPersistenceError> {
        let seal = LoadSeal {
            status,
            records_processed,
            error_message,
            finished_at: Utc::now(),
        };

        if !self.store.seal_load(run.load_id, &seal).await? {
            warn!(load_id = run.load_id, %status, "audit entry was not in progress");
            return Err(AuditPersistenceError::AlreadySealed {
                load_id: run.load_id,
            });
        }

        info!(load_id = run.load_id, %status, records_processed, "load sealed");
        Ok(())
    }
}
