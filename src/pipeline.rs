//! Load pipeline
//!
//! Streams records from the source, batches them and upserts each batch,
//! bracketed by an audit entry:
//!
//! 1. Open an `in_progress` audit entry
//! 2. Decode records one at a time, in source order
//! 3. Flush a batch whenever the accumulator is full, then the remainder
//! 4. Seal the entry `completed`, or `error` with the rows committed so far
//!
//! Everything the run needs is held by an explicit [`LoadContext`].

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::audit::{LoadAuditTracker, LoadRun};
use crate::batch::{BatchAccumulator, DEFAULT_BATCH_SIZE};
use crate::database::LoadStore;
use crate::decode::RecordStream;
use crate::error::{LoadError, LoadResult};
use crate::record::SourceLayout;
use crate::writer::{DEFAULT_WRITE_TIMEOUT, UpsertWriter};

/// Default location of the source document
pub const DEFAULT_SOURCE_PATH: &str = "data/raw/OPA_CE_DAILY_PUBLIC.JSON";

/// Options for one load run
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Source JSON document
    pub source_path: PathBuf,
    /// Where the records live and which fields identify them
    pub layout: SourceLayout,
    /// Maximum distinct rows per batch
    pub batch_size: usize,
    /// Time allowed for one batch write
    pub write_timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from(DEFAULT_SOURCE_PATH),
            layout: SourceLayout::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Statistics from a load run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    /// Audit entry of the run
    pub load_id: i64,
    /// Batches committed
    pub batches: usize,
    /// Records decoded from the source
    pub records_decoded: u64,
    /// Records that replaced an earlier record with the same id in a batch
    pub duplicates_replaced: usize,
    /// Rows in committed batches (recorded as `records_processed`)
    pub rows_committed: u64,
    /// Rows inserted or changed as reported by the store
    pub rows_affected: u64,
    /// Duration of the run
    #[serde(skip)]
    pub duration: Duration,
}

impl LoadSummary {
    /// Get records per second throughput
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.records_decoded as f64 / secs
        }
    }

    /// Format duration as human-readable string
    pub fn duration_string(&self) -> String {
        let secs = self.duration.as_secs();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}

/// Store, options and cancellation flag for load runs
pub struct LoadContext<S: LoadStore> {
    store: S,
    options: LoadOptions,
    cancel: Arc<AtomicBool>,
}

impl<S: LoadStore> LoadContext<S> {
    pub fn new(store: S, options: LoadOptions) -> Self {
        Self {
            store,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an existing cancellation flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Setting the flag stops the run before its next batch write
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the configured source file
    ///
    /// The audit entry is opened before the file, so a missing source is
    /// recorded as a failed run.
    pub async fn run(&self) -> LoadResult<LoadSummary> {
        let tracker = LoadAuditTracker::new(&self.store);
        let run = tracker.begin().await?;
        let path = &self.options.source_path;

        match RecordStream::open(path, self.options.layout.clone()) {
            Ok(stream) => {
                info!(load_id = run.load_id(), source = %path.display(), "reading source");
                self.drive(&tracker, run, stream).await
            }
            Err(source) => {
                let err = LoadError::SourceOpen {
                    path: path.clone(),
                    source,
                };
                Self::seal_failed(&tracker, run, 0, &err).await;
                Err(err)
            }
        }
    }

    /// Load from an already open reader
    pub async fn run_reader<R: BufRead>(&self, reader: R) -> LoadResult<LoadSummary> {
        let tracker = LoadAuditTracker::new(&self.store);
        let run = tracker.begin().await?;
        let stream = RecordStream::new(reader, self.options.layout.clone());
        self.drive(&tracker, run, stream).await
    }

    async fn drive<R: BufRead>(
        &self,
        tracker: &LoadAuditTracker<'_, S>,
        run: LoadRun,
        stream: RecordStream<R>,
    ) -> LoadResult<LoadSummary> {
        let start = Instant::now();
        let mut summary = LoadSummary {
            load_id: run.load_id(),
            ..Default::default()
        };

        match self.process(stream, &mut summary).await {
            Ok(()) => {
                summary.duration = start.elapsed();
                tracker.complete(run, summary.rows_committed).await?;
                info!(
                    load_id = summary.load_id,
                    batches = summary.batches,
                    records = summary.records_decoded,
                    rows = summary.rows_committed,
                    affected = summary.rows_affected,
                    "load completed in {}",
                    summary.duration_string()
                );
                Ok(summary)
            }
            Err(err) => {
                Self::seal_failed(tracker, run, summary.rows_committed, &err).await;
                Err(err)
            }
        }
    }

    async fn process<R: BufRead>(
        &self,
        stream: RecordStream<R>,
        summary: &mut LoadSummary,
    ) -> LoadResult<()> {
        let writer = UpsertWriter::new(&self.store, self.options.write_timeout);
        let mut accumulator = BatchAccumulator::new(self.options.batch_size);

        for item in stream {
            let record = item?;
            summary.records_decoded += 1;
            accumulator.add(record)?;

            if accumulator.should_flush() {
                self.flush(&writer, &mut accumulator, summary).await?;
            }
        }

        if !accumulator.is_empty() {
            self.flush(&writer, &mut accumulator, summary).await?;
        }

        summary.duplicates_replaced = accumulator.replaced_count();
        Ok(())
    }

    async fn flush(
        &self,
        writer: &UpsertWriter<'_, S>,
        accumulator: &mut BatchAccumulator,
        summary: &mut LoadSummary,
    ) -> LoadResult<()> {
        // Synchronous stores never suspend, so let tasks that set the flag run
        tokio::task::yield_now().await;
        if self.cancel.load(Ordering::SeqCst) {
            warn!(
                load_id = summary.load_id,
                batches = summary.batches,
                "cancellation requested"
            );
            return Err(LoadError::Cancelled {
                batches: summary.batches,
            });
        }

        let batch = accumulator.drain();
        let affected = writer.write(&batch).await?;

        summary.batches += 1;
        summary.rows_committed += batch.len() as u64;
        summary.rows_affected += affected;
        info!(
            load_id = summary.load_id,
            batch = summary.batches,
            rows = batch.len(),
            affected,
            total = summary.rows_committed,
            "batch committed"
        );
        Ok(())
    }

    /// Record the failure; an audit error here is logged, not returned
    async fn seal_failed(
        tracker: &LoadAuditTracker<'_, S>,
        run: LoadRun,
        rows_committed: u64,
        err: &LoadError,
    ) {
        let load_id = run.load_id();
        error!(load_id, rows = rows_committed, "load failed: {}", err);

        if let Err(audit_err) = tracker.fail(run, rows_committed, &err.to_string()).await {
            error!(load_id, "failed to record load failure: {}", audit_err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_summary_throughput() {
        let summary = LoadSummary {
            records_decoded: 1000,
            duration: Duration::from_secs(10),
            ..Default::default()
        };

        assert_eq!(summary.throughput(), 100.0);
        assert_eq!(summary.duration_string(), "10s");
        assert_eq!(LoadSummary::default().throughput(), 0.0);
    }

    #[test]
    fn test_load_summary_duration_formatting() {
        let mut summary = LoadSummary::default();

        summary.duration = Duration::from_secs(90);
        assert_eq!(summary.duration_string(), "1m 30s");

        summary.duration = Duration::from_secs(3661);
        assert_eq!(summary.duration_string(), "1h 1m 1s");
    }

    #[test]
    fn test_default_options() {
        let options = LoadOptions::default();
        assert_eq!(options.source_path, PathBuf::from(DEFAULT_SOURCE_PATH));
        assert_eq!(options.batch_size, 1000);
        assert_eq!(options.write_timeout, Duration::from_secs(300));
        assert_eq!(options.layout.records_key, "coveredEntities");
    }

    #[test]
    fn test_load_summary_serializes_camel_case() {
        let summary = LoadSummary {
            load_id: 7,
            rows_committed: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["loadId"], 7);
        assert_eq!(json["rowsCommitted"], 3);
        assert!(json.get("duration").is_none());
    }
}
