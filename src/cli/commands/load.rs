//! Load command
//!
//! Runs one load of the configured source into the target store.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use tracing::warn;

use super::{StoreArgs, open_store, runtime};
use crate::cli::error::CliError;
use crate::pipeline::{LoadContext, LoadSummary};

/// Load command arguments
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    pub store: StoreArgs,
    /// Source document, overriding the configured path
    pub source: Option<PathBuf>,
    /// Batch size, overriding the configured size
    pub batch_size: Option<usize>,
    /// Create the schema and tables before loading
    pub init_schema: bool,
    /// Print the summary as JSON
    pub json: bool,
}

/// Run a load and print its summary
pub fn handle_load(args: &LoadArgs) -> Result<(), CliError> {
    let mut config = args.store.resolve_config()?;

    if let Some(source) = &args.source {
        config.source.path = source.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.load.batch_size = batch_size;
    }

    config
        .validate()
        .map_err(|e| CliError::ConfigError(e.to_string()))?;

    let rt = runtime()?;
    let summary = rt.block_on(async {
        let store = open_store(&config).await?;

        if args.init_schema {
            store
                .initialize()
                .await
                .map_err(|e| CliError::DatabaseError(e.to_string()))?;
        }

        let context = LoadContext::new(store, config.load_options());

        // Observed before the next batch write
        let cancel = context.cancel_flag();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping before the next batch");
                cancel.store(true, Ordering::SeqCst);
            }
        });
        // Install the handler before the first record is read
        tokio::task::yield_now().await;

        context.run().await.map_err(CliError::from)
    })?;

    print_summary(&summary, args.json)
}

fn print_summary(summary: &LoadSummary, json: bool) -> Result<(), CliError> {
    if json {
        let output = serde_json::to_string_pretty(summary)
            .map_err(|e| CliError::IoError(format!("Failed to serialize summary: {}", e)))?;
        println!("{}", output);
        return Ok(());
    }

    println!(
        "Load {} completed in {}",
        summary.load_id,
        summary.duration_string()
    );
    println!("  Records decoded:     {}", summary.records_decoded);
    println!("  Batches committed:   {}", summary.batches);
    println!("  Rows committed:      {}", summary.rows_committed);
    println!("  Rows changed:        {}", summary.rows_affected);
    println!("  Duplicates replaced: {}", summary.duplicates_replaced);
    println!("  Throughput:          {:.0} records/s", summary.throughput());
    Ok(())
}
