//! Status command
//!
//! Shows the most recent entries of the load audit ledger.

use super::{StoreArgs, open_store, runtime};
use crate::cli::error::CliError;
use crate::database::LoadAuditEntry;

/// Default number of audit entries shown
pub const DEFAULT_STATUS_LIMIT: usize = 10;

/// Status command arguments
#[derive(Debug, Clone)]
pub struct StatusArgs {
    pub store: StoreArgs,
    /// Number of entries to show
    pub limit: usize,
    /// Print entries as JSON
    pub json: bool,
}

impl Default for StatusArgs {
    fn default() -> Self {
        Self {
            store: StoreArgs::default(),
            limit: DEFAULT_STATUS_LIMIT,
            json: false,
        }
    }
}

/// Print recent load runs
pub fn handle_status(args: &StatusArgs) -> Result<(), CliError> {
    let config = args.store.resolve_config()?;

    let rt = runtime()?;
    let (entries, row_count) = rt.block_on(async {
        let store = open_store(&config).await?;
        let db_err = |e: crate::database::DatabaseError| CliError::DatabaseError(e.to_string());

        let entries = store.recent_loads(args.limit).await.map_err(db_err)?;
        let row_count = store.raw_row_count().await.map_err(db_err)?;
        Ok::<_, CliError>((entries, row_count))
    })?;

    if args.json {
        let output = serde_json::to_string_pretty(&entries)
            .map_err(|e| CliError::IoError(format!("Failed to serialize entries: {}", e)))?;
        println!("{}", output);
        return Ok(());
    }

    println!("Raw rows: {}", row_count);
    if entries.is_empty() {
        println!("No loads recorded");
        return Ok(());
    }

    println!();
    println!(
        "{:>8}  {:<11}  {:<19}  {:<19}  {:>10}  ERROR",
        "LOAD ID", "STATUS", "STARTED (UTC)", "FINISHED (UTC)", "RECORDS"
    );
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    Ok(())
}

fn format_entry(entry: &LoadAuditEntry) -> String {
    let finished = entry
        .finished_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{:>8}  {:<11}  {:<19}  {:<19}  {:>10}  {}",
        entry.load_id,
        entry.status.as_str(),
        entry.started_at.format("%Y-%m-%d %H:%M:%S"),
        finished,
        entry.records_processed,
        entry.error_message.as_deref().unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::LoadStatus;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_format_in_progress_entry() {
        let entry = LoadAuditEntry {
            load_id: 12,
            started_at: Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap(),
            finished_at: None,
            status: LoadStatus::InProgress,
            records_processed: 0,
            error_message: None,
        };

        let line = format_entry(&entry);
        assert!(line.contains("in_progress"));
        assert!(line.contains("2024-03-01 06:00:00"));
        assert!(line.contains("  -  "));
    }

    #[test]
    fn test_format_failed_entry() {
        let entry = LoadAuditEntry {
            load_id: 3,
            started_at: Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap(),
            finished_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 6, 5, 0).unwrap()),
            status: LoadStatus::Error,
            records_processed: 2000,
            error_message: Some("batch write timed out".to_string()),
        };

        let line = format_entry(&entry);
        assert!(line.contains("error"));
        assert!(line.contains("2000"));
        assert!(line.ends_with("batch write timed out"));
    }
}
