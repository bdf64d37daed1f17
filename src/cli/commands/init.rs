//! Init command
//!
//! Creates the schema, raw table and audit table in the target store.

use super::{StoreArgs, open_store, runtime};
use crate::cli::error::CliError;

/// Init command arguments
#[derive(Debug, Clone, Default)]
pub struct InitArgs {
    pub store: StoreArgs,
}

/// Provision the target tables; safe to run repeatedly
pub fn handle_init(args: &InitArgs) -> Result<(), CliError> {
    let config = args.store.resolve_config()?;
    let tables = config
        .tables()
        .map_err(|e| CliError::ConfigError(e.to_string()))?;

    let rt = runtime()?;
    let backend = rt.block_on(async {
        let store = open_store(&config).await?;
        store
            .initialize()
            .await
            .map_err(|e| CliError::DatabaseError(e.to_string()))?;
        Ok::<_, CliError>(store.backend_type())
    })?;

    println!("Initialized {} database", backend);
    println!("  Raw table:   {}", tables.raw_table());
    println!("  Audit table: {}", tables.audit_table());
    Ok(())
}
