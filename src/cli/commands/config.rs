//! Config command
//!
//! Prints the sample configuration or writes it to the working directory.

use std::path::Path;

use crate::cli::error::CliError;
use crate::config::{CONFIG_FILENAME, LoaderConfig, sample_config};

/// Config command arguments
#[derive(Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Write `.raw-loader.toml` instead of printing
    pub write: bool,
}

pub fn handle_config(args: &ConfigArgs) -> Result<(), CliError> {
    if !args.write {
        print!("{}", sample_config());
        return Ok(());
    }

    let cwd = std::env::current_dir()
        .map_err(|e| CliError::IoError(format!("Failed to read working directory: {}", e)))?;
    let path = write_sample_config(&cwd)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Write the sample configuration into `dir`, refusing to overwrite
fn write_sample_config(dir: &Path) -> Result<std::path::PathBuf, CliError> {
    let path = dir.join(CONFIG_FILENAME);
    if LoaderConfig::exists(dir) {
        return Err(CliError::FileExists(path));
    }

    std::fs::write(&path, sample_config())
        .map_err(|e| CliError::IoError(format!("Failed to write {}: {}", path.display(), e)))?;
    Ok(path)
}
