//! CLI command implementations

pub mod config;
pub mod init;
pub mod load;
pub mod status;

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::config::LoaderConfig;
use crate::database::{self, LoadStore};

/// Options shared by commands that open the target store
#[derive(Debug, Clone, Default)]
pub struct StoreArgs {
    /// Explicit configuration file (otherwise `.raw-loader.toml` in the working directory)
    pub config: Option<PathBuf>,
    /// Connection URL or DuckDB path
    pub database_url: Option<String>,
    /// Backend name ("postgres" or "duckdb")
    pub backend: Option<String>,
    /// Target schema
    pub schema: Option<String>,
}

impl StoreArgs {
    /// Read the configuration file and environment, then apply these flags
    pub fn resolve_config(&self) -> Result<LoaderConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    return Err(CliError::FileNotFound(path.clone()));
                }
                LoaderConfig::load_file(path).map_err(|e| CliError::ConfigError(e.to_string()))?
            }
            None => {
                let cwd = std::env::current_dir().map_err(|e| {
                    CliError::IoError(format!("Failed to read working directory: {}", e))
                })?;
                LoaderConfig::load(&cwd).map_err(|e| CliError::ConfigError(e.to_string()))?
            }
        };

        self.apply(&mut config)?;
        Ok(config)
    }

    /// Override configuration values with command-line flags
    pub fn apply(&self, config: &mut LoaderConfig) -> Result<(), CliError> {
        if let Some(url) = &self.database_url {
            config.database.url = Some(url.clone());
        }

        if let Some(backend) = &self.backend {
            config.database.backend = Some(backend.parse().map_err(CliError::InvalidArgument)?);
        }

        if let Some(schema) = &self.schema {
            config.database.schema = schema.clone();
        }

        Ok(())
    }
}

/// Single-threaded runtime the commands run on
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::IoError(format!("Failed to create runtime: {}", e)))
}

/// Connect to the configured store
pub(crate) async fn open_store(config: &LoaderConfig) -> Result<Box<dyn LoadStore>, CliError> {
    let url = config
        .database_url()
        .map_err(|e| CliError::ConfigError(e.to_string()))?;
    let backend = config
        .backend_type()
        .map_err(|e| CliError::ConfigError(e.to_string()))?;
    let tables = config
        .tables()
        .map_err(|e| CliError::ConfigError(e.to_string()))?;

    database::connect(backend, url, tables)
        .await
        .map_err(|e| CliError::DatabaseError(e.to_string()))
}
