//! Logging setup using `tracing-subscriber`
//!
//! Logs go to stderr so command output on stdout stays machine-readable.
//! `RUST_LOG` takes precedence over the level derived from `-v`/`-q`.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use super::error::CliError;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Multi-line human-readable format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
    /// JSON format for machine parsing
    Json,
}

/// Configuration for logging behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// Derive the level from `-v` and `-q` counts
    ///
    /// - `-qq`: error
    /// - `-q`: warn
    /// - none: info
    /// - `-v`: debug
    /// - `-vv`: trace
    pub fn from_verbosity(verbose: u8, quiet: u8) -> Self {
        let level = match (verbose, quiet) {
            (0, 0) => Level::INFO,
            (0, 1) => Level::WARN,
            (0, _) => Level::ERROR,
            (1, _) => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Filter used when `RUST_LOG` is not set
    pub fn default_filter(&self) -> String {
        self.level.to_string().to_lowercase()
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| CliError::InvalidArgument(format!("failed to initialize logging: {}", e)))
}
