//! Command-line interface for the `raw-loader` binary

pub mod commands;
pub mod error;
pub mod logging;

pub use error::CliError;
