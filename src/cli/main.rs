//! CLI binary entry point for raw-loader

use clap::{ArgAction, Args, Parser, Subcommand};
use raw_entity_loader::cli::commands::StoreArgs;
use raw_entity_loader::cli::commands::config::{ConfigArgs, handle_config};
use raw_entity_loader::cli::commands::init::{InitArgs, handle_init};
use raw_entity_loader::cli::commands::load::{LoadArgs, handle_load};
use raw_entity_loader::cli::commands::status::{DEFAULT_STATUS_LIMIT, StatusArgs, handle_status};
use raw_entity_loader::cli::logging::{LogConfig, LogFormat, init_logging};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "raw-loader")]
#[command(about = "Stream a JSON entity export into raw tables with change detection")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease log verbosity (-q warn, -qq error)
    #[arg(short, long, action = ArgAction::Count, global = true, conflicts_with = "verbose")]
    quiet: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Options for locating and connecting to the target store
#[derive(Args)]
struct StoreOpts {
    /// Configuration file (default: .raw-loader.toml in the working directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PostgreSQL URL or DuckDB file path (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Database backend: postgres or duckdb (default: inferred from the URL)
    #[arg(long)]
    backend: Option<String>,

    /// Schema holding the raw and audit tables
    #[arg(long)]
    schema: Option<String>,
}

impl From<StoreOpts> for StoreArgs {
    fn from(opts: StoreOpts) -> Self {
        StoreArgs {
            config: opts.config,
            database_url: opts.database_url,
            backend: opts.backend,
            schema: opts.schema,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load the source document into the raw table
    Load {
        #[command(flatten)]
        store: StoreOpts,
        /// Source JSON document
        #[arg(short, long)]
        source: Option<PathBuf>,
        /// Maximum distinct records per batch write
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Create the schema and tables before loading
        #[arg(long)]
        init_schema: bool,
        /// Print the load summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create the schema, raw table and audit table
    Init {
        #[command(flatten)]
        store: StoreOpts,
    },
    /// Show recent load runs from the audit ledger
    Status {
        #[command(flatten)]
        store: StoreOpts,
        /// Number of runs to show
        #[arg(short, long, default_value_t = DEFAULT_STATUS_LIMIT)]
        limit: usize,
        /// Print runs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a sample configuration file
    Config {
        /// Write .raw-loader.toml to the working directory instead
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_verbosity(cli.verbose, cli.quiet).with_format(cli.log_format);
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Load {
            store,
            source,
            batch_size,
            init_schema,
            json,
        } => {
            let args = LoadArgs {
                store: store.into(),
                source,
                batch_size,
                init_schema,
                json,
            };
            handle_load(&args)
        }
        Commands::Init { store } => {
            let args = InitArgs {
                store: store.into(),
            };
            handle_init(&args)
        }
        Commands::Status { store, limit, json } => {
            let args = StatusArgs {
                store: store.into(),
                limit,
                json,
            };
            handle_status(&args)
        }
        Commands::Config { write } => handle_config(&ConfigArgs { write }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
