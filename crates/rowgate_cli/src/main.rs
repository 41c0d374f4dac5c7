//! Rowgate CLI
//!
//! Command-line tools for rowgate.
//!
//! # Commands
//!
//! - `plan` - Validate an operation and print the statement it renders to
//! - `schedule` - Print a retry schedule and its worst-case duration
//! - `rehearse` - Import a CSV file into an in-memory table and report the result

mod commands;

use clap::{Parser, Subcommand};
use rowgate_batch::{ImportOptions, DEFAULT_MAX_RECORD_LEN};
use rowgate_core::{RetryConfig, DEFAULT_MAX_IDENTIFIER_LEN};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Rowgate command-line tools.
#[derive(Parser)]
#[command(name = "rowgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an operation and print its parameterized statement
    Plan {
        /// Operation kind (insert, select_all, select_filtered, update, delete)
        kind: String,

        /// Target table
        table: String,

        /// Column values as a JSON object
        #[arg(long)]
        values: Option<String>,

        /// Equality conditions as a JSON object
        #[arg(long = "where")]
        filter: Option<String>,

        /// SQL dialect (mysql, postgres)
        #[arg(short, long, default_value = "mysql")]
        dialect: String,

        /// Maximum identifier length
        #[arg(long, default_value_t = DEFAULT_MAX_IDENTIFIER_LEN)]
        max_identifier_len: usize,
    },

    /// Print a retry schedule
    Schedule {
        /// Custom schedule as timeout_ms:delay_ms pairs, e.g. 200:0,400:400
        #[arg(short, long)]
        schedule: Option<String>,
    },

    /// Import a CSV file into an in-memory table and report per-row results
    Rehearse {
        /// CSV file; the table is named after it
        file: PathBuf,

        /// Export the imported table to this file
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Import empty fields as NULL
        #[arg(long)]
        empty_as_null: bool,

        /// Largest accepted CSV record, in bytes
        #[arg(long, default_value_t = DEFAULT_MAX_RECORD_LEN)]
        max_record_len: usize,

        /// Custom schedule as timeout_ms:delay_ms pairs
        #[arg(short, long)]
        schedule: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Plan {
            kind,
            table,
            values,
            filter,
            dialect,
            max_identifier_len,
        } => {
            commands::plan::run(
                &kind,
                &table,
                values.as_deref(),
                filter.as_deref(),
                &dialect,
                max_identifier_len,
                &cli.format,
            )?;
        }
        Commands::Schedule { schedule } => {
            commands::schedule::run(schedule.as_deref(), &cli.format)?;
        }
        Commands::Rehearse {
            file,
            export,
            empty_as_null,
            max_record_len,
            schedule,
        } => {
            let retry = match schedule.as_deref() {
                Some(text) => commands::schedule::parse_schedule(text)?,
                None => RetryConfig::default(),
            };
            let options = ImportOptions::new()
                .with_empty_as_null(empty_as_null)
                .with_max_record_len(max_record_len);
            commands::rehearse::run(&file, export.as_deref(), &options, retry, &cli.format)?;
        }
        Commands::Version => {
            println!("rowgate CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
