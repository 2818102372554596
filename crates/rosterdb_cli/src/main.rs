//! Command-line entry point over the member endpoints.
//!
//! # Responsibility
//! - Open a database, optionally run the seed hook, and print one endpoint
//!   response as JSON.
//! - Keep output deterministic for quick local checks.

use clap::{Parser, Subcommand};
use rosterdb_api::{ApiContext, ListParams};
use rosterdb_core::{default_log_level, logging_status, StoreConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Query members in a rosterdb database", long_about = None)]
struct Args {
    /// SQLite file; in-memory when omitted
    #[arg(long, env = "ROSTERDB_DB_PATH")]
    db: Option<PathBuf>,

    /// Insert `user0..user{N-1}` before running the command
    #[arg(long, default_value_t = 0)]
    seed: usize,

    /// Absolute directory for rolling log files
    #[arg(long, env = "ROSTERDB_LOG_DIR")]
    log_dir: Option<String>,

    /// trace|debug|info|warn|error|off; `debug` in debug builds, else `info`
    #[arg(long, env = "ROSTERDB_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Username of one member
    Get { id: String },
    /// Same, resolving the member before the handler runs
    GetByDomain { id: String },
    /// One page of member DTOs
    List {
        #[arg(long)]
        page: Option<usize>,
        #[arg(long)]
        size: Option<usize>,
        /// `field[,asc|desc]`, repeatable
        #[arg(long)]
        sort: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(log_dir) = &args.log_dir {
        let error = rosterdb_api::init_logging(&log_level(args.log_level.as_deref()), log_dir);
        if !error.is_empty() {
            eprintln!("logging disabled: {error}");
        }
    }
    if let Some(status) = logging_status() {
        eprintln!("logging {status}");
    }

    let mut config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    config.db_path = args.db.clone();

    let context = match ApiContext::open(config) {
        Ok(context) => context,
        Err(err) => {
            eprintln!("failed to open store: {err}");
            return ExitCode::FAILURE;
        }
    };

    if args.seed > 0 {
        let seeded = context.seed_members(args.seed);
        if !seeded.is_ok() {
            return print(&seeded);
        }
    }

    match args.cmd {
        Command::Get { id } => print(&context.find_member(&id)),
        Command::GetByDomain { id } => print(&context.find_member_by_domain(&id)),
        Command::List { page, size, sort } => {
            print(&context.list_members(&ListParams { page, size, sort }))
        }
    }
}

fn print<T: Serialize>(response: &rosterdb_api::ApiResponse<T>) -> ExitCode {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("failed to encode response: {err}");
            return ExitCode::FAILURE;
        }
    }
    if response.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn log_level(explicit: Option<&str>) -> String {
    explicit.map_or_else(
        || default_log_level().as_str().to_ascii_lowercase(),
        str::to_string,
    )
}
