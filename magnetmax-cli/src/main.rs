// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! `MagnetMax` CLI - drive the client SDK from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Write a starter config and store the client secret
//! magnetmax config init
//! magnetmax config set-secret "$CLIENT_SECRET"
//!
//! # Cached GET, served from cache for 60 seconds
//! magnetmax call GET /api/com.magnet.server/channels --cache-age 60
//!
//! # Reliable POST that waits for Wi-Fi
//! magnetmax call POST /api/events --body '{"k":"v"}' --reliable --wifi-only
//!
//! # Inspect or drop the reliable queue
//! magnetmax pending
//! magnetmax pending --clear
//!
//! # JSON output
//! magnetmax --format json --pretty pending
//! ```

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use magnetmax_store::LogLevel;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{cache, call, config, pending};

// ============================================================================
// CLI Definition
// ============================================================================

/// `MagnetMax` CLI - cached and reliable calls against a `MagnetMax` server.
#[derive(Parser)]
#[command(name = "magnetmax")]
#[command(about = "Cached and reliable calls against a MagnetMax server")]
#[command(long_about = r#"
MagnetMax issues authenticated calls with response caching and
"fire eventually" delivery of reliable calls.

Examples:
  magnetmax call GET /api/channels --cache-age 60
  magnetmax call POST /api/events --body '{}' --reliable --wifi-only
  magnetmax pending
  magnetmax cache clear
  magnetmax config show
"#)]
#[command(version)]
#[command(author = "MagnetMax Contributors")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the platform config dir).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json).
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Verbose output (show debug info).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Quiet mode (minimal output).
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Issue a call through the client pipeline.
    Call(call::CallArgs),

    /// List or clear persisted reliable calls.
    #[command(visible_alias = "p")]
    Pending(pending::PendingArgs),

    /// Manage the response cache.
    Cache(cache::CacheArgs),

    /// Manage configuration.
    Config(config::ConfigArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text with colors.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// CLI exit codes.
#[repr(i32)]
pub enum ExitCode {
    /// Success.
    Success = 0,
    /// General error.
    Error = 1,
    /// The server answered with a non-success status.
    HttpStatus = 2,
    /// The call was deferred rather than sent.
    Deferred = 3,
}

// ============================================================================
// Logging Setup
// ============================================================================

/// `--verbose` wins over the configured level.
fn log_directives(verbose: bool, level: LogLevel) -> String {
    if verbose {
        "magnetmax=debug,info".to_string()
    } else {
        format!("magnetmax={level}")
    }
}

fn setup_logging(verbose: bool, quiet: bool, level: LogLevel) {
    if quiet {
        return;
    }

    let filter = EnvFilter::new(log_directives(verbose, level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // An unreadable config falls back to the default level; the command
    // itself reports the error.
    let level = match commands::load_config(&cli).await {
        Ok(store) => store.get().await.log_level,
        Err(_) => LogLevel::default(),
    };
    setup_logging(cli.verbose, cli.quiet, level);

    let result = match &cli.command {
        Commands::Call(args) => call::run(args, &cli).await,
        Commands::Pending(args) => pending::run(args, &cli).await,
        Commands::Cache(args) => cache::run(args, &cli).await,
        Commands::Config(args) => config::run(args, &cli).await,
    };

    match result {
        Ok(ExitCode::Success) => Ok(()),
        Ok(code) => std::process::exit(code as i32),
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e:#}");
            }
            std::process::exit(ExitCode::Error as i32);
        }
    }
}
