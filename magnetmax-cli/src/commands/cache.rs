//! Cache command - manage the response cache.

use anyhow::Result;
use clap::{Args, Subcommand};
use magnetmax_store::ResponseCacheStore;
use tracing::info;

use super::{load_config, open_database};
use crate::output::JsonFormatter;
use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for the cache command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show how many responses are cached.
    Stats,

    /// Delete every cached response.
    Clear,
}

/// Runs the cache command.
pub async fn run(args: &CacheArgs, cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli).await?.get().await;
    let store = ResponseCacheStore::new(open_database(&config)?);

    let (label, count) = match args.action {
        CacheAction::Stats => ("cached", store.count()?),
        CacheAction::Clear => {
            let removed = store.clear()?;
            info!(removed, "Cleared response cache");
            ("removed", removed)
        }
    };

    match cli.format {
        OutputFormat::Text => println!("{count} response(s) {label}"),
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format(&serde_json::json!({ label: count }))?);
        }
    }
    Ok(ExitCode::Success)
}
