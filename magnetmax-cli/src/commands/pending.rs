//! Pending command - inspect the reliable-call queue.

use anyhow::Result;
use clap::Args;
use magnetmax_store::ReliableRequestStore;
use tracing::info;

use super::{load_config, open_database};
use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for the pending command.
#[derive(Args, Debug, Default)]
pub struct PendingArgs {
    /// Drop every pending reliable call.
    #[arg(long)]
    pub clear: bool,
}

/// Runs the pending command.
pub async fn run(args: &PendingArgs, cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli).await?.get().await;
    let store = ReliableRequestStore::new(open_database(&config)?);

    if args.clear {
        let removed = store.clear_pending_calls()?;
        info!(removed, "Cleared reliable calls");
        match cli.format {
            OutputFormat::Text => println!("Removed {removed} pending call(s)"),
            OutputFormat::Json => {
                let formatter = JsonFormatter::new(cli.pretty);
                println!("{}", formatter.format(&serde_json::json!({ "removed": removed }))?);
            }
        }
        return Ok(ExitCode::Success);
    }

    // Reading the list also prunes expired rows.
    let entities = store.get_all_cached_request_entities()?;
    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            println!("{}", formatter.format_pending(&entities));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_pending(&entities)?);
        }
    }
    Ok(ExitCode::Success)
}
