//! Config command - manage configuration.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use magnetmax_store::keychain::keys;
use magnetmax_store::{KeyringSecretStore, SecretStore, default_config_dir};
use tracing::info;

use super::load_config;
use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration.
    Show,

    /// Show configuration paths.
    Path,

    /// Write a config file with the given server and client id.
    Init {
        /// Server base URL.
        #[arg(long)]
        base_url: Option<String>,

        /// OAuth client id of the application.
        #[arg(long)]
        client_id: Option<String>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Store the client secret in the system keychain.
    SetSecret {
        /// The client secret.
        secret: String,
    },
}

/// Runs the config command.
pub async fn run(args: &ConfigArgs, cli: &Cli) -> Result<ExitCode> {
    match &args.action {
        ConfigAction::Show => show_config(cli).await?,
        ConfigAction::Path => show_paths(cli).await?,
        ConfigAction::Init {
            base_url,
            client_id,
            force,
        } => init_config(base_url.as_deref(), client_id.as_deref(), *force, cli).await?,
        ConfigAction::SetSecret { secret } => set_secret(secret, cli).await?,
    }
    Ok(ExitCode::Success)
}

async fn show_config(cli: &Cli) -> Result<()> {
    let store = load_config(cli).await?;
    let config = store.get().await;

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            println!("{}", formatter.format_config(&config, store.path()));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format(&config)?);
        }
    }

    Ok(())
}

async fn show_paths(cli: &Cli) -> Result<()> {
    let store = load_config(cli).await?;
    let config_dir = default_config_dir();
    let database = store.get().await.database_path();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration Paths");
            println!("{}", "─".repeat(40));
            println!();
            println!("Config dir:    {}", config_dir.display());
            println!("Config file:   {}", store.path().display());
            println!("Database:      {}", database.display());
        }
        OutputFormat::Json => {
            let paths = serde_json::json!({
                "config_dir": config_dir.display().to_string(),
                "config_file": store.path().display().to_string(),
                "database": database.display().to_string(),
            });
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format(&paths)?);
        }
    }

    Ok(())
}

async fn init_config(
    base_url: Option<&str>,
    client_id: Option<&str>,
    force: bool,
    cli: &Cli,
) -> Result<()> {
    let store = load_config(cli).await?;
    if store.path().exists() && !force {
        bail!(
            "{} already exists, use --force to overwrite",
            store.path().display()
        );
    }

    store
        .update(|config| {
            if let Some(url) = base_url {
                config.base_url = url.to_string();
            }
            if let Some(id) = client_id {
                config.client_id = id.to_string();
            }
        })
        .await;
    store.get().await.validate()?;
    store.save().await?;

    info!(path = %store.path().display(), "Config written");
    println!("Wrote {}", store.path().display());
    Ok(())
}

async fn set_secret(secret: &str, cli: &Cli) -> Result<()> {
    let config = load_config(cli).await?.get().await;
    if config.client_id.is_empty() {
        bail!("Set client_id first (magnetmax config init --client-id ...)");
    }

    KeyringSecretStore::for_client(&config.client_id).set(keys::CLIENT_SECRET, secret)?;

    info!(client_id = %config.client_id, "Client secret stored");
    println!("Stored client secret for {}", config.client_id);
    Ok(())
}
