//! CLI command implementations.

pub mod cache;
pub mod call;
pub mod config;
pub mod pending;

use std::sync::Arc;

use anyhow::{Context, Result};
use magnetmax_store::{ConfigStore, Database, MagnetConfig};

use crate::Cli;

/// Loads the config from `--config` or the default location.
pub async fn load_config(cli: &Cli) -> Result<ConfigStore> {
    let store = match &cli.config {
        Some(path) => ConfigStore::load(path.clone()).await,
        None => ConfigStore::load_default().await,
    };
    store.context("Failed to load config")
}

/// Opens the on-device database named by `config`.
pub fn open_database(config: &MagnetConfig) -> Result<Arc<Database>> {
    let path = config.database_path();
    let db = Database::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(db))
}
