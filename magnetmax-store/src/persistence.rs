//! File persistence helpers.
//!
//! Locates the SDK's config and data directories and reads/writes JSON
//! files with owner-only permissions.

use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Directory name under the platform config/cache roots.
const APP_DIR: &str = "magnetmax";

/// File name of the on-device database.
const DATABASE_FILE: &str = "magnetmax.db";

/// File name of the SDK configuration.
const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Default Paths
// ============================================================================

/// Returns the default configuration directory.
///
/// - macOS: `~/Library/Application Support/magnetmax`
/// - Linux: `~/.config/magnetmax`
/// - Windows: `%APPDATA%\magnetmax`
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|c| c.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the default data directory holding the database.
///
/// - macOS: `~/Library/Caches/magnetmax`
/// - Linux: `~/.cache/magnetmax`
/// - Windows: `%LOCALAPPDATA%\magnetmax`
pub fn default_data_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|c| c.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the default config file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE)
}

/// Returns the default database path.
pub fn default_database_path() -> PathBuf {
    default_data_dir().join(DATABASE_FILE)
}

// ============================================================================
// Permissions
// ============================================================================

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    std::fs::set_permissions(path, perms)?;
    debug!(path = %path.display(), mode = format!("{mode:o}"), "Restricted permissions");
    Ok(())
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<(), StoreError> {
    Ok(())
}

/// Ensures a directory exists and is accessible only by the owner.
///
/// Synchronous so it can run before a database connection is opened.
pub fn ensure_dir_sync(path: &Path) -> Result<(), StoreError> {
    if !path.exists() {
        debug!(path = %path.display(), "Creating directory");
        std::fs::create_dir_all(path)?;
        restrict(path, 0o700)?;
    }
    Ok(())
}

/// Async wrapper around [`ensure_dir_sync`].
pub async fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || ensure_dir_sync(&path))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

// ============================================================================
// JSON Files
// ============================================================================

/// Saves data as pretty JSON, atomically (temp file + rename), 0600.
pub async fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }

    let json = serde_json::to_string_pretty(data)?;
    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, &json).await?;
    tokio::fs::rename(&temp_path, path).await?;
    restrict(path, 0o600)?;

    debug!(path = %path.display(), bytes = json.len(), "Saved JSON file");
    Ok(())
}

/// Loads data from a JSON file.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = tokio::fs::read_to_string(path).await?;
    let data = serde_json::from_str(&content)?;
    debug!(path = %path.display(), "Loaded JSON file");
    Ok(data)
}

/// Loads data from a JSON file, falling back to `T::default()`.
///
/// A missing file is silent; a malformed one is logged.
pub async fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match load_json(path).await {
        Ok(data) => data,
        Err(StoreError::Io(_)) => T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to load, using defaults");
            T::default()
        }
    }
}
