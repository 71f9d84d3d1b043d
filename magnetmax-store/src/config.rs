//! SDK configuration with persistence and change notification.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::StoreError;
use crate::persistence::{default_config_path, default_database_path, load_json, save_json};

// ============================================================================
// Config Types
// ============================================================================

/// `MagnetMax` SDK configuration.
///
/// The client secret is deliberately absent; see [`crate::keychain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagnetConfig {
    /// Server root, e.g. `https://api.magnet.example.com`.
    pub base_url: String,

    /// OAuth client id of the application.
    pub client_id: String,

    /// Attach bearer tokens and queue calls until an app token exists.
    pub auth_enabled: bool,

    /// Path prefix of the REST API.
    pub rest_base_path: String,

    /// Path prefix that mirrors the REST API with canned responses.
    pub mock_base_path: String,

    /// Default per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Upper bound on a blocking token refresh in seconds.
    pub token_refresh_timeout_secs: u64,

    /// Database location; defaults to the platform cache dir.
    pub database_path: Option<PathBuf>,

    /// Log level.
    pub log_level: LogLevel,

    /// Client-credentials login endpoint.
    pub app_auth_path: String,

    /// User login endpoint.
    pub user_login_path: String,

    /// User logout endpoint.
    pub user_logout_path: String,

    /// User token refresh endpoint.
    pub token_refresh_path: String,
}

impl Default for MagnetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8443".to_string(),
            client_id: String::new(),
            auth_enabled: true,
            rest_base_path: "/api/".to_string(),
            mock_base_path: "/mock/api/".to_string(),
            request_timeout_secs: 30,
            token_refresh_timeout_secs: 5,
            database_path: None,
            log_level: LogLevel::default(),
            app_auth_path: "/api/com.magnet.server/applications/session".to_string(),
            user_login_path: "/api/com.magnet.server/user/session".to_string(),
            user_logout_path: "/api/com.magnet.server/user/logout".to_string(),
            token_refresh_path: "/api/com.magnet.server/user/newtoken".to_string(),
        }
    }
}

impl MagnetConfig {
    /// Default per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Upper bound on a blocking token refresh.
    pub fn token_refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.token_refresh_timeout_secs)
    }

    /// Effective database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    /// Resolves a server path against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if `base_url` or the join is invalid.
    pub fn endpoint(&self, path: &str) -> Result<String, StoreError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| StoreError::Config(format!("Invalid base_url {}: {e}", self.base_url)))?;
        base.join(path)
            .map(String::from)
            .map_err(|e| StoreError::Config(format!("Invalid path {path}: {e}")))
    }

    /// Paths that own their own auth failures and are never auto-recovered.
    pub fn auth_endpoint_paths(&self) -> [&str; 4] {
        [
            &self.app_auth_path,
            &self.user_login_path,
            &self.user_logout_path,
            &self.token_refresh_path,
        ]
    }

    /// Checks the values the client cannot work without.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), StoreError> {
        Url::parse(&self.base_url)
            .map_err(|e| StoreError::Config(format!("Invalid base_url {}: {e}", self.base_url)))?;
        if self.auth_enabled && self.client_id.is_empty() {
            return Err(StoreError::Config(
                "client_id is required when auth is enabled".to_string(),
            ));
        }
        for (name, path) in [
            ("rest_base_path", &self.rest_base_path),
            ("mock_base_path", &self.mock_base_path),
        ] {
            if !path.starts_with('/') || !path.ends_with('/') {
                return Err(StoreError::Config(format!(
                    "{name} must start and end with '/': {path}"
                )));
            }
        }
        if self.token_refresh_timeout_secs == 0 {
            return Err(StoreError::Config(
                "token_refresh_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level logging.
    Error,
    /// Warning level logging.
    #[default]
    Warn,
    /// Info level logging.
    Info,
    /// Debug level logging.
    Debug,
    /// Trace level logging.
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Config Store
// ============================================================================

/// Persistent config store with change notifications.
pub struct ConfigStore {
    config: Arc<RwLock<MagnetConfig>>,
    path: PathBuf,
    notify: watch::Sender<u64>,
}

impl ConfigStore {
    /// Creates a store holding defaults, bound to `path`.
    pub fn new(path: PathBuf) -> Self {
        Self::with_config(path, MagnetConfig::default())
    }

    /// Creates a store holding `config`, bound to `path`.
    pub fn with_config(path: PathBuf, config: MagnetConfig) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
            notify,
        }
    }

    /// Loads the config from the default path.
    ///
    /// # Errors
    ///
    /// Returns error if an existing file cannot be read or parsed.
    pub async fn load_default() -> Result<Self, StoreError> {
        Self::load(default_config_path()).await
    }

    /// Loads the config from `path`; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns error if an existing file cannot be read or parsed.
    pub async fn load(path: PathBuf) -> Result<Self, StoreError> {
        let config = if path.exists() {
            info!(path = %path.display(), "Loading config");
            load_json(&path).await?
        } else {
            debug!(path = %path.display(), "Config file not found, using defaults");
            MagnetConfig::default()
        };
        if let Err(e) = config.validate() {
            warn!(error = %e, "Loaded config is incomplete");
        }
        Ok(Self::with_config(path, config))
    }

    /// Returns the file this store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gets a copy of the current config.
    pub async fn get(&self) -> MagnetConfig {
        self.config.read().await.clone()
    }

    /// Updates the config and notifies subscribers.
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut MagnetConfig),
    {
        {
            let mut config = self.config.write().await;
            f(&mut config);
        }
        self.notify.send_modify(|version| *version += 1);
    }

    /// Saves the config to disk.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub async fn save(&self) -> Result<(), StoreError> {
        let config = self.config.read().await;
        save_json(&self.path, &*config).await?;
        info!(path = %self.path.display(), "Config saved");
        Ok(())
    }

    /// Subscribes to config changes; the value is a change counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MagnetConfig {
        MagnetConfig {
            base_url: "https://api.example.com".into(),
            client_id: "client-1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = MagnetConfig::default();
        assert_eq!(config.rest_base_path, "/api/");
        assert_eq!(config.mock_base_path, "/mock/api/");
        assert_eq!(config.token_refresh_timeout(), Duration::from_secs(5));
        assert!(config.database_path().ends_with("magnetmax.db"));
    }

    #[test]
    fn test_endpoint_join() {
        let config = valid();
        assert_eq!(
            config.endpoint(&config.app_auth_path).unwrap(),
            "https://api.example.com/api/com.magnet.server/applications/session"
        );
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let missing_client = MagnetConfig {
            client_id: String::new(),
            ..valid()
        };
        assert!(missing_client.validate().is_err());

        let no_auth = MagnetConfig {
            auth_enabled: false,
            ..missing_client
        };
        assert!(no_auth.validate().is_ok());

        let bad_prefix = MagnetConfig {
            mock_base_path: "mock".into(),
            ..valid()
        };
        assert!(bad_prefix.validate().is_err());

        let bad_url = MagnetConfig {
            base_url: "::".into(),
            ..valid()
        };
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MagnetConfig =
            serde_json::from_str(r#"{"base_url": "https://x.example", "log_level": "debug"}"#)
                .unwrap();
        assert_eq!(config.base_url, "https://x.example");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_update_notifies() {
        let store = ConfigStore::new(PathBuf::from("/unused/config.json"));
        let mut rx = store.subscribe();

        store.update(|c| c.auth_enabled = false).await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
        assert!(!store.get().await.auth_enabled);
    }
}
