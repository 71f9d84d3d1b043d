//! Secure storage for SDK credentials.
//!
//! The client secret and the user's refresh token never touch the config
//! file. They live in the system's credential store:
//! - macOS: Keychain Services
//! - Windows: Credential Manager
//! - Linux: Secret Service (GNOME Keyring, KDE Wallet)
//!
//! ## Usage
//!
//! ```ignore
//! use magnetmax_store::keychain::{keys, KeyringSecretStore, SecretStore};
//!
//! let secrets = KeyringSecretStore::for_client("my-client-id");
//! secrets.set(keys::CLIENT_SECRET, "s3cr3t")?;
//! let secret = secrets.get(keys::CLIENT_SECRET)?;
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};

use keyring::Entry;
use tracing::debug;

use crate::error::StoreError;

/// Service name prefix for `MagnetMax` credentials.
const SERVICE_PREFIX: &str = "MagnetMax";

/// Well-known secret names.
pub mod keys {
    /// OAuth client secret of the application.
    pub const CLIENT_SECRET: &str = "client_secret";
    /// Refresh token of the signed-in user.
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Access token of the signed-in user.
    pub const USER_TOKEN: &str = "user_token";
}

/// Key/value storage for secrets.
pub trait SecretStore: Send + Sync + Debug {
    /// Reads a secret; `Ok(None)` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a secret.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes a secret. Deleting an absent secret is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// System Keychain
// ============================================================================

/// Secret store backed by the system keychain.
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    /// Creates a store whose entries live under `MagnetMax-<client_id>`.
    pub fn for_client(client_id: &str) -> Self {
        Self {
            service: service_name(client_id),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service, key)
            .map_err(|e| StoreError::Keychain(format!("Failed to create keychain entry: {e}")))
    }
}

fn service_name(client_id: &str) -> String {
    format!("{SERVICE_PREFIX}-{client_id}")
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Keychain(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::Keychain(format!("Failed to store {key}: {e}")))?;
        debug!(service = %self.service, key, "Secret stored in keychain");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, key, "Secret deleted from keychain");
                Ok(())
            }
            Err(e) => Err(StoreError::Keychain(format!("Failed to delete {key}: {e}"))),
        }
    }
}

// ============================================================================
// In-Memory
// ============================================================================

/// Process-local secret store, for tests and hosts without a keychain.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
