// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # MagnetMax Store
//!
//! On-device persistence for the `MagnetMax` client.
//!
//! This crate provides:
//!
//! - **Database**: the shared SQLite file and its schema
//! - **ResponseCacheStore**: cached responses keyed by request fingerprint
//! - **ReliableRequestStore**: the durable queue of reliable calls
//! - **ConfigStore**: SDK configuration with persistence
//! - **SecretStore**: client secret and refresh token in the system keychain
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use magnetmax_store::{ConfigStore, Database, ReliableRequestStore, ResponseCacheStore};
//!
//! let config = ConfigStore::load_default().await?.get().await;
//! let db = Arc::new(Database::open(&config.database_path())?);
//!
//! let cache = ResponseCacheStore::new(db.clone());
//! let queue = ReliableRequestStore::new(db);
//!
//! for entity in queue.get_all_cached_request_entities()? {
//!     println!("{} {} (retries: {})", entity.http_method, entity.url, entity.retries);
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod keychain;
pub mod persistence;
pub mod reliable_requests;
pub mod response_cache;

pub use config::{ConfigStore, LogLevel, MagnetConfig};
pub use database::Database;
pub use error::StoreError;
pub use keychain::{KeyringSecretStore, MemorySecretStore, SecretStore};
pub use persistence::{
    default_config_dir, default_config_path, default_data_dir, default_database_path, ensure_dir,
    load_json, load_json_or_default, save_json,
};
pub use reliable_requests::{ReliableRequestEntity, ReliableRequestStore};
pub use response_cache::{ResponseCacheEntity, ResponseCacheStore};

#[cfg(test)]
mod persistence_tests;
