//! Persistence round-trip and edge case tests.
//!
//! Covers JSON file I/O and config round-trips through [`ConfigStore`].

use std::path::PathBuf;
use tempfile::TempDir;

use crate::config::{ConfigStore, LogLevel, MagnetConfig};
use crate::persistence::{ensure_dir, load_json, load_json_or_default, save_json};

// ============================================================================
// JSON Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_save_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let nested_path = temp_dir.path().join("deeply").join("nested").join("test.json");

    let data = serde_json::json!({"key": "value"});

    save_json(&nested_path, &data).await.unwrap();
    assert!(nested_path.exists());
}

#[tokio::test]
async fn test_load_nonexistent_file() {
    let file_path = PathBuf::from("/nonexistent/path/config.json");

    let result: Result<MagnetConfig, _> = load_json(&file_path).await;
    assert!(result.is_err());

    let fallback: MagnetConfig = load_json_or_default(&file_path).await;
    assert_eq!(fallback, MagnetConfig::default());
}

#[tokio::test]
async fn test_ensure_dir_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let dir_path = temp_dir.path().join("test_dir");

    ensure_dir(&dir_path).await.unwrap();
    ensure_dir(&dir_path).await.unwrap();

    assert!(dir_path.is_dir());
}

#[tokio::test]
async fn test_atomic_write() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("atomic.json");

    save_json(&file_path, &MagnetConfig::default()).await.unwrap();

    assert!(!file_path.with_extension("json.tmp").exists());
    assert!(file_path.exists());
}

#[tokio::test]
async fn test_malformed_json_falls_back_to_default() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("broken.json");
    tokio::fs::write(&file_path, "{ not json").await.unwrap();

    let loaded: MagnetConfig = load_json_or_default(&file_path).await;
    assert_eq!(loaded, MagnetConfig::default());
}

// ============================================================================
// Config Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_config_full_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("config.json");

    let config = MagnetConfig {
        base_url: "https://api.example.com".into(),
        client_id: "client-42".into(),
        auth_enabled: false,
        request_timeout_secs: 12,
        token_refresh_timeout_secs: 3,
        database_path: Some(temp_dir.path().join("db.sqlite")),
        log_level: LogLevel::Trace,
        ..Default::default()
    };

    save_json(&file_path, &config).await.unwrap();
    let loaded: MagnetConfig = load_json(&file_path).await.unwrap();

    assert_eq!(loaded, config);
}

#[tokio::test]
async fn test_config_store_save_and_reload() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("config.json");

    let store = ConfigStore::load(file_path.clone()).await.unwrap();
    assert_eq!(store.get().await, MagnetConfig::default());

    store
        .update(|c| {
            c.client_id = "abc".into();
            c.log_level = LogLevel::Debug;
        })
        .await;
    store.save().await.unwrap();

    let reloaded = ConfigStore::load(file_path).await.unwrap();
    let config = reloaded.get().await;
    assert_eq!(config.client_id, "abc");
    assert_eq!(config.log_level, LogLevel::Debug);
}

#[tokio::test]
async fn test_load_json_with_unknown_fields() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("extra_fields.json");

    let json = r#"{
        "client_id": "x",
        "websocket_url": "wss://ignored",
        "nested_unknown": {"key": "value"}
    }"#;
    tokio::fs::write(&file_path, json).await.unwrap();

    let loaded: MagnetConfig = load_json(&file_path).await.unwrap();
    assert_eq!(loaded.client_id, "x");
    assert_eq!(loaded.rest_base_path, "/api/");
}

#[cfg(unix)]
#[tokio::test]
async fn test_config_file_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("private").join("config.json");

    ConfigStore::new(file_path.clone()).save().await.unwrap();

    let mode = std::fs::metadata(&file_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
