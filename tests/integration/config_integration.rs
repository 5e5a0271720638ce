//! Integration tests for configuration loading

use recache::config::{RecacheConfig, StoreBackend};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_defaults_without_file() {
    let config = RecacheConfig::load(None).unwrap();
    assert!(config.cache.enabled);
    assert_eq!(config.coordinator.task_ttl_seconds, 300);
}

#[test]
fn test_load_from_toml_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recache.toml");
    fs::write(
        &path,
        r#"
[cache]
enabled = true
backend = "sled"
sled_path = "/tmp/recache-it"
artifact_ttl_seconds = 7200

[coordinator]
stale_age_seconds = 43200
task_ttl_seconds = 120
max_concurrent_per_subject = 2

[logging]
level = "debug"
format = "json"
"#,
    )
    .unwrap();

    let config = RecacheConfig::load(Some(&path)).unwrap();
    assert_eq!(config.cache.backend, StoreBackend::Sled);
    assert_eq!(config.cache.artifact_ttl_seconds, Some(7200));
    assert_eq!(config.coordinator.stale_age_seconds, 43200);
    assert_eq!(config.coordinator.task_ttl_seconds, 120);
    assert_eq!(config.coordinator.max_concurrent_per_subject, 2);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_partial_file_keeps_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recache.toml");
    fs::write(
        &path,
        r#"
[coordinator]
max_concurrent_per_subject = 3
"#,
    )
    .unwrap();

    let config = RecacheConfig::load(Some(&path)).unwrap();
    assert_eq!(config.coordinator.max_concurrent_per_subject, 3);
    assert_eq!(config.coordinator.task_ttl_seconds, 300);
    assert_eq!(config.cache.backend, StoreBackend::Memory);
}

#[test]
fn test_invalid_values_rejected_at_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("recache.toml");
    fs::write(
        &path,
        r#"
[coordinator]
task_ttl_seconds = 0
"#,
    )
    .unwrap();

    assert!(RecacheConfig::load(Some(&path)).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");
    assert!(RecacheConfig::load(Some(&path)).is_err());
}
