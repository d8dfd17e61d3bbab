//! Integration tests for configuration parsing
//!
//! Tests connector configuration files, including:
//! - Minimal and full files
//! - Defaults for omitted sections
//! - Invalid configuration handling
//! - Command line overrides applied before validation
//! - Save/load through the filesystem

use common::LogFormat;
use server::config::{ConnectorConfig, Overrides};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[server]
listen = "127.0.0.1:12346"
log_level = "debug"
log_format = "json"
service_mode = true

[device]
serial = "1234567"
read_timeout_ms = 5000
retry_attempts = 3

[security]
host_header_allowlist_enabled = true
host_header_allowlist = ["localhost", "hsm.example.internal"]
"#;

fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("connector.toml");
    fs::write(&path, content).unwrap();
    (dir, path)
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_full_config() {
    let (_dir, path) = write_config(FULL_CONFIG);
    let config = ConnectorConfig::load(&path).unwrap();

    assert_eq!(config.server.listen, "127.0.0.1:12346");
    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.server.log_format, LogFormat::Json);
    assert!(config.server.service_mode);
    assert_eq!(config.serial().unwrap().as_str(), "0001234567");

    let options = config.proxy_options();
    assert_eq!(options.attempts, 3);
    assert_eq!(options.read_timeout, Some(Duration::from_secs(5)));

    assert_eq!(
        config.host_allowlist(),
        Some(vec![
            "localhost".to_string(),
            "hsm.example.internal".to_string()
        ])
    );
}

#[test]
fn test_empty_file_uses_defaults() {
    let (_dir, path) = write_config("");
    let config = ConnectorConfig::load(&path).unwrap();

    assert_eq!(config.server.listen, "localhost:12345");
    assert_eq!(config.server.log_format, LogFormat::Text);
    assert!(config.serial().unwrap().is_any());
    assert_eq!(config.proxy_options().attempts, 2);
    assert_eq!(config.proxy_options().read_timeout, None);
    assert_eq!(config.host_allowlist(), None);
}

#[test]
fn test_partial_section_fills_defaults() {
    let (_dir, path) = write_config("[device]\nserial = \"9\"\n");
    let config = ConnectorConfig::load(&path).unwrap();

    assert_eq!(config.serial().unwrap().as_str(), "0000000009");
    assert_eq!(config.device.retry_attempts, 2);
    assert_eq!(config.server.log_level, "info");
}

// ============================================================================
// Invalid Configuration
// ============================================================================

#[test]
fn test_invalid_files_rejected() {
    let cases = [
        "[server]\nlog_level = \"loud\"\n",
        "[server]\nlisten = \"localhost\"\n",
        "[server]\nlog_format = \"xml\"\n",
        "[device]\nserial = \"12345678901\"\n",
        "[device]\nserial = \"abc\"\n",
        "[device]\nretry_attempts = 0\n",
        "[security]\nhost_header_allowlist_enabled = true\nhost_header_allowlist = []\n",
        "this is not toml",
    ];
    for content in cases {
        let (_dir, path) = write_config(content);
        let result = ConnectorConfig::load(&path).and_then(|c| c.validate());
        assert!(result.is_err(), "{}", content);
    }
}

#[test]
fn test_bad_file_values_replaced_by_overrides() {
    let (_dir, path) = write_config(
        "[server]\nlog_level = \"loud\"\n\n[device]\nserial = \"not-a-serial\"\n",
    );
    let (mut config, _) = ConnectorConfig::resolve(Some(&path)).unwrap();
    assert!(config.validate().is_err());

    config.apply(Overrides {
        serial: Some("42".to_string()),
        log_level: Some("warn".to_string()),
        ..Overrides::default()
    });
    config.validate().unwrap();
    assert_eq!(config.serial().unwrap().as_str(), "0000000042");
    assert_eq!(config.server.log_level, "warn");
}

#[test]
fn test_missing_explicit_file_is_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(ConnectorConfig::resolve(Some(&path)).is_err());
}

#[test]
fn test_resolve_explicit_path() {
    let (_dir, path) = write_config(FULL_CONFIG);
    let (config, found) = ConnectorConfig::resolve(Some(&path)).unwrap();
    assert_eq!(found.as_deref(), Some(path.as_path()));
    assert_eq!(config.server.listen, "127.0.0.1:12346");
}

// ============================================================================
// Save / Overrides
// ============================================================================

#[test]
fn test_save_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("connector.toml");

    let mut config = ConnectorConfig::default();
    config.device.serial = Some("77".to_string());
    config.security.host_header_allowlist_enabled = true;
    config.save(&path).unwrap();

    let loaded = ConnectorConfig::load(&path).unwrap();
    assert_eq!(loaded.device.serial.as_deref(), Some("77"));
    assert!(loaded.host_allowlist().is_some());
}

#[test]
fn test_generated_config_is_valid() {
    let generated = ConnectorConfig::default().to_toml().unwrap();
    let (_dir, path) = write_config(&generated);
    ConnectorConfig::load(&path).unwrap().validate().unwrap();
}

#[test]
fn test_overrides_can_invalidate() {
    let mut config = ConnectorConfig::default();
    config.apply(Overrides {
        serial: Some("not-a-serial".to_string()),
        ..Overrides::default()
    });
    assert!(config.validate().is_err());
}

#[test]
fn test_search_paths() {
    let paths = ConnectorConfig::search_paths();
    assert_eq!(paths.len(), 3);
    assert!(paths.iter().all(|p| p.ends_with("hsm-connector/connector.toml")));
    assert_eq!(paths[0], ConnectorConfig::default_path());
}
