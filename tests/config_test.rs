//! Integration tests for configuration loading

use gate_scanner::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "north-gate"

[device]
store_file = "/var/lib/scanner/device.json"

[authority]
base_url = "https://scanner:pw@tickets.example.org/api/tickets"
timeout_ms = 2500
api_token = "tok-123"

[capture]
buffer = 2
listener_enabled = true
listener_port = 26000

[journal]
file = "/var/log/scanner/scans.jsonl"

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "north-gate");
    assert_eq!(config.device_store_file(), "/var/lib/scanner/device.json");
    assert_eq!(config.authority_url(), "https://scanner:pw@tickets.example.org/api/tickets");
    assert_eq!(config.authority_timeout_ms(), 2500);
    assert_eq!(config.authority_api_token(), Some("tok-123"));
    assert_eq!(config.capture_buffer(), 2);
    assert!(config.capture_listener_enabled());
    assert_eq!(config.capture_listener_port(), 26000);
    assert_eq!(config.journal_file(), "/var/log/scanner/scans.jsonl");
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_empty_token_is_none() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[authority]\nbase_url = \"http://localhost:8080/api\"\napi_token = \"\"\n")
        .unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert!(config.authority_api_token().is_none());
    assert_eq!(config.capture_buffer(), 1);
}

#[test]
fn test_zero_buffer_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[authority]\nbase_url = \"http://localhost\"\n[capture]\nbuffer = 0\n")
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("capture.buffer"));
}

#[test]
fn test_zero_timeout_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[authority]\nbase_url = \"http://localhost\"\ntimeout_ms = 0\n")
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("authority.timeout_ms"));
}

#[test]
fn test_missing_authority_section_is_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[site]\nid = \"x\"\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/path/config.toml");
    assert_eq!(config.site_id(), "gate");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.authority_url(), "http://localhost:8080/api/tickets");
}

#[test]
fn test_builders_override() {
    let config = Config::default()
        .with_authority_url("http://10.0.0.5:9000/api")
        .with_journal_file("/tmp/j.jsonl");
    assert_eq!(config.authority_url(), "http://10.0.0.5:9000/api");
    assert_eq!(config.journal_file(), "/tmp/j.jsonl");
}
