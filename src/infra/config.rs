//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Venue/event identifier used as a metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "gate".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// JSON key-value file holding the persisted device identity
    #[serde(default = "default_store_file")]
    pub store_file: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { store_file: default_store_file() }
    }
}

fn default_store_file() -> String {
    "state/device.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    /// Base URL of the validating authority (may embed user:pass@)
    pub base_url: String,
    /// Transport timeout for a single request
    #[serde(default = "default_authority_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_authority_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Capture mailbox capacity (1 = single slot)
    #[serde(default = "default_capture_buffer")]
    pub buffer: usize,
    /// Enable the TCP scan listener for networked scanners
    #[serde(default)]
    pub listener_enabled: bool,
    #[serde(default = "default_capture_listener_port")]
    pub listener_port: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer: default_capture_buffer(),
            listener_enabled: false,
            listener_port: default_capture_listener_port(),
        }
    }
}

fn default_capture_buffer() -> usize {
    1
}

fn default_capture_listener_port() -> u16 {
    25900
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    /// File path for the scan outcome journal (JSONL format)
    #[serde(default = "default_journal_file")]
    pub file: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { file: default_journal_file() }
    }
}

fn default_journal_file() -> String {
    "scans.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: 0 }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    device_store_file: String,
    authority_url: String,
    authority_timeout_ms: u64,
    authority_api_token: Option<String>,
    capture_buffer: usize,
    capture_listener_enabled: bool,
    capture_listener_port: u16,
    journal_file: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            device_store_file: default_store_file(),
            authority_url: "http://localhost:8080/api/tickets".to_string(),
            authority_timeout_ms: default_authority_timeout_ms(),
            authority_api_token: None,
            capture_buffer: default_capture_buffer(),
            capture_listener_enabled: false,
            capture_listener_port: default_capture_listener_port(),
            journal_file: default_journal_file(),
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: 0,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from an explicit argument or environment
    pub fn resolve_config_path(arg: Option<&str>) -> String {
        if let Some(path) = arg {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.capture.buffer == 0 {
            anyhow::bail!("capture.buffer must be at least 1 in {}", path.display());
        }
        if toml_config.authority.timeout_ms == 0 {
            anyhow::bail!("authority.timeout_ms must be at least 1 in {}", path.display());
        }

        Ok(Self {
            site_id: toml_config.site.id,
            device_store_file: toml_config.device.store_file,
            authority_url: toml_config.authority.base_url,
            authority_timeout_ms: toml_config.authority.timeout_ms,
            authority_api_token: toml_config.authority.api_token.filter(|t| !t.is_empty()),
            capture_buffer: toml_config.capture.buffer,
            capture_listener_enabled: toml_config.capture.listener_enabled,
            capture_listener_port: toml_config.capture.listener_port,
            journal_file: toml_config.journal.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn device_store_file(&self) -> &str {
        &self.device_store_file
    }

    pub fn authority_url(&self) -> &str {
        &self.authority_url
    }

    pub fn authority_timeout_ms(&self) -> u64 {
        self.authority_timeout_ms
    }

    pub fn authority_api_token(&self) -> Option<&str> {
        self.authority_api_token.as_deref()
    }

    pub fn capture_buffer(&self) -> usize {
        self.capture_buffer
    }

    pub fn capture_listener_enabled(&self) -> bool {
        self.capture_listener_enabled
    }

    pub fn capture_listener_port(&self) -> u16 {
        self.capture_listener_port
    }

    pub fn journal_file(&self) -> &str {
        &self.journal_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point at a different authority
    pub fn with_authority_url(mut self, url: &str) -> Self {
        self.authority_url = url.to_string();
        self
    }

    /// Builder method for tests to relocate the journal
    pub fn with_journal_file(mut self, file: &str) -> Self {
        self.journal_file = file.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "gate");
        assert_eq!(config.capture_buffer(), 1);
        assert_eq!(config.authority_timeout_ms(), 5000);
        assert!(config.authority_api_token().is_none());
        assert!(!config.capture_listener_enabled());
        assert_eq!(config.prometheus_port(), 0);
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/venue.toml")), "config/venue.toml");
    }

    #[test]
    fn test_journal_default() {
        let journal = JournalConfig::default();
        assert_eq!(journal.file, "scans.jsonl");
        assert_eq!(Config::default().journal_file(), "scans.jsonl");
    }

    #[test]
    fn test_minimal_toml_uses_section_defaults() {
        let parsed: TomlConfig = toml::from_str(
            r#"
[authority]
base_url = "https://tickets.example.org/api"
"#,
        )
        .unwrap();
        assert_eq!(parsed.authority.timeout_ms, 5000);
        assert_eq!(parsed.capture.buffer, 1);
        assert_eq!(parsed.device.store_file, "state/device.json");
        assert_eq!(parsed.metrics.interval_secs, 30);
    }
}
