//! Configuration management for the tracker.

use crate::{is_valid_table_name, CoreError, CoreResult, OverflowPolicy, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default collection endpoint (can be baked in at compile time via TRACKER_ENDPOINT_URL).
pub const DEFAULT_ENDPOINT_URL: Option<&str> = option_env!("TRACKER_ENDPOINT_URL");

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default queue table name.
pub const DEFAULT_TABLE_NAME: &str = "events";

/// Default batching delay.
pub const DEFAULT_BATCHING_DELAY_MS: u64 = 10_000;

/// Upper bound for any batching delay.
pub const MAX_BATCHING_DELAY_MS: u64 = 60_000;

/// Default cap on persisted rows per table.
pub const DEFAULT_MAX_QUEUED_EVENTS: usize = 1_000;

/// Default number of rows fetched per flush.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Default lower bound between a failed flush and the next attempt.
pub const DEFAULT_MIN_RETRY_INTERVAL_MS: u64 = 1_000;

/// Default HTTP user agent.
pub const DEFAULT_USER_AGENT: &str = concat!("tracker-delivery/", env!("CARGO_PKG_VERSION"));

/// An additional destination that receives a copy of every tracked event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateAccountConfig {
    pub account_id: i64,
    pub application_id: i64,
    /// Event names never copied to this destination.
    #[serde(default)]
    pub disabled_events: Vec<String>,
}

/// Sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Collection endpoint. Nothing is accepted until this is set.
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: Option<String>,
    /// Window during which events accumulate before a flush.
    #[serde(default = "default_batching_delay_ms")]
    pub batching_delay_ms: u64,
    /// Queue table inside the database file.
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Maximum rows kept in the queue table.
    #[serde(default = "default_max_queued_events")]
    pub max_queued_events: usize,
    /// Maximum rows sent in one request.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// What to drop when the queue is full.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Lower bound between a failed flush and the retry.
    #[serde(default = "default_min_retry_interval_ms")]
    pub min_retry_interval_ms: u64,
    /// Optional per-request timeout. None leaves the transport defaults alone.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// User-Agent header for delivery requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Extra destinations receiving cloned events.
    #[serde(default)]
    pub duplicate_accounts: Vec<DuplicateAccountConfig>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_endpoint_url() -> Option<String> {
    DEFAULT_ENDPOINT_URL.map(|s| s.to_string())
}

fn default_batching_delay_ms() -> u64 {
    DEFAULT_BATCHING_DELAY_MS
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_max_queued_events() -> usize {
    DEFAULT_MAX_QUEUED_EVENTS
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_min_retry_interval_ms() -> u64 {
    DEFAULT_MIN_RETRY_INTERVAL_MS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            endpoint_url: default_endpoint_url(),
            batching_delay_ms: DEFAULT_BATCHING_DELAY_MS,
            table_name: default_table_name(),
            max_queued_events: DEFAULT_MAX_QUEUED_EVENTS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            overflow_policy: OverflowPolicy::default(),
            min_retry_interval_ms: DEFAULT_MIN_RETRY_INTERVAL_MS,
            request_timeout_secs: None,
            user_agent: default_user_agent(),
            duplicate_accounts: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the config file if present, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `TRACKER_*` overrides from an arbitrary lookup.
    ///
    /// Unparsable numeric overrides are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup("TRACKER_LOG_LEVEL").and_then(non_empty) {
            self.log_level = log_level;
        }
        if let Some(endpoint) = lookup("TRACKER_ENDPOINT_URL").and_then(non_empty) {
            self.endpoint_url = Some(endpoint);
        }
        if let Some(delay) = lookup("TRACKER_BATCHING_DELAY_MS")
            .and_then(non_empty)
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            self.batching_delay_ms = delay;
        }
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batching_delay_ms > MAX_BATCHING_DELAY_MS {
            return Err(CoreError::Config(format!(
                "batching_delay_ms must be at most {}, got {}",
                MAX_BATCHING_DELAY_MS, self.batching_delay_ms
            )));
        }
        if self.max_queued_events == 0 {
            return Err(CoreError::Config(
                "max_queued_events must be positive".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(CoreError::Config("max_batch_size must be positive".to_string()));
        }
        if !is_valid_table_name(&self.table_name) {
            return Err(CoreError::Config(format!(
                "invalid table name: {:?}",
                self.table_name
            )));
        }
        self.endpoint_url()?;
        for account in &self.duplicate_accounts {
            if account.account_id <= 0 || account.application_id <= 0 {
                return Err(CoreError::Config(format!(
                    "duplicate account ids must be positive (account {}, application {})",
                    account.account_id, account.application_id
                )));
            }
        }
        Ok(())
    }

    /// The endpoint as a parsed URL, if one is configured.
    pub fn endpoint_url(&self) -> CoreResult<Option<Url>> {
        self.endpoint_url
            .as_deref()
            .map(parse_endpoint_url)
            .transpose()
    }

    pub fn batching_delay(&self) -> Duration {
        Duration::from_millis(self.batching_delay_ms)
    }

    pub fn min_retry_interval(&self) -> Duration {
        Duration::from_millis(self.min_retry_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Parse a collection endpoint; only http and https are accepted.
pub fn parse_endpoint_url(raw: &str) -> CoreResult<Url> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CoreError::Config(format!(
            "endpoint scheme must be http or https, got {other}"
        ))),
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
        assert_eq!(config.batching_delay(), Duration::from_secs(10));
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert!(config.request_timeout().is_none());
        assert!(config.duplicate_accounts.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "endpoint_url": "https://collect.example.com/v1/batch",
            "overflow_policy": "reject_new",
            "duplicate_accounts": [
                { "account_id": 7, "application_id": 9, "disabled_events": ["purchase"] }
            ]
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.overflow_policy, OverflowPolicy::RejectNew);
        assert_eq!(config.batching_delay_ms, DEFAULT_BATCHING_DELAY_MS);
        assert_eq!(config.duplicate_accounts.len(), 1);
        assert_eq!(config.duplicate_accounts[0].disabled_events, vec!["purchase"]);

        let url = config.endpoint_url().unwrap().unwrap();
        assert_eq!(url.host_str(), Some("collect.example.com"));
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.endpoint_url = Some("http://localhost:9000/ingest".to_string());
        config.batching_delay_ms = 250;
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.endpoint_url, config.endpoint_url);
        assert_eq!(loaded.batching_delay_ms, 250);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("TRACKER_LOG_LEVEL", "trace"),
            ("TRACKER_ENDPOINT_URL", "https://override.example.com"),
            ("TRACKER_BATCHING_DELAY_MS", "0"),
        ]));

        assert_eq!(config.log_level, "trace");
        assert_eq!(
            config.endpoint_url.as_deref(),
            Some("https://override.example.com")
        );
        assert_eq!(config.batching_delay_ms, 0);
    }

    #[test]
    fn test_overrides_ignore_garbage() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("TRACKER_LOG_LEVEL", "   "),
            ("TRACKER_BATCHING_DELAY_MS", "soon"),
        ]));

        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.batching_delay_ms, DEFAULT_BATCHING_DELAY_MS);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.batching_delay_ms = MAX_BATCHING_DELAY_MS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_queued_events = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.table_name = "events; DROP TABLE x".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.duplicate_accounts.push(DuplicateAccountConfig {
            account_id: 0,
            application_id: 1,
            disabled_events: vec![],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_endpoint_url() {
        assert!(parse_endpoint_url("https://collect.example.com").is_ok());
        assert!(parse_endpoint_url("http://127.0.0.1:8080/batch").is_ok());
        assert!(matches!(
            parse_endpoint_url("ftp://collect.example.com"),
            Err(CoreError::Config(_))
        ));
        assert!(matches!(
            parse_endpoint_url("not a valid url"),
            Err(CoreError::InvalidUrl(_))
        ));
    }
}
