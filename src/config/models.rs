//! Configuration data structures for the Switchyard gateway process.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! include defaults so that a minimal config only names its route repository.
//! Durations are humantime strings (`"30s"`, `"5m"`) and are parsed by the
//! accessor methods below; the validator reports unparseable values up front.
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_repository_timeout_secs() -> u64 {
    10
}

fn parse_or(raw: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(raw).unwrap_or(fallback)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub change_detector: ChangeDetectorConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Configuration serving routes from `path` with every other section at
    /// its default.
    pub fn with_file_repository(path: impl Into<String>) -> Self {
        Self {
            listen_addr: default_listen_addr(),
            repository: RepositoryConfig::File { path: path.into() },
            change_detector: ChangeDetectorConfig::default(),
            auth: None,
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where route definitions come from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum RepositoryConfig {
    /// Directory of `.json` / `.yaml` / `.yml` route files.
    File { path: String },
    /// Config service returning a JSON array of route definitions.
    Http {
        url: String,
        #[serde(default = "default_repository_timeout_secs")]
        timeout_secs: u64,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ChangeDetectorConfig {
    pub interval: String,
    pub channel_capacity: usize,
}

impl Default for ChangeDetectorConfig {
    fn default() -> Self {
        Self {
            interval: "30s".to_string(),
            channel_capacity: 16,
        }
    }
}

impl ChangeDetectorConfig {
    pub fn interval(&self) -> Duration {
        parse_or(&self.interval, Duration::from_secs(30))
    }
}

fn default_auth_timeout() -> String {
    "5s".to_string()
}

fn default_negative_ttl() -> String {
    "1m".to_string()
}

fn default_refresh_interval() -> String {
    "5m".to_string()
}

/// Authentication strategy used for routes that require it.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum AuthConfig {
    /// Validate bearer tokens against a remote authority.
    Remote {
        url: String,
        #[serde(default = "default_auth_timeout")]
        timeout: String,
        #[serde(default = "default_negative_ttl")]
        negative_ttl: String,
    },
    /// Verify HS256 tokens locally.
    Jwt {
        key_source: KeySourceConfig,
        #[serde(default = "default_refresh_interval")]
        refresh_interval: String,
        #[serde(default = "default_negative_ttl")]
        negative_ttl: String,
    },
}

impl AuthConfig {
    pub fn negative_ttl(&self) -> Duration {
        match self {
            AuthConfig::Remote { negative_ttl, .. } | AuthConfig::Jwt { negative_ttl, .. } => {
                parse_or(negative_ttl, Duration::from_secs(60))
            }
        }
    }

    /// Upper bound on one call to the remote authority.
    pub fn call_timeout(&self) -> Duration {
        match self {
            AuthConfig::Remote { timeout, .. } => parse_or(timeout, Duration::from_secs(5)),
            AuthConfig::Jwt { .. } => Duration::from_secs(5),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        match self {
            AuthConfig::Jwt {
                refresh_interval, ..
            } => parse_or(refresh_interval, Duration::from_secs(300)),
            AuthConfig::Remote { .. } => Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum KeySourceConfig {
    Env { var: String },
    Static { key: String },
    Http { url: String, field: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ShutdownConfig {
    pub drain_timeout: String,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: "30s".to_string(),
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        parse_or(&self.drain_timeout, Duration::from_secs(30))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
