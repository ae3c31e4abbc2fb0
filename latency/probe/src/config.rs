//! Configuration loading
//!
//! Reads the YAML settings file shared by the probe and the cron
//! installer:
//!
//! ```yaml
//! latency:
//!   target_ip: 8.8.8.8
//!   num_packets: 50
//!   timeout: 1          # seconds per packet
//!   percentiles: [5, 95]
//! influxdb:
//!   host: localhost
//!   port: 8086
//!   username: ""
//!   password: ""
//!   latency_database: latency
//!   tags:
//!     site: office
//! cron:
//!   latency: "*/5 * * * *"
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use log::{info, warn};
use nettest_common::constants::*;
use nettest_common::types::{ProbeConfig, Tags};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Probe parameters
    pub latency: LatencySettings,
    /// Metrics backend connection
    pub influxdb: InfluxSettings,
    /// Job name to cron schedule
    pub cron: BTreeMap<String, String>,
}

/// `latency` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencySettings {
    /// Host to probe (name or address)
    pub target_ip: String,
    /// Echo requests per run
    pub num_packets: u32,
    /// Per-packet timeout in seconds
    pub timeout: f64,
    /// Percentiles to report, each strictly between 0 and 100
    pub percentiles: Vec<f64>,
}

impl Default for LatencySettings {
    fn default() -> Self {
        Self {
            target_ip: DEFAULT_TARGET_IP.to_string(),
            num_packets: DEFAULT_NUM_PACKETS,
            timeout: DEFAULT_TIMEOUT_SECS,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }
}

impl LatencySettings {
    /// Validate the section and build the run configuration
    ///
    /// Duplicate percentiles are dropped, keeping the first occurrence.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn probe_config(&self) -> Result<ProbeConfig, ConfigError> {
        let target_host = self.target_ip.trim();
        if target_host.is_empty() {
            return Err(ConfigError::ValidationError(
                "latency.target_ip cannot be empty".to_string(),
            ));
        }

        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "latency.timeout must be a positive number of seconds, got {}",
                self.timeout
            )));
        }
        let per_packet_timeout = Duration::try_from_secs_f64(self.timeout).map_err(|e| {
            ConfigError::ValidationError(format!(
                "latency.timeout {} is out of range: {}",
                self.timeout, e
            ))
        })?;

        let mut percentiles: Vec<f64> = Vec::with_capacity(self.percentiles.len());
        for &p in &self.percentiles {
            if !p.is_finite() || p <= 0.0 || p >= 100.0 {
                return Err(ConfigError::ValidationError(format!(
                    "latency.percentiles: {} is not strictly between 0 and 100",
                    p
                )));
            }
            if !percentiles.contains(&p) {
                percentiles.push(p);
            }
        }

        Ok(ProbeConfig {
            target_host: target_host.to_string(),
            packet_count: self.num_packets,
            per_packet_timeout,
            percentiles,
        })
    }
}

/// `influxdb` section
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxSettings {
    /// Server host
    pub host: String,
    /// HTTP API port
    pub port: u16,
    /// Username, empty for no authentication
    pub username: String,
    /// Password
    pub password: String,
    /// Database receiving the points
    pub latency_database: String,
    /// Static tags added to every point
    pub tags: Tags,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_INFLUX_HOST.to_string(),
            port: DEFAULT_INFLUX_PORT,
            username: String::new(),
            password: String::new(),
            latency_database: DEFAULT_LATENCY_DATABASE.to_string(),
            tags: Tags::new(),
        }
    }
}

impl std::fmt::Debug for InfluxSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("latency_database", &self.latency_database)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Load settings from a YAML file
    ///
    /// A missing file is not an error: the defaults are returned and a
    /// warning is logged.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse settings from YAML text; an empty document yields the defaults
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Decide which configuration file to read
///
/// An explicit path (from `--config` or `NETTEST_CONF`) wins; otherwise
/// `nettest.conf.yaml` next to the running executable is used. A
/// leading `~` is expanded to the home directory.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    let path = explicit.unwrap_or_else(default_config_path);
    expand_tilde(&path, std::env::var("HOME").ok().as_deref())
}

fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Replace a leading `~` component with `home`
pub fn expand_tilde(path: &Path, home: Option<&str>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => Path::new(home).join(rest),
        Err(_) => path.to_path_buf(),
    }
}
