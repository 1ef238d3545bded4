use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_PORT, PACKET_BUDGET};

/// Smallest packet budget that still fits `LIST` plus one address-only
/// fragment for any IPv6 endpoint.
pub const MIN_PACKET_BUDGET: usize = 128;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Number of slots for servers that announced but have not described
    /// themselves yet
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Endpoints allowed per IP address, queued and registered combined
    #[serde(default = "default_max_per_ip")]
    pub max_per_ip: usize,
    /// Max time between ANNOUNCEs before a server is dropped
    #[serde(default = "default_server_timeout")]
    pub server_timeout_secs: u64,
    #[serde(default = "default_server_timeout")]
    pub pending_timeout_secs: u64,
    /// Pause between successive LIST packets to one client
    #[serde(default = "default_list_period")]
    pub list_period_ms: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_packet_budget")]
    pub packet_budget: usize,
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("packet_budget {0} is too small, need at least {MIN_PACKET_BUDGET}")]
    BudgetTooSmall(usize),
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_queue_size() -> usize {
    512
}

fn default_max_per_ip() -> usize {
    4
}

fn default_server_timeout() -> u64 {
    137
}

fn default_list_period() -> u64 {
    500
}

fn default_tick_interval() -> u64 {
    100
}

fn default_packet_budget() -> usize {
    PACKET_BUDGET
}

fn default_status_interval() -> u64 {
    10
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT + 1))
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            queue_size: default_queue_size(),
            max_per_ip: default_max_per_ip(),
            server_timeout_secs: default_server_timeout(),
            pending_timeout_secs: default_server_timeout(),
            list_period_ms: default_list_period(),
            tick_interval_ms: default_tick_interval(),
            packet_budget: default_packet_budget(),
            status_interval_secs: default_status_interval(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

impl MasterConfig {
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    pub fn list_period(&self) -> Duration {
        Duration::from_millis(self.list_period_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.master;
        let required = [
            ("queue_size", m.queue_size as u64),
            ("max_per_ip", m.max_per_ip as u64),
            ("server_timeout_secs", m.server_timeout_secs),
            ("pending_timeout_secs", m.pending_timeout_secs),
            ("list_period_ms", m.list_period_ms),
            ("tick_interval_ms", m.tick_interval_ms),
            ("status_interval_secs", m.status_interval_secs),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(name));
        }
        if m.packet_budget < MIN_PACKET_BUDGET {
            return Err(ConfigError::BudgetTooSmall(m.packet_budget));
        }
        Ok(())
    }
}
