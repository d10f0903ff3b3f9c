use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::udp::{AdapterConfig, HandlerConfig};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub udp: UdpConfig,
    pub semtech: SemtechConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub bind: String,
    /// Largest datagram accepted, in bytes
    pub read_buffer: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SemtechConfig {
    /// Bounded wait for a downlink answer to each uplink
    pub downlink_wait_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }

    pub fn adapter(&self) -> AdapterConfig {
        AdapterConfig {
            bind: self.udp.bind.clone(),
            read_buffer: self.udp.read_buffer,
            queue_capacity: self.udp.queue_capacity,
        }
    }

    pub fn handler(&self) -> HandlerConfig {
        HandlerConfig {
            downlink_wait: Duration::from_millis(self.semtech.downlink_wait_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udp: UdpConfig::default(),
            semtech: SemtechConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        let adapter = AdapterConfig::default();
        Self {
            bind: adapter.bind,
            read_buffer: adapter.read_buffer,
            queue_capacity: adapter.queue_capacity,
        }
    }
}

impl Default for SemtechConfig {
    fn default() -> Self {
        Self {
            downlink_wait_ms: HandlerConfig::default().downlink_wait.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
