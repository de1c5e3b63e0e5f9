use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PENDING, MAX_CHUNK_SIZE, MAX_PENDING_LIMIT, MAX_UNFRAMED_DATA,
};

pub const DEFAULT_DEVICE: &str = "tcp://127.0.0.1:24100";
pub const DEFAULT_CONFIG_FILE: &str = "audiolink.toml";

/// Timing and capacity knobs of a single link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub max_pending: usize,
    pub keepalive_interval_ms: u64,
    pub deadline_ms: u64,
    pub file_send_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub chunk_size: usize,
    pub max_unframed: usize,
    /// Answer the link's own requests, for a link wired back onto itself.
    pub loopback: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            keepalive_interval_ms: 1500,
            deadline_ms: 5000,
            file_send_interval_ms: 150,
            request_timeout_ms: 3000,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_unframed: MAX_UNFRAMED_DATA,
            loopback: false,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_PENDING_LIMIT).contains(&self.max_pending) {
            bail!("max_pending must be within 1..={}, got {}", MAX_PENDING_LIMIT, self.max_pending);
        }
        if !(1..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            bail!("chunk_size must be within 1..={}, got {}", MAX_CHUNK_SIZE, self.chunk_size);
        }
        if self.keepalive_interval_ms == 0
            || self.deadline_ms == 0
            || self.file_send_interval_ms == 0
            || self.request_timeout_ms == 0
        {
            bail!("link intervals must be non-zero");
        }
        if self.max_unframed == 0 {
            bail!("max_unframed must be non-zero");
        }
        Ok(())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn file_send_interval(&self) -> Duration {
        Duration::from_millis(self.file_send_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `tcp://host:port` or the path of an already configured serial device
    pub device: String,
    pub tick_interval_ms: u64,
    pub link: LinkConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            tick_interval_ms: 50,
            link: LinkConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Reads `path` if it exists, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&content)?;
            tracing::debug!("Loaded configuration from {:?}", path);
            config
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be non-zero");
        }
        self.link.validate()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
