//! Server configuration

use anyhow::{Context, Result};
use protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub bind_address: String,
    pub bind_port: u16,
    pub max_concurrent_clients: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub password_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub request_timeout_sec: u64,
    pub idle_timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: DEFAULT_PORT,
            max_concurrent_clients: 16,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/users"),
            password_file: PathBuf::from("data/password.dat"),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_sec: 30,
            idle_timeout_sec: 0,
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

impl TimeoutConfig {
    /// Bound on finishing a request once it started arriving; `None` = unbounded
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_sec > 0).then(|| Duration::from_secs(self.request_timeout_sec))
    }

    /// Bound on waiting for the next request; `None` = wait forever
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_sec > 0).then(|| Duration::from_secs(self.idle_timeout_sec))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.max_concurrent_clients == 0 {
            anyhow::bail!("max_concurrent_clients must be at least 1");
        }
        if self.transfer.chunk_size == 0 {
            anyhow::bail!("chunk_size must be at least 1");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.general.bind_address, self.general.bind_port)
    }
}
