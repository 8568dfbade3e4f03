//! Configuration module for the synsweep engine

use crate::network::TeardownMode;
use crate::scanner::ExecutionMode;
use crate::SweepError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// WBEM over HTTPS (CIM-XML)
pub const DEFAULT_SWEEP_PORT: u16 = 5989;

/// Probes in flight in concurrent mode
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Name of the per-user config file looked up in the home directory
pub const CONFIG_FILE_NAME: &str = ".synsweep.toml";

/// Main configuration structure for sweep operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Probe timeout in milliseconds
    pub timeout: u64,

    /// Maximum number of probes in flight in concurrent mode
    pub concurrency: usize,

    /// Extra attempts for units that come back down
    pub retries: u32,

    /// Flags sent to tear down a half-open connection
    pub teardown: TeardownMode,

    /// Sequential or concurrent execution
    pub mode: ExecutionMode,

    /// First host octet for definitions that leave it open
    pub start_ip: u8,

    /// Last host octet for definitions that leave it open
    pub end_ip: u8,

    /// Ports used when the caller supplies none
    pub ports: Vec<u16>,

    /// Fall back to full TCP connects when raw sockets are refused
    pub connect_fallback: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            timeout: 2000,
            concurrency: DEFAULT_CONCURRENCY,
            retries: 0,
            teardown: TeardownMode::default(),
            mode: ExecutionMode::default(),
            start_ip: 1,
            end_ip: 254,
            ports: vec![DEFAULT_SWEEP_PORT],
            connect_fallback: false,
        }
    }
}

impl SweepConfig {
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_teardown(mut self, teardown: TeardownMode) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_range(mut self, start_ip: u8, end_ip: u8) -> Self {
        self.start_ip = start_ip;
        self.end_ip = end_ip;
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_connect_fallback(mut self, enabled: bool) -> Self {
        self.connect_fallback = enabled;
        self
    }

    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SweepError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: SweepConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the per-user config file, if a home directory exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `~/.synsweep.toml`, falling back to defaults
    pub fn load_default_config() -> Self {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                match Self::from_toml_file(&path) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
                }
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.timeout == 0 {
            return Err(SweepError::ConfigError("Timeout must be greater than 0".to_string()));
        }

        if self.concurrency == 0 {
            return Err(SweepError::ConfigError(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        if self.start_ip > self.end_ip {
            return Err(SweepError::ConfigError(format!(
                "start_ip {} is greater than end_ip {}",
                self.start_ip, self.end_ip
            )));
        }

        if self.ports.contains(&0) {
            return Err(SweepError::ConfigError("Port 0 is not a valid port".to_string()));
        }

        Ok(())
    }
}
