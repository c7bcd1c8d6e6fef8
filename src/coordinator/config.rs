//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

fn default_bind_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Configuration for the Coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// HTTP bind address in distributed mode
    pub bind_address: SocketAddr,

    /// Seconds without a heartbeat before a worker is Disconnected
    pub heartbeat_timeout_secs: u64,

    /// Seconds without a heartbeat before a worker is Evicted
    pub eviction_timeout_secs: u64,

    /// Expected heartbeat interval handed to workers
    pub heartbeat_interval_secs: u64,

    /// Seconds the job must stay drained and idle before it is Completed
    pub completion_grace_secs: u64,

    /// Milliseconds between background sweeps
    pub sweep_interval_ms: u64,

    /// Maximum registered workers
    pub max_workers: usize,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            heartbeat_timeout_secs: 30,
            eviction_timeout_secs: 300,
            heartbeat_interval_secs: 10,
            completion_grace_secs: 5,
            sweep_interval_ms: 1_000,
            max_workers: 64,
            enable_request_logging: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn eviction_timeout(&self) -> Duration {
        Duration::from_secs(self.eviction_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_secs(self.completion_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_timeout_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::invalid(
                "heartbeat_timeout_secs",
                "Timeout must be greater than interval",
            ));
        }

        if self.eviction_timeout_secs < self.heartbeat_timeout_secs {
            return Err(ConfigError::invalid(
                "eviction_timeout_secs",
                "Eviction timeout must not be shorter than heartbeat timeout",
            ));
        }

        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::invalid("sweep_interval_ms", "Must be greater than 0"));
        }

        if self.max_workers == 0 {
            return Err(ConfigError::invalid(
                "max_workers",
                "Must allow at least 1 worker",
            ));
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    heartbeat_timeout_secs: Option<u64>,
    eviction_timeout_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    completion_grace_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
    max_workers: Option<usize>,
    enable_request_logging: Option<bool>,
}

impl CoordinatorConfigBuilder {
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(
            addr.parse()
                .map_err(|_| ConfigError::invalid("bind_address", format!("Invalid address: {addr}")))?,
        );
        Ok(self)
    }

    pub fn heartbeat_timeout_secs(mut self, secs: u64) -> Self {
        self.heartbeat_timeout_secs = Some(secs);
        self
    }

    pub fn eviction_timeout_secs(mut self, secs: u64) -> Self {
        self.eviction_timeout_secs = Some(secs);
        self
    }

    pub fn heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = Some(secs);
        self
    }

    pub fn completion_grace_secs(mut self, secs: u64) -> Self {
        self.completion_grace_secs = Some(secs);
        self
    }

    pub fn sweep_interval_ms(mut self, ms: u64) -> Self {
        self.sweep_interval_ms = Some(ms);
        self
    }

    pub fn max_workers(mut self, max: usize) -> Self {
        self.max_workers = Some(max);
        self
    }

    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            heartbeat_timeout_secs: self
                .heartbeat_timeout_secs
                .unwrap_or(defaults.heartbeat_timeout_secs),
            eviction_timeout_secs: self
                .eviction_timeout_secs
                .unwrap_or(defaults.eviction_timeout_secs),
            heartbeat_interval_secs: self
                .heartbeat_interval_secs
                .unwrap_or(defaults.heartbeat_interval_secs),
            completion_grace_secs: self
                .completion_grace_secs
                .unwrap_or(defaults.completion_grace_secs),
            sweep_interval_ms: self.sweep_interval_ms.unwrap_or(defaults.sweep_interval_ms),
            max_workers: self.max_workers.unwrap_or(defaults.max_workers),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
