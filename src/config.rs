//! Configuration types for the autosplitter
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{AutosplitterError, Result};

/// Sandbox limits applied to the rule script engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 10_000,
            max_array_size: 10_000,
            max_map_size: 1_000,
        }
    }
}

/// Listener and engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Address both sockets bind to
    pub bind_address: IpAddr,
    /// UDP port for fact frames
    pub fact_port: u16,
    /// UDP port for command frames
    pub command_port: u16,
    /// Largest fact datagram accepted; longer ones are truncated by the OS
    pub receive_buffer_size: usize,
    /// How often a blocked receive wakes up to notice shutdown
    pub poll_interval_ms: u64,
    /// Rule script loaded at startup
    pub script_path: Option<PathBuf>,
    pub engine: EngineLimits,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            fact_port: 6767,
            command_port: 6768,
            receive_buffer_size: 1024,
            poll_interval_ms: 100,
            script_path: None,
            engine: EngineLimits::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: IngestConfig =
            toml::from_str(source).map_err(|e| AutosplitterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            AutosplitterError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&source)?;
        log::info!("Loaded autosplitter config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| AutosplitterError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.receive_buffer_size < crate::protocol::FACT_HEADER_LEN {
            return Err(AutosplitterError::Config(format!(
                "receive_buffer_size {} is smaller than a fact header",
                self.receive_buffer_size
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(AutosplitterError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fact_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.fact_port)
    }

    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.command_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Loopback config on ephemeral ports, for tests and local tools
    pub fn loopback() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            fact_port: 0,
            command_port: 0,
            poll_interval_ms: 20,
            ..Self::default()
        }
    }
}
