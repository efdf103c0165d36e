//! Server configuration loaded from TOML.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::net::{DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};

/// Longest accepted shutdown grace period.
const MAX_GRACE_PERIOD_MS: u64 = 60_000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Network and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Fixed port, or 0 to pick a free one from the range.
    #[serde(default)]
    pub port: u32,
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u32,
    /// Exclusive.
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u32,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: 0,
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            grace_period_ms: default_grace_period_ms(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn bind_ip(&self) -> Result<IpAddr, ServerError> {
        self.bind
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address {:?}: {e}", self.bind)))
    }
}

/// Host identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ServerError> {
        let server = &self.server;
        server.bind_ip()?;

        for (field, value) in [
            ("port_range_start", server.port_range_start),
            ("port_range_end", server.port_range_end),
        ] {
            if !(1..=65535).contains(&value) {
                return Err(ServerError::Config(format!(
                    "{field} must be between 1 and 65535, got {value}"
                )));
            }
        }
        if server.port_range_start >= server.port_range_end {
            return Err(ServerError::Config(format!(
                "port_range_start ({}) must be less than port_range_end ({})",
                server.port_range_start, server.port_range_end
            )));
        }
        if server.port > 65535 {
            return Err(ServerError::Config(format!(
                "port must be between 1 and 65535 or 0, got {}",
                server.port
            )));
        }
        if server.grace_period_ms > MAX_GRACE_PERIOD_MS {
            return Err(ServerError::Config(format!(
                "grace_period_ms must be at most {MAX_GRACE_PERIOD_MS}, got {}",
                server.grace_period_ms
            )));
        }
        if self.identity.name.trim().is_empty() {
            return Err(ServerError::Config("identity name is empty".to_string()));
        }
        Ok(())
    }

    /// The port range as `u16`s. Call after [`validate`](Self::validate).
    pub fn port_range(&self) -> (u16, u16) {
        (
            u16::try_from(self.server.port_range_start).unwrap_or(DEFAULT_PORT_RANGE_START),
            u16::try_from(self.server.port_range_end).unwrap_or(DEFAULT_PORT_RANGE_END),
        )
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port_range_start() -> u32 {
    u32::from(DEFAULT_PORT_RANGE_START)
}

fn default_port_range_end() -> u32 {
    u32::from(DEFAULT_PORT_RANGE_END)
}

fn default_grace_period_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "podium".to_string())
}
