// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the COLO proxy.
//!
//! Configuration is passed to [`ColoProxy::new()`](crate::ColoProxy::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use colo_proxy::config::{ProxyConfig, ProxyMode};
//!
//! let config = ProxyConfig::for_testing(ProxyMode::Primary, "192.168.0.100:12345");
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ProxyConfig
//! ├── mode: ProxyMode               # primary | secondary
//! ├── addr: String                  # connect (primary) / listen (secondary)
//! └── settings: ProxySettings
//!     ├── registry: RegistryConfig  # flow-count bound
//!     ├── compare: CompareConfig    # per-flow backlog limit
//!     └── transport: TransportConfig
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! mode: primary
//! addr: "192.168.0.100:12345"
//!
//! settings:
//!   registry:
//!     max_connections: 65536
//!   compare:
//!     max_queue_depth: 1024
//!   transport:
//!     max_frame_size: 69632
//!     connect_timeout: "5s"
//! ```

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// Replica role. Fixed for the lifetime of a Running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Connects to the secondary and runs the comparison task.
    Primary,
    /// Listens for the primary and forwards its own output for comparison.
    Secondary,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::Primary => write!(f, "primary"),
            ProxyMode::Secondary => write!(f, "secondary"),
        }
    }
}

/// The top-level config object passed to `ColoProxy::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub mode: ProxyMode,

    /// Primary: address of the secondary to connect to (`192.168.0.100:12345`).
    /// Secondary: address to listen on (`0.0.0.0:12345`).
    pub addr: String,

    #[serde(default)]
    pub settings: ProxySettings,
}

impl ProxyConfig {
    /// Create a config with default settings.
    pub fn for_testing(mode: ProxyMode, addr: &str) -> Self {
        Self {
            mode,
            addr: addr.to_string(),
            settings: ProxySettings::default(),
        }
    }

    /// Reject settings the proxy cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.addr.trim().is_empty() {
            return Err(ProxyError::Config("addr must be set".to_string()));
        }
        if self.settings.registry.max_connections == 0 {
            return Err(ProxyError::Config("registry.max_connections must be > 0".to_string()));
        }
        if self.settings.compare.max_queue_depth == 0 {
            return Err(ProxyError::Config("compare.max_queue_depth must be > 0".to_string()));
        }
        if self.settings.transport.max_frame_size == 0 {
            return Err(ProxyError::Config("transport.max_frame_size must be > 0".to_string()));
        }
        if u32::try_from(self.settings.transport.max_frame_size).is_err() {
            return Err(ProxyError::Config(
                "transport.max_frame_size must fit the u32 length prefix".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables grouped by component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub compare: CompareConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RegistryConfig
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum tracked flows. Inserting past this evicts the
    /// least-recently-active flow.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    65_536
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CompareConfig
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareConfig {
    /// Packets one side may queue for a flow before the other side's
    /// silence counts as divergence.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// How long `stop()` waits for a background task to exit (e.g., "5s").
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: String,
}

fn default_max_queue_depth() -> usize {
    1024
}

fn default_stop_timeout() -> String {
    "5s".to_string()
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: default_max_queue_depth(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

impl CompareConfig {
    /// Parse `stop_timeout`, falling back to 5 seconds.
    pub fn stop_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.stop_timeout).unwrap_or(Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TransportConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Largest frame accepted from the peer: 4 KiB headroom over a 64 KiB packet.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096 + 65536;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Frames declaring a larger payload are a fatal transport error.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Primary connect timeout as a duration string (e.g., "5s").
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_connect_timeout() -> String {
    "5s".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl TransportConfig {
    /// Parse `connect_timeout`, falling back to 5 seconds.
    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
