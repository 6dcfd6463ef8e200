// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the COLO proxy.
//!
//! Errors are split by how far they reach: a packet that cannot be
//! classified only affects that packet, while a transport fault ends the
//! whole Running session.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Description |
//! |------------|-------|-------------|
//! | `Classification` | No | Buffer too short or not IPv4 TCP/UDP/ICMP |
//! | `Transport` | Yes | IO failure on the peer connection |
//! | `FrameTooLarge` | Yes | Peer declared a frame above `max_frame_size` |
//! | `ConnectionLost` | Yes | Peer closed the connection |
//! | `Startup` | No | Connect/listen/accept failed in `start()` |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Lifecycle state machine violation |
//!
//! Use [`ProxyError::is_fatal()`] to decide whether a session must be torn
//! down. Fatal errors cannot be repaired in place: packet ordering after a
//! gap in the peer stream is unknown, so the caller has to `reset()` and
//! start again.

use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Why a raw buffer could not be turned into a tracked packet.
///
/// Never fatal. The caller forwards such packets untouched and no flow
/// is created for them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    /// Buffer ends before a required header does.
    #[error("packet too short: {len} bytes, need at least {need}")]
    TooShort { len: usize, need: usize },

    /// Link layer carries something other than IPv4.
    #[error("unsupported ethertype 0x{0:04x}")]
    UnsupportedEtherType(u16),

    /// IPv4 payload is not TCP, UDP or ICMP.
    #[error("unsupported ip protocol {0}")]
    UnsupportedProtocol(u8),

    /// Header present but structurally invalid (bad version, IHL, data offset).
    #[error("malformed header: {0}")]
    MalformedHeader(String),
}

/// Errors that can occur while running the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Packet classification failure.
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    /// IO failure on the peer connection.
    ///
    /// Ends the Running session.
    #[error("Transport error ({operation}): {message}")]
    Transport {
        operation: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Peer declared a frame larger than allowed.
    ///
    /// Treated as stream corruption; ends the Running session.
    #[error("Frame too large: {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Peer closed the connection.
    #[error("Connection to peer lost")]
    ConnectionLost,

    /// Failure to establish the peer connection in `start()`.
    ///
    /// Reported synchronously; no retry is attempted.
    #[error("Startup error ({addr}): {message}")]
    Startup { addr: String, message: String },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., calling `start()` twice, or with the wrong mode).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl ProxyError {
    /// Create a transport error from an IO error.
    pub fn transport(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a transport error without source.
    pub fn transport_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a startup error.
    pub fn startup(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Startup {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Check if this error ends the current Running session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::FrameTooLarge { .. } => true,
            Self::ConnectionLost => true,
            Self::Classification(_) => false, // packet passes through untracked
            Self::Startup { .. } => false,    // session never started
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        Self::transport("io", e)
    }
}
