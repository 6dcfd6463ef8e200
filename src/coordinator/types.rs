// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Proxy lifecycle types.
//!
//! # State Transitions
//!
//! ```text
//!              start()                stop() / fatal transport error
//! NotStarted ──────────→ Running ─────────────────────────────────→ Done
//!     ↑                                                               │
//!     └──────────────────────────── reset() ──────────────────────────┘
//! ```
//!
//! - **NotStarted**: after `ColoProxy::new()` or `reset()`. No peer connection.
//! - **Running**: peer connected, packets are tracked and compared.
//! - **Done**: terminal for the session. Packets pass through untouched until
//!   `reset()` builds a fresh registry.

use std::fmt;

/// Status of the proxy session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    /// Created or reset, not yet connected.
    NotStarted,

    /// Connected to the peer.
    ///
    /// On the primary the comparison task is live.
    Running,

    /// Stopped or failed.
    ///
    /// Check [`last_failure()`](super::ColoProxy::last_failure) to tell an
    /// explicit stop from a transport fault.
    Done,
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyStatus::NotStarted => write!(f, "NotStarted"),
            ProxyStatus::Running => write!(f, "Running"),
            ProxyStatus::Done => write!(f, "Done"),
        }
    }
}

/// What the caller should do with a packet after handing it to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Continue along the normal delivery path.
    Forward,
    /// The proxy took ownership; do not deliver it.
    Consumed,
}
