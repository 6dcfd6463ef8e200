// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # COLO Proxy
//!
//! Connection tracking and packet comparison for a pair of lock-stepped VM
//! replicas (coarse-grained lock-stepping, "COLO").
//!
//! ## Architecture
//!
//! Both replicas run a proxy. The secondary forwards every packet its
//! guest emits to the primary, which compares them with its own guest's
//! output, flow by flow:
//!
//! ```text
//! ┌──────────────────────── primary ────────────────────────┐
//! │                                                         │
//! │  guest ──classify──► Registry ◄──classify── receiver ◄──┼── TCP ── secondary
//! │           (primary_list)   │   (secondary_list)         │          (guest output)
//! │                            ▼ wake                       │
//! │                     comparison task                     │
//! │                            │ mismatch / backlog         │
//! │                            ▼                            │
//! │                    checkpoint flag ──► host polls       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Client traffic into the primary guest is mirrored to the secondary the
//! other way and re-injected there through [`PacketDelivery`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use colo_proxy::{ColoProxy, ProxyConfig, ProxyMode};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> colo_proxy::Result<()> {
//!     let config = ProxyConfig::for_testing(ProxyMode::Primary, "192.168.0.100:12345");
//!     let mut proxy = ColoProxy::new(config);
//!     proxy.start(ProxyMode::Primary).await?;
//!
//!     // For every packet the guest sends:
//!     let frame = Bytes::from_static(&[0u8; 60]);
//!     proxy.on_guest_packet(frame, None).await?;
//!
//!     if proxy.query_checkpoint_requested() {
//!         // run the VM checkpoint, then:
//!         proxy.acknowledge_checkpoint();
//!     }
//!
//!     proxy.stop(ProxyMode::Primary).await
//! }
//! ```

pub mod compare;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod key;
pub mod metrics;
pub mod packet;
pub mod registry;
pub mod transport;

// Re-exports for convenience
pub use compare::{compare_pending, PacketComparator, PayloadComparator, ScanReport};
pub use config::{ProxyConfig, ProxyMode, ProxySettings};
pub use coordinator::{ColoProxy, Disposition, ProxyStatus};
pub use delivery::{NoOpDelivery, PacketDelivery};
pub use error::{ClassificationError, ProxyError, Result};
pub use key::ConnectionKey;
pub use packet::{classify, Packet, SenderId, Side};
pub use registry::Registry;
pub use transport::{FrameCodec, Transport};
