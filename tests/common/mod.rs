//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Mock PacketDelivery for recording re-injected frames
//! - Ethernet/IPv4 frame builders
//! - A connected primary/secondary pair on localhost

#![allow(dead_code)]

pub mod mock_delivery;
pub mod packets;

pub use mock_delivery::*;
pub use packets::*;

use colo_proxy::{ColoProxy, PacketDelivery, ProxyConfig, ProxyMode, ProxySettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Start a primary and a secondary connected over localhost.
pub async fn start_pair<D: PacketDelivery>(
    settings: ProxySettings,
    delivery: Arc<D>,
) -> (ColoProxy, ColoProxy<D>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let mut primary = ColoProxy::new(ProxyConfig {
        mode: ProxyMode::Primary,
        addr: addr.clone(),
        settings: settings.clone(),
    });
    let mut secondary = ColoProxy::with_delivery(
        ProxyConfig {
            mode: ProxyMode::Secondary,
            addr,
            settings,
        },
        delivery,
    );

    let (p, s) = tokio::join!(primary.start(ProxyMode::Primary), secondary.start_on(listener));
    p.expect("primary start");
    s.expect("secondary start");
    (primary, secondary)
}

/// Poll `check` until it holds, failing the test after 5 seconds.
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for: {}", what);
}
