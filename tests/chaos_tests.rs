// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: simulate failures and verify graceful degradation.
//!
//! These tests verify the proxy handles hostile input and peer failures
//! without panics or deadlocks, and that fatal faults end the session
//! cleanly.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use bytes::Bytes;
use colo_proxy::{ColoProxy, Disposition, ProxyConfig, ProxyMode, ProxySettings, ProxyStatus};
use common::{runt, start_pair, udp, wait_until, MockDelivery};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

/// A primary connected to a raw socket standing in for the secondary.
async fn primary_with_raw_peer() -> (ColoProxy, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let mut primary = ColoProxy::new(ProxyConfig::for_testing(ProxyMode::Primary, &addr));

    let (started, accepted) = tokio::join!(primary.start(ProxyMode::Primary), listener.accept());
    started.unwrap();
    let (raw, _) = accepted.unwrap();
    (primary, raw)
}

async fn wait_done(proxy: &ColoProxy<impl colo_proxy::PacketDelivery>) {
    let mut status = proxy.status_receiver();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| *s == ProxyStatus::Done))
        .await
        .expect("session did not end")
        .unwrap();
}

// =============================================================================
// Corrupted Data Handling
// =============================================================================

/// Test: Unclassifiable frames from the secondary are dropped, session survives
#[tokio::test]
async fn malformed_peer_frames_dropped() {
    let (mut primary, mut secondary) = start_pair(ProxySettings::default(), Arc::new(MockDelivery::new())).await;

    let garbage: Vec<Bytes> = vec![
        runt(),
        Bytes::from_static(&[0u8; 14]),
        // Ethernet header claiming IPv6
        Bytes::from(vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x86, 0xdd, 0x60, 0, 0, 0]),
        Bytes::from((0..200u32).map(|i| (i * 7) as u8).collect::<Vec<_>>()),
    ];
    for frame in garbage {
        assert_eq!(secondary.on_guest_packet(frame, None).await.unwrap(), Disposition::Consumed);
    }

    // A well-formed pair after the garbage still matches.
    primary.on_guest_packet(udp(b"ok"), None).await.unwrap();
    secondary.on_guest_packet(udp(b"ok"), None).await.unwrap();
    wait_until("pair matched", || primary.queued_packets() == 0).await;

    assert_eq!(primary.tracked_connections(), 1);
    assert!(primary.is_running());
    assert!(!primary.query_checkpoint_requested());

    primary.stop(ProxyMode::Primary).await.unwrap();
    secondary.stop(ProxyMode::Secondary).await.unwrap();
}

/// Test: Arbitrary bytes on the guest path never panic
#[tokio::test]
async fn malformed_guest_packets_no_panic() {
    let (mut primary, mut secondary) = start_pair(ProxySettings::default(), Arc::new(MockDelivery::new())).await;

    for len in 0..80usize {
        let frame = Bytes::from((0..len).map(|i| (i * 31 + len) as u8).collect::<Vec<_>>());
        assert_eq!(primary.on_guest_packet(frame, None).await.unwrap(), Disposition::Forward);
    }
    assert!(primary.is_running());

    primary.stop(ProxyMode::Primary).await.unwrap();
    secondary.stop(ProxyMode::Secondary).await.unwrap();
}

// =============================================================================
// Framing Violations
// =============================================================================

/// Test: A peer declaring an oversized frame ends the session
#[tokio::test]
async fn oversized_frame_is_fatal() {
    let (mut primary, mut raw) = primary_with_raw_peer().await;

    raw.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();
    wait_done(&primary).await;

    let failure = primary.last_failure().expect("failure recorded");
    assert!(failure.contains("Frame too large"), "unexpected failure: {}", failure);

    // Packets pass through untouched after the fault.
    assert_eq!(primary.on_guest_packet(udp(b"AA"), None).await.unwrap(), Disposition::Forward);
    assert_eq!(primary.tracked_connections(), 0);

    primary.stop(ProxyMode::Primary).await.unwrap();
    assert_eq!(primary.status(), ProxyStatus::Done);
}

/// Test: Zero-length frames are skipped
#[tokio::test]
async fn zero_length_frames_ignored() {
    let (mut primary, mut raw) = primary_with_raw_peer().await;

    primary.on_guest_packet(udp(b"AA"), None).await.unwrap();

    let frame = udp(b"AA");
    let mut wire = vec![0u8, 0, 0, 0, 0, 0, 0, 0];
    wire.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    wire.extend_from_slice(&frame);
    raw.write_all(&wire).await.unwrap();

    wait_until("pair matched", || primary.queued_packets() == 0).await;
    assert!(primary.is_running());
    assert!(!primary.query_checkpoint_requested());

    primary.stop(ProxyMode::Primary).await.unwrap();
}

/// Test: A frame split across many writes is reassembled
#[tokio::test]
async fn fragmented_frame_reassembled() {
    let (mut primary, mut raw) = primary_with_raw_peer().await;

    primary.on_guest_packet(udp(b"slow"), None).await.unwrap();

    let frame = udp(b"slow");
    let mut wire = (frame.len() as u32).to_be_bytes().to_vec();
    wire.extend_from_slice(&frame);
    for chunk in wire.chunks(3) {
        raw.write_all(chunk).await.unwrap();
        raw.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    wait_until("pair matched", || primary.queued_packets() == 0).await;
    assert!(primary.is_running());

    primary.stop(ProxyMode::Primary).await.unwrap();
}

/// Test: An oversized local packet is not sent but the session survives
#[tokio::test]
async fn oversized_local_packet_not_fatal() {
    let mut settings = ProxySettings::default();
    settings.transport.max_frame_size = 256;
    let delivery = Arc::new(MockDelivery::new());
    let (mut primary, mut secondary) = start_pair(settings, Arc::clone(&delivery)).await;

    // Secondary guest output stays consumed even when it cannot be framed.
    assert_eq!(
        secondary.on_guest_packet(udp(&[0u8; 400]), None).await.unwrap(),
        Disposition::Consumed
    );
    // The client packet still reaches the primary guest.
    let big = Bytes::from(vec![0u8; 512]);
    assert_eq!(primary.on_client_packet(big).await.unwrap(), Disposition::Forward);
    assert!(primary.is_running());
    assert!(secondary.is_running());

    // Neither packet crossed the link; a small one after them does.
    primary.on_client_packet(Bytes::from_static(b"small")).await.unwrap();
    wait_until("small frame delivered", || delivery.count() == 1).await;
    assert_eq!(&delivery.frames()[0][..], b"small");
    assert_eq!(primary.queued_packets(), 0);

    primary.stop(ProxyMode::Primary).await.unwrap();
    secondary.stop(ProxyMode::Secondary).await.unwrap();
}

// =============================================================================
// Peer Failures
// =============================================================================

/// Test: Peer disconnect ends the session and stops the comparison task
#[tokio::test]
async fn peer_disconnect_is_fatal() {
    let (mut primary, raw) = primary_with_raw_peer().await;

    primary.on_guest_packet(udp(b"AA"), None).await.unwrap();
    drop(raw);
    wait_done(&primary).await;

    let failure = primary.last_failure().expect("failure recorded");
    assert!(failure.contains("lost"), "unexpected failure: {}", failure);

    // Stop joins the already finished tasks promptly.
    tokio::time::timeout(Duration::from_secs(2), primary.stop(ProxyMode::Primary))
        .await
        .expect("stop hung")
        .unwrap();
    assert_eq!(primary.queued_packets(), 0);

    primary.reset().await.unwrap();
    assert_eq!(primary.status(), ProxyStatus::NotStarted);
    assert!(primary.last_failure().is_none());
}

/// Test: Secondary survives garbage from the primary until the stream breaks
#[tokio::test]
async fn secondary_delivers_raw_frames_then_fails() {
    let delivery = Arc::new(MockDelivery::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut secondary = ColoProxy::with_delivery(
        ProxyConfig::for_testing(ProxyMode::Secondary, &addr.to_string()),
        Arc::clone(&delivery),
    );

    let (started, raw) = tokio::join!(secondary.start_on(listener), TcpStream::connect(addr));
    started.unwrap();
    let mut raw = raw.unwrap();

    // The secondary does not classify, so even junk is delivered.
    raw.write_all(&[0, 0, 0, 3, 1, 2, 3]).await.unwrap();
    wait_until("junk delivered", || delivery.count() == 1).await;
    assert_eq!(&delivery.frames()[0][..], &[1, 2, 3]);

    raw.write_all(&[0x7F, 0xFF, 0xFF, 0xFF]).await.unwrap();
    wait_done(&secondary).await;
    assert_eq!(delivery.count(), 1);

    secondary.stop(ProxyMode::Secondary).await.unwrap();
}

// =============================================================================
// Load
// =============================================================================

/// Test: Many packets across many flows compare without a checkpoint
#[tokio::test]
async fn sustained_traffic_matches() {
    let (mut primary, mut secondary) = start_pair(ProxySettings::default(), Arc::new(MockDelivery::new())).await;

    for i in 0..500u32 {
        let frame = common::udp_frame(1000 + (i % 50) as u16, 53, &i.to_be_bytes());
        primary.on_guest_packet(frame.clone(), None).await.unwrap();
        secondary.on_guest_packet(frame, None).await.unwrap();
    }

    wait_until("all pairs matched", || primary.queued_packets() == 0).await;
    assert!(!primary.query_checkpoint_requested());
    assert_eq!(primary.tracked_connections(), 50);

    primary.stop(ProxyMode::Primary).await.unwrap();
    secondary.stop(ProxyMode::Secondary).await.unwrap();
}
