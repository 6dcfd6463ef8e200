// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Packet classification on both sides
//! - Comparison results and divergences
//! - Checkpoint requests and acknowledgements
//! - Flow registry size and evictions
//! - Peer transport traffic and failures
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `colo_proxy_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! Without an installed recorder every call is a no-op.

use crate::packet::Side;
use crate::registry::EvictionReason;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a packet placed into a flow queue.
pub fn record_packet_classified(side: Side) {
    counter!("colo_proxy_packets_classified_total", "side" => side.to_string()).increment(1);
}

/// Record a packet passed through untracked because it could not be classified.
pub fn record_classification_failure(side: Side) {
    counter!("colo_proxy_classification_failures_total", "side" => side.to_string()).increment(1);
}

/// Record primary/secondary pairs found equal and released.
pub fn record_packets_matched(count: usize) {
    counter!("colo_proxy_packets_matched_total").increment(count as u64);
}

/// Record a flow declared diverged.
pub fn record_divergence(reason: &'static str) {
    counter!("colo_proxy_divergences_total", "reason" => reason).increment(1);
}

/// Record the checkpoint flag going from clear to set.
pub fn record_checkpoint_requested() {
    counter!("colo_proxy_checkpoint_requests_total").increment(1);
}

/// Record a completed checkpoint and the packets it released.
pub fn record_checkpoint_acknowledged(released: usize) {
    counter!("colo_proxy_checkpoint_acks_total").increment(1);
    counter!("colo_proxy_checkpoint_released_packets_total").increment(released as u64);
}

/// Record a flow leaving the registry.
pub fn record_eviction(reason: EvictionReason) {
    counter!("colo_proxy_evictions_total", "reason" => reason.to_string()).increment(1);
}

/// Gauge for number of tracked flows.
pub fn set_tracked_connections(count: usize) {
    gauge!("colo_proxy_tracked_connections").set(count as f64);
}

/// Record a frame written to the peer.
pub fn record_frame_sent(bytes: usize) {
    counter!("colo_proxy_frames_sent_total").increment(1);
    histogram!("colo_proxy_frame_size_bytes", "direction" => "sent").record(bytes as f64);
}

/// Record a frame read from the peer.
pub fn record_frame_received(bytes: usize) {
    counter!("colo_proxy_frames_received_total").increment(1);
    histogram!("colo_proxy_frame_size_bytes", "direction" => "received").record(bytes as f64);
}

/// Record a peer frame that was dropped (e.g. unclassifiable on the primary).
pub fn record_frame_dropped(reason: &'static str) {
    counter!("colo_proxy_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a fatal transport failure.
pub fn record_transport_failure(kind: &'static str) {
    counter!("colo_proxy_transport_failures_total", "kind" => kind).increment(1);
}

/// Record one comparison pass.
pub fn record_compare_scan(flows: usize, duration: Duration) {
    counter!("colo_proxy_compare_scans_total").increment(1);
    counter!("colo_proxy_compare_flows_scanned_total").increment(flows as u64);
    histogram!("colo_proxy_compare_scan_duration_seconds").record(duration.as_secs_f64());
}

/// Gauge for proxy status.
pub fn set_proxy_status(status: &str) {
    let value = match status {
        "NotStarted" => 0.0,
        "Running" => 1.0,
        "Done" => 2.0,
        _ => -1.0,
    };
    gauge!("colo_proxy_status").set(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder installed: every call must be a silent no-op.
    #[test]
    fn test_metrics_without_recorder() {
        record_packet_classified(Side::Primary);
        record_classification_failure(Side::Secondary);
        record_packets_matched(3);
        record_divergence("mismatch");
        record_checkpoint_requested();
        record_checkpoint_acknowledged(10);
        record_eviction(EvictionReason::Capacity);
        set_tracked_connections(5);
        record_frame_sent(64);
        record_frame_received(64);
        record_frame_dropped("unclassified");
        record_transport_failure("eof");
        record_compare_scan(2, Duration::from_micros(50));
        set_proxy_status("Running");
        set_proxy_status("bogus");
    }
}
