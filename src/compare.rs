// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Head-of-queue packet comparison.
//!
//! [`compare_pending`] walks every flow on the registry's pending list and
//! pairs the heads of its primary and secondary queues for as long as both
//! are non-empty. Equal pairs are released. The first unequal pair, or a
//! queue that grew past `max_queue_depth` while the other side stayed
//! silent, marks the flow as diverged: draining stops and the queues are
//! kept for the checkpoint.
//!
//! What counts as "equal" is a [`PacketComparator`]. The default,
//! [`PayloadComparator`], compares transport payload bytes only. Header
//! fields that legitimately differ between replicas (IP ID, checksums,
//! TTL, TCP timestamps) never take part.

use crate::key::ConnectionKey;
use crate::metrics;
use crate::packet::{Packet, Side};
use crate::registry::{EvictedFlow, EvictionReason, ProtoState, Registry};
use std::fmt;
use tracing::{debug, warn};

/// Decides whether a primary and a secondary packet carry the same output.
pub trait PacketComparator: Send + Sync {
    fn equivalent(&self, primary: &Packet, secondary: &Packet) -> bool;
}

/// Equal iff same IP protocol and byte-identical transport payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadComparator;

impl PacketComparator for PayloadComparator {
    fn equivalent(&self, primary: &Packet, secondary: &Packet) -> bool {
        primary.ip_proto() == secondary.ip_proto() && primary.payload() == secondary.payload()
    }
}

/// Why a flow was declared diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceReason {
    /// Head packets disagree.
    Mismatch,
    /// One side queued more than the allowed depth without a counterpart.
    Backlog { side: Side, depth: usize },
}

impl DivergenceReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DivergenceReason::Mismatch => "mismatch",
            DivergenceReason::Backlog { .. } => "backlog",
        }
    }
}

impl fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceReason::Mismatch => write!(f, "payload mismatch"),
            DivergenceReason::Backlog { side, depth } => {
                write!(f, "{} backlog of {} packets", side, depth)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub key: ConnectionKey,
    pub reason: DivergenceReason,
}

/// Outcome of one pass over the pending flows.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub flows_scanned: usize,
    pub matched: usize,
    pub divergences: Vec<Divergence>,
    pub closed: Vec<EvictedFlow>,
}

impl ScanReport {
    /// True if any flow diverged during this pass.
    pub fn checkpoint_needed(&self) -> bool {
        !self.divergences.is_empty()
    }
}

/// Compare every pending flow once.
pub fn compare_pending(
    registry: &mut Registry,
    comparator: &dyn PacketComparator,
    max_queue_depth: usize,
) -> ScanReport {
    let mut report = ScanReport::default();

    for key in registry.take_pending() {
        // Flow may have been evicted since it was scheduled.
        let Some(conn) = registry.get_mut(&key) else {
            continue;
        };
        report.flows_scanned += 1;
        conn.processing = false;
        if conn.diverged {
            continue;
        }

        let mut divergence = None;
        while let (Some(primary), Some(secondary)) =
            (conn.primary_list.front(), conn.secondary_list.front())
        {
            if !comparator.equivalent(primary, secondary) {
                debug!(
                    flow = %key,
                    primary_len = primary.len(),
                    secondary_len = secondary.len(),
                    "Head packets differ"
                );
                divergence = Some(DivergenceReason::Mismatch);
                break;
            }
            if let ProtoState::Tcp(ref mut tcp) = conn.proto {
                tcp.observe(primary, secondary);
            }
            conn.primary_list.pop_front();
            conn.secondary_list.pop_front();
            report.matched += 1;
        }

        if divergence.is_none() {
            divergence = [Side::Primary, Side::Secondary]
                .into_iter()
                .map(|side| (side, conn.queue_len(side)))
                .find(|(_, depth)| *depth > max_queue_depth)
                .map(|(side, depth)| DivergenceReason::Backlog { side, depth });
        }

        if let Some(reason) = divergence {
            conn.diverged = true;
            warn!(flow = %key, %reason, "Replica output diverged");
            metrics::record_divergence(reason.label());
            report.divergences.push(Divergence { key, reason });
            continue;
        }

        if conn.is_closed() && conn.is_idle() {
            if let Some(evicted) = registry.remove_with_reason(&key, EvictionReason::Closed) {
                report.closed.push(evicted);
            }
        }
    }

    if report.matched > 0 {
        metrics::record_packets_matched(report.matched);
    }
    report
}
