// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! State shared between the packet path and the background tasks.

use super::types::ProxyStatus;
use crate::compare::{compare_pending, PacketComparator, ScanReport};
use crate::error::ProxyError;
use crate::metrics;
use crate::packet::{Packet, Side};
use crate::registry::Registry;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::debug;

/// One proxy instance's registry, flags and collaborators.
///
/// The registry lock is never held across an `.await`.
pub(crate) struct EngineState<D> {
    pub registry: Mutex<Registry>,
    pub checkpoint: AtomicBool,
    /// Coalescing "there may be new work" hint for the comparison task.
    pub wake: Notify,
    pub status_tx: watch::Sender<ProxyStatus>,
    pub failure: Mutex<Option<String>>,
    pub comparator: Arc<dyn PacketComparator>,
    pub delivery: Arc<D>,
    pub max_queue_depth: usize,
}

impl<D> EngineState<D> {
    pub fn new(
        max_connections: usize,
        max_queue_depth: usize,
        comparator: Arc<dyn PacketComparator>,
        delivery: Arc<D>,
        status_tx: watch::Sender<ProxyStatus>,
    ) -> Self {
        Self {
            registry: Mutex::new(
                Registry::new(max_connections)
                    .with_diverged_queue_limit(max_queue_depth.saturating_add(1)),
            ),
            checkpoint: AtomicBool::new(false),
            wake: Notify::new(),
            status_tx,
            failure: Mutex::new(None),
            comparator,
            delivery,
            max_queue_depth,
        }
    }

    pub fn status(&self) -> ProxyStatus {
        *self.status_tx.borrow()
    }

    pub fn set_status(&self, status: ProxyStatus) {
        self.status_tx.send_replace(status);
        metrics::set_proxy_status(&status.to_string());
    }

    /// Queue a classified packet and wake the comparison task.
    pub fn track(&self, packet: Packet) {
        let side = packet.side();
        let evicted = self.registry.lock().enqueue(packet);
        if let Some(evicted) = evicted {
            debug!(
                flow = %evicted.key,
                primary_drained = evicted.primary_drained,
                secondary_drained = evicted.secondary_drained,
                "Evicted least recently active flow"
            );
        }
        metrics::record_packet_classified(side);
        self.wake.notify_one();
    }

    /// Classify and track a raw frame. Unclassifiable frames are counted
    /// and left alone.
    pub fn classify_and_track(&self, raw: Bytes, side: Side) -> bool {
        match Packet::classify(raw, side) {
            Ok(packet) => {
                self.track(packet);
                true
            }
            Err(e) => {
                debug!(%side, error = %e, "Packet not tracked");
                metrics::record_classification_failure(side);
                false
            }
        }
    }

    /// End the session after a fatal error.
    pub fn fail(&self, error: &ProxyError) {
        *self.failure.lock() = Some(error.to_string());
        self.set_status(ProxyStatus::Done);
        self.wake.notify_one();
    }

    pub fn checkpoint_requested(&self) -> bool {
        self.checkpoint.load(Ordering::Acquire)
    }

    /// Raise the checkpoint flag. True if it was clear before.
    pub fn request_checkpoint(&self) -> bool {
        !self.checkpoint.swap(true, Ordering::AcqRel)
    }

    pub fn clear_checkpoint(&self) {
        self.checkpoint.store(false, Ordering::Release);
    }

    /// Run one comparison pass and raise the flag on divergence.
    ///
    /// The flag is raised before the registry lock is released, so an
    /// acknowledgement either flushes this pass's diverged flows or sees
    /// the flag this pass raised. Returns the report and whether this pass
    /// raised the flag.
    pub fn scan(&self) -> (ScanReport, bool) {
        let mut registry = self.registry.lock();
        let report = compare_pending(&mut registry, self.comparator.as_ref(), self.max_queue_depth);
        let raised = report.checkpoint_needed() && self.request_checkpoint();
        (report, raised)
    }

    /// Flush every queue and clear the flag in one step.
    ///
    /// Returns the packets released and whether the flag was set.
    pub fn acknowledge(&self) -> (usize, bool) {
        let mut registry = self.registry.lock();
        let released = registry.flush();
        let was_set = self.checkpoint.swap(false, Ordering::AcqRel);
        (released, was_set)
    }
}
