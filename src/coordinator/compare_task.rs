// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Comparison task (primary only).
//!
//! Sleeps on the wake signal, then runs one
//! [`compare_pending`](crate::compare::compare_pending) pass over
//! every flow with new packets. Wakes are hints: several notifications
//! before the task runs collapse into one pass, and the pass always
//! rescans the whole pending list.
//!
//! # Shutdown
//!
//! The task exits when the shutdown channel flips or the status reaches
//! `Done`. `stop()` and fatal transport errors both notify the wake
//! signal, so a sleeping task observes termination within one cycle.

use super::state::EngineState;
use super::types::ProxyStatus;
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Run the comparison loop until shutdown.
pub(crate) async fn run_compare<D: Send + Sync + 'static>(
    state: Arc<EngineState<D>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = info_span!("compare_task", max_queue_depth = state.max_queue_depth);

    async move {
        info!("Starting comparison task");

        loop {
            if *shutdown_rx.borrow() || state.status() == ProxyStatus::Done {
                break;
            }

            let started = Instant::now();
            let (report, raised) = state.scan();

            if report.flows_scanned > 0 {
                metrics::record_compare_scan(report.flows_scanned, started.elapsed());
                debug!(
                    flows = report.flows_scanned,
                    matched = report.matched,
                    closed = report.closed.len(),
                    "Comparison pass complete"
                );
            }

            if raised {
                metrics::record_checkpoint_requested();
                if let Some(first) = report.divergences.first() {
                    warn!(
                        flow = %first.key,
                        reason = %first.reason,
                        diverged_flows = report.divergences.len(),
                        "Checkpoint requested"
                    );
                }
            }

            tokio::select! {
                _ = state.wake.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Comparison task stopped");
    }
    .instrument(span)
    .await
}
