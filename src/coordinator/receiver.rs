// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Peer receive task.
//!
//! Reads frames from the cross-host connection until shutdown or a fatal
//! transport error:
//!
//! - **Primary**: each frame is the secondary guest's output. It is
//!   classified as secondary-side and queued for comparison. Frames that
//!   cannot be classified are dropped and counted.
//! - **Secondary**: each frame is client traffic mirrored by the primary.
//!   It goes straight to [`PacketDelivery`] and is never compared.
//!
//! EOF, an IO error or an oversized length prefix ends the session: status
//! becomes `Done`, the failure is recorded and the comparison task is woken
//! so it can exit.

use super::state::EngineState;
use crate::config::ProxyMode;
use crate::delivery::PacketDelivery;
use crate::error::ProxyError;
use crate::metrics;
use crate::packet::Side;
use crate::transport::FrameReceiver;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, Instrument};

/// Run the receive loop for one peer connection.
pub(crate) async fn run_receiver<D: PacketDelivery>(
    state: Arc<EngineState<D>>,
    mut receiver: FrameReceiver,
    mode: ProxyMode,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let peer = receiver.peer_addr();
    let span = info_span!("receiver", %mode, %peer);

    async move {
        info!("Starting peer receiver");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let result = tokio::select! {
                result = receiver.recv() => result,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    // A peer closing during our own stop is not a fault.
                    if *shutdown_rx.borrow() {
                        debug!(error = %e, "Receiver closed during shutdown");
                        break;
                    }
                    error!(error = %e, "Peer transport failed, ending session");
                    metrics::record_transport_failure(failure_kind(&e));
                    state.fail(&e);
                    break;
                }
            };

            match mode {
                ProxyMode::Primary => {
                    if !state.classify_and_track(frame, Side::Secondary) {
                        metrics::record_frame_dropped("unclassified");
                    }
                }
                ProxyMode::Secondary => state.delivery.deliver(frame),
            }
        }

        info!("Peer receiver stopped");
    }
    .instrument(span)
    .await
}

fn failure_kind(error: &ProxyError) -> &'static str {
    match error {
        ProxyError::ConnectionLost => "eof",
        ProxyError::FrameTooLarge { .. } => "oversized",
        ProxyError::Transport { .. } => "io",
        _ => "other",
    }
}
