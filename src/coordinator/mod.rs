// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! COLO proxy coordinator.
//!
//! The main orchestrator that ties together:
//! - The flow [`Registry`](crate::registry::Registry) shared with the tasks
//! - The peer connection via [`crate::transport::Transport`]
//! - The comparison task (primary only)
//! - The receive task that feeds peer frames in
//!
//! # Architecture
//!
//! ```text
//!  guest output ──on_guest_packet──┐
//!                                  │ primary: classify + queue (primary_list)
//!                                  │ secondary: send to primary
//!                                  ↓
//!  peer frames ──receive task──→ Registry ──wake──→ comparison task
//!                (secondary_list)        (Notify)        │
//!                                                        ↓
//!                                            checkpoint flag (AtomicBool)
//! ```
//!
//! The packet path never waits on the comparison task: it takes the
//! registry lock, pushes, posts a wake and returns.

mod compare_task;
mod receiver;
mod state;
mod types;

pub use types::{Disposition, ProxyStatus};

use crate::compare::{PacketComparator, PayloadComparator};
use crate::config::{ProxyConfig, ProxyMode};
use crate::delivery::{NoOpDelivery, PacketDelivery};
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::packet::{Packet, SenderId, Side};
use crate::transport::{FrameSender, Transport};
use bytes::Bytes;
use state::EngineState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The COLO proxy for one replica.
///
/// Created in `NotStarted`. [`start()`](Self::start) connects to the peer
/// and spawns the background tasks, [`stop()`](Self::stop) tears them down.
///
/// # Packet Delivery
///
/// On the secondary, frames mirrored by the primary are handed to the
/// [`PacketDelivery`] implementation so they reach the secondary guest.
/// The primary never calls it.
pub struct ColoProxy<D: PacketDelivery = NoOpDelivery> {
    config: ProxyConfig,

    /// State shared with the background tasks
    state: Arc<EngineState<D>>,

    /// Status receiver (for internal use)
    status_rx: watch::Receiver<ProxyStatus>,

    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver
    shutdown_rx: watch::Receiver<bool>,

    /// Write half of the peer connection, present while Running
    sender: Option<FrameSender>,

    /// Background task handles
    handles: Vec<JoinHandle<()>>,
}

impl ColoProxy<NoOpDelivery> {
    /// Create a proxy that discards re-injected frames.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_delivery(config, Arc::new(NoOpDelivery))
    }
}

impl<D: PacketDelivery> ColoProxy<D> {
    /// Create a proxy with a packet delivery collaborator.
    pub fn with_delivery(config: ProxyConfig, delivery: Arc<D>) -> Self {
        Self::with_comparator(config, delivery, Arc::new(PayloadComparator))
    }

    /// Create a proxy with a custom equivalence policy.
    pub fn with_comparator(
        config: ProxyConfig,
        delivery: Arc<D>,
        comparator: Arc<dyn PacketComparator>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ProxyStatus::NotStarted);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = EngineState::new(
            config.settings.registry.max_connections,
            config.settings.compare.max_queue_depth,
            comparator,
            delivery,
            status_tx,
        );

        Self {
            config,
            state: Arc::new(state),
            status_rx,
            shutdown_tx,
            shutdown_rx,
            sender: None,
            handles: Vec::new(),
        }
    }

    /// Get current status.
    pub fn status(&self) -> ProxyStatus {
        *self.status_rx.borrow()
    }

    /// Get a receiver to watch status changes.
    pub fn status_receiver(&self) -> watch::Receiver<ProxyStatus> {
        self.status_rx.clone()
    }

    /// Check if the proxy is running.
    pub fn is_running(&self) -> bool {
        self.status() == ProxyStatus::Running
    }

    /// The configured replica role.
    pub fn mode(&self) -> ProxyMode {
        self.config.mode
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Number of flows currently tracked.
    pub fn tracked_connections(&self) -> usize {
        self.state.registry.lock().size()
    }

    /// Packets waiting for comparison, both sides.
    pub fn queued_packets(&self) -> usize {
        self.state.registry.lock().queued_packets()
    }

    /// Fatal error that ended the last session, if any.
    pub fn last_failure(&self) -> Option<String> {
        self.state.failure.lock().clone()
    }

    /// Has a divergence been seen since the last acknowledgement?
    ///
    /// Never blocks.
    pub fn query_checkpoint_requested(&self) -> bool {
        self.state.checkpoint_requested()
    }

    /// Report that the external checkpoint has completed.
    ///
    /// Every queued packet predates the resync and is dropped. Divergence
    /// marks are cleared and the flag is reset, so new divergences can be
    /// reported again. Returns the number of packets released.
    pub fn acknowledge_checkpoint(&self) -> usize {
        let (released, was_set) = self.state.acknowledge();
        metrics::record_checkpoint_acknowledged(released);
        info!(released, was_set, "Checkpoint acknowledged");
        self.state.wake.notify_one();
        released
    }

    fn check_mode(&self, mode: ProxyMode) -> Result<()> {
        if mode != self.config.mode {
            return Err(ProxyError::InvalidState {
                expected: format!("mode {}", self.config.mode),
                actual: format!("mode {}", mode),
            });
        }
        Ok(())
    }

    fn check_startable(&self, mode: ProxyMode) -> Result<()> {
        if self.status() != ProxyStatus::NotStarted {
            return Err(ProxyError::InvalidState {
                expected: ProxyStatus::NotStarted.to_string(),
                actual: self.status().to_string(),
            });
        }
        self.check_mode(mode)?;
        self.config.validate()
    }

    /// Start the session.
    ///
    /// Primary connects to `addr` and spawns the receive and comparison
    /// tasks. Secondary listens on `addr`, accepts exactly one primary and
    /// spawns the receive task. Any failure leaves the status at
    /// `NotStarted`.
    pub async fn start(&mut self, mode: ProxyMode) -> Result<()> {
        self.check_startable(mode)?;

        info!(%mode, addr = %self.config.addr, "Starting COLO proxy");

        let transport_config = &self.config.settings.transport;
        let transport = match mode {
            ProxyMode::Primary => Transport::connect(&self.config.addr, transport_config).await?,
            ProxyMode::Secondary => Transport::accept(&self.config.addr, transport_config).await?,
        };
        self.run(transport);
        Ok(())
    }

    /// Start as secondary on an already bound listener.
    ///
    /// `addr` from the config is ignored.
    pub async fn start_on(&mut self, listener: TcpListener) -> Result<()> {
        self.check_startable(ProxyMode::Secondary)?;

        let transport = Transport::accept_on(listener, &self.config.settings.transport).await?;
        self.run(transport);
        Ok(())
    }

    fn run(&mut self, transport: Transport) {
        let mode = self.config.mode;
        let peer = transport.peer_addr();
        let (sender, receiver) = transport.split();
        self.sender = Some(sender);

        // Running before the tasks spawn, so they never observe NotStarted.
        self.state.set_status(ProxyStatus::Running);

        let state = Arc::clone(&self.state);
        let shutdown_rx = self.shutdown_rx.clone();
        self.handles.push(tokio::spawn(async move {
            receiver::run_receiver(state, receiver, mode, shutdown_rx).await;
        }));
        debug!("Spawned peer receiver");

        if mode == ProxyMode::Primary {
            let state = Arc::clone(&self.state);
            let shutdown_rx = self.shutdown_rx.clone();
            self.handles.push(tokio::spawn(async move {
                compare_task::run_compare(state, shutdown_rx).await;
            }));
            debug!("Spawned comparison task");
        }

        info!(%mode, %peer, "COLO proxy running");
    }

    /// Handle a packet produced by the local guest.
    ///
    /// - Primary: the packet is tracked for comparison (if it can be
    ///   classified) and always continues on its normal path.
    /// - Secondary: the packet is sent to the primary for comparison and
    ///   must not reach the client.
    ///
    /// When not running every packet is forwarded untouched. `sender`
    /// identifies the originating client queue for later re-injection.
    pub async fn on_guest_packet(
        &self,
        raw: Bytes,
        sender: Option<SenderId>,
    ) -> Result<Disposition> {
        if !self.is_running() {
            return Ok(Disposition::Forward);
        }

        match self.config.mode {
            ProxyMode::Primary => {
                match Packet::classify(raw, Side::Primary) {
                    Ok(packet) => {
                        let packet = match sender {
                            Some(id) => packet.with_sender(id),
                            None => packet,
                        };
                        self.state.track(packet);
                    }
                    Err(e) => {
                        debug!(error = %e, "Guest packet not tracked");
                        metrics::record_classification_failure(Side::Primary);
                    }
                }
                Ok(Disposition::Forward)
            }
            ProxyMode::Secondary => self.send_to_peer(raw, Disposition::Consumed).await,
        }
    }

    /// Handle a packet headed into the local guest.
    ///
    /// The primary mirrors it to the secondary so both guests see the
    /// same input. Either way the packet continues on its normal path.
    pub async fn on_client_packet(&self, raw: Bytes) -> Result<Disposition> {
        if !self.is_running() || self.config.mode == ProxyMode::Secondary {
            return Ok(Disposition::Forward);
        }
        self.send_to_peer(raw, Disposition::Forward).await
    }

    async fn send_to_peer(&self, raw: Bytes, on_success: Disposition) -> Result<Disposition> {
        let Some(sender) = self.sender.as_ref() else {
            return Ok(Disposition::Forward);
        };

        match sender.send(raw).await {
            Ok(()) => Ok(on_success),
            // Too big to frame: not sent, the session survives. Secondary
            // output still never reaches the client.
            Err(ProxyError::FrameTooLarge { len, max }) => {
                warn!(len, max, "Packet exceeds frame limit, not sent to peer");
                metrics::record_frame_dropped("oversized");
                Ok(on_success)
            }
            Err(e) => {
                metrics::record_transport_failure("send");
                self.state.fail(&e);
                Err(e)
            }
        }
    }

    /// Stop the session.
    ///
    /// Status becomes `Done`, the peer connection is closed and the
    /// background tasks are joined. Calling it again on a stopped proxy is
    /// a no-op.
    pub async fn stop(&mut self, mode: ProxyMode) -> Result<()> {
        self.check_mode(mode)?;
        match self.status() {
            ProxyStatus::NotStarted => Err(ProxyError::InvalidState {
                expected: ProxyStatus::Running.to_string(),
                actual: ProxyStatus::NotStarted.to_string(),
            }),
            ProxyStatus::Running | ProxyStatus::Done => {
                self.teardown().await;
                Ok(())
            }
        }
    }

    async fn teardown(&mut self) {
        if self.sender.is_none() && self.handles.is_empty() {
            return;
        }

        info!(mode = %self.config.mode, "Stopping COLO proxy");
        self.state.set_status(ProxyStatus::Done);
        let _ = self.shutdown_tx.send(true);
        self.state.wake.notify_one();

        if let Some(sender) = self.sender.take() {
            if let Err(e) = sender.close().await {
                debug!(error = %e, "Peer connection already closed");
            }
        }

        let stop_timeout = self.config.settings.compare.stop_timeout_duration();
        for (i, handle) in std::mem::take(&mut self.handles).into_iter().enumerate() {
            match tokio::time::timeout(stop_timeout, handle).await {
                Ok(Ok(())) => debug!(task = i + 1, "Task completed"),
                Ok(Err(e)) => warn!(task = i + 1, error = %e, "Task panicked during stop"),
                Err(_) => warn!(task = i + 1, "Task did not stop in time"),
            }
        }

        let released = self.state.registry.lock().flush();
        info!(released, "COLO proxy stopped");
    }

    /// Return a `Done` proxy to `NotStarted` for a new session.
    ///
    /// Flows, the checkpoint flag and the recorded failure are discarded.
    pub async fn reset(&mut self) -> Result<()> {
        match self.status() {
            ProxyStatus::NotStarted => return Ok(()),
            ProxyStatus::Running => {
                return Err(ProxyError::InvalidState {
                    expected: ProxyStatus::Done.to_string(),
                    actual: ProxyStatus::Running.to_string(),
                })
            }
            ProxyStatus::Done => {}
        }

        // A fatal error ends the session without joining the tasks.
        self.teardown().await;

        self.state.registry.lock().clear();
        self.state.clear_checkpoint();
        *self.state.failure.lock() = None;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.shutdown_rx = shutdown_rx;
        self.state.set_status(ProxyStatus::NotStarted);

        info!(mode = %self.config.mode, "COLO proxy reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(mode: ProxyMode) -> ColoProxy {
        ColoProxy::new(ProxyConfig::for_testing(mode, "127.0.0.1:1"))
    }

    #[test]
    fn test_initial_state() {
        let proxy = proxy(ProxyMode::Primary);
        assert_eq!(proxy.status(), ProxyStatus::NotStarted);
        assert!(!proxy.is_running());
        assert_eq!(proxy.mode(), ProxyMode::Primary);
        assert_eq!(proxy.tracked_connections(), 0);
        assert!(!proxy.query_checkpoint_requested());
        assert!(proxy.last_failure().is_none());
    }

    #[test]
    fn test_status_receiver() {
        let proxy = proxy(ProxyMode::Secondary);
        let rx = proxy.status_receiver();
        assert_eq!(*rx.borrow(), ProxyStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_start_wrong_mode() {
        let mut proxy = proxy(ProxyMode::Primary);
        let err = proxy.start(ProxyMode::Secondary).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidState { .. }));
        assert_eq!(proxy.status(), ProxyStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_start_invalid_config() {
        let mut proxy = ColoProxy::new(ProxyConfig::for_testing(ProxyMode::Primary, ""));
        let err = proxy.start(ProxyMode::Primary).await.unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[tokio::test]
    async fn test_start_failure_keeps_not_started() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let mut proxy = ColoProxy::new(ProxyConfig::for_testing(ProxyMode::Primary, &addr));
        let err = proxy.start(ProxyMode::Primary).await.unwrap_err();
        assert!(matches!(err, ProxyError::Startup { .. }));
        assert_eq!(proxy.status(), ProxyStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let mut proxy = proxy(ProxyMode::Primary);
        assert!(proxy.stop(ProxyMode::Primary).await.is_err());
        assert!(proxy.stop(ProxyMode::Secondary).await.is_err());
    }

    #[tokio::test]
    async fn test_packets_pass_through_when_not_running() {
        let proxy = proxy(ProxyMode::Secondary);
        let raw = Bytes::from_static(&[0u8; 64]);
        assert_eq!(proxy.on_guest_packet(raw.clone(), None).await.unwrap(), Disposition::Forward);
        assert_eq!(proxy.on_client_packet(raw).await.unwrap(), Disposition::Forward);
        assert_eq!(proxy.tracked_connections(), 0);
    }

    #[tokio::test]
    async fn test_reset_not_started_is_noop() {
        let mut proxy = proxy(ProxyMode::Primary);
        proxy.reset().await.unwrap();
        assert_eq!(proxy.status(), ProxyStatus::NotStarted);
    }

    #[test]
    fn test_acknowledge_without_request() {
        let proxy = proxy(ProxyMode::Primary);
        assert_eq!(proxy.acknowledge_checkpoint(), 0);
        assert!(!proxy.query_checkpoint_requested());
    }
}
