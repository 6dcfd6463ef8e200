// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Flow registry.
//!
//! Maps each [`ConnectionKey`] to one [`Connection`] holding the pending
//! primary and secondary packets of that flow. The registry is bounded:
//! inserting a new key at capacity evicts the least-recently-active flow
//! first, so the packet path never blocks or fails on registry pressure.
//!
//! Flows with queued work are also kept on a pending list so the
//! comparison task only visits flows that changed. A flow is on that list
//! at most once; its `processing` flag records membership.
//!
//! The registry is not synchronized itself. The coordinator keeps it
//! behind one mutex shared by the packet path and the comparison task.

use crate::key::{ConnectionKey, FlowHashBuilder};
use crate::metrics;
use crate::packet::{Packet, Side, IPPROTO_TCP};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use tracing::debug;

/// Why a flow left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Registry was full and this flow was the least recently active.
    Capacity,
    /// TCP teardown observed on both replicas.
    Closed,
    /// Caller removed the flow explicitly.
    Removed,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::Capacity => write!(f, "capacity"),
            EvictionReason::Closed => write!(f, "closed"),
            EvictionReason::Removed => write!(f, "removed"),
        }
    }
}

/// Summary of a flow that was destroyed, after its queues were drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedFlow {
    pub key: ConnectionKey,
    pub primary_drained: usize,
    pub secondary_drained: usize,
    pub reason: EvictionReason,
}

/// TCP teardown tracking for one flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpState {
    pub primary_fin: bool,
    pub secondary_fin: bool,
    pub reset: bool,
}

impl TcpState {
    /// Record flags of a packet both replicas agreed on.
    pub fn observe(&mut self, primary: &Packet, secondary: &Packet) {
        if let Some(flags) = primary.tcp_flags() {
            self.primary_fin |= flags.fin;
            self.reset |= flags.rst;
        }
        if let Some(flags) = secondary.tcp_flags() {
            self.secondary_fin |= flags.fin;
            self.reset |= flags.rst;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reset || (self.primary_fin && self.secondary_fin)
    }
}

/// Protocol-specific flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoState {
    Tcp(TcpState),
    Stateless,
}

/// Per-flow record.
#[derive(Debug)]
pub struct Connection {
    pub primary_list: VecDeque<Packet>,
    pub secondary_list: VecDeque<Packet>,
    /// Flow is on the registry's pending list.
    pub processing: bool,
    /// Divergence reported; draining is paused until the checkpoint completes.
    pub diverged: bool,
    pub ip_proto: u8,
    pub proto: ProtoState,
    last_active: u64,
}

impl Connection {
    fn new(ip_proto: u8, tick: u64) -> Self {
        let proto = if ip_proto == IPPROTO_TCP {
            ProtoState::Tcp(TcpState::default())
        } else {
            ProtoState::Stateless
        };
        Self {
            primary_list: VecDeque::new(),
            secondary_list: VecDeque::new(),
            processing: false,
            diverged: false,
            ip_proto,
            proto,
            last_active: tick,
        }
    }

    /// Append to the queue of the packet's side, keeping arrival order.
    pub fn push(&mut self, packet: Packet) {
        match packet.side() {
            Side::Primary => self.primary_list.push_back(packet),
            Side::Secondary => self.secondary_list.push_back(packet),
        }
    }

    pub fn queue_len(&self, side: Side) -> usize {
        match side {
            Side::Primary => self.primary_list.len(),
            Side::Secondary => self.secondary_list.len(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.primary_list.is_empty() && self.secondary_list.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.proto, ProtoState::Tcp(tcp) if tcp.is_closed())
    }

    /// Release every queued packet, returning (primary, secondary) counts.
    fn drain(&mut self) -> (usize, usize) {
        let drained = (self.primary_list.len(), self.secondary_list.len());
        self.primary_list.clear();
        self.secondary_list.clear();
        drained
    }
}

/// Result of [`Registry::lookup_or_create`].
pub struct FlowSlot<'a> {
    pub connection: &'a mut Connection,
    /// Flow destroyed to make room, if any.
    pub evicted: Option<EvictedFlow>,
    pub created: bool,
}

/// Bounded map of live flows.
pub struct Registry {
    connections: HashMap<ConnectionKey, Connection, FlowHashBuilder>,
    /// Activity order: tick -> key. Oldest first.
    lru: BTreeMap<u64, ConnectionKey>,
    pending: VecDeque<ConnectionKey>,
    max_connections: usize,
    /// Per-side queue bound for diverged flows.
    diverged_queue_limit: usize,
    tick: u64,
}

impl Registry {
    /// Create an empty registry holding at most `max_connections` flows.
    ///
    /// A bound of zero is treated as one.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::with_hasher(FlowHashBuilder::default()),
            lru: BTreeMap::new(),
            pending: VecDeque::new(),
            max_connections: max_connections.max(1),
            diverged_queue_limit: usize::MAX,
            tick: 0,
        }
    }

    /// Bound each queue of a diverged flow to `limit` packets.
    ///
    /// A diverged flow is not compared again until the checkpoint
    /// completes, so without a bound its queues grow with every packet.
    /// Packets arriving at a full queue are dropped.
    pub fn with_diverged_queue_limit(mut self, limit: usize) -> Self {
        self.diverged_queue_limit = limit.max(1);
        self
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.connections.contains_key(key)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.connections.get(key)
    }

    pub fn get_mut(&mut self, key: &ConnectionKey) -> Option<&mut Connection> {
        self.connections.get_mut(key)
    }

    /// Find the flow for `key`, creating it if needed.
    ///
    /// At capacity, the least-recently-active flow is drained and removed
    /// before the new one is inserted. Either way the flow is marked as
    /// the most recently active.
    pub fn lookup_or_create(&mut self, key: ConnectionKey) -> FlowSlot<'_> {
        self.tick += 1;
        let tick = self.tick;

        let mut evicted = None;
        let created = !self.connections.contains_key(&key);
        if created {
            if self.connections.len() >= self.max_connections {
                evicted = self.evict_oldest();
            }
            metrics::set_tracked_connections(self.connections.len() + 1);
            debug!(flow = %key, "Tracking new flow");
        }

        let connection = self
            .connections
            .entry(key)
            .or_insert_with(|| Connection::new(key.ip_proto, tick));
        if !created {
            self.lru.remove(&connection.last_active);
            connection.last_active = tick;
        }
        self.lru.insert(tick, key);

        FlowSlot {
            connection,
            evicted,
            created,
        }
    }

    /// Queue `packet` on its flow and put the flow on the pending list.
    ///
    /// On a diverged flow whose queue for the packet's side is already at
    /// the diverged limit, the packet is dropped instead. Returns the flow
    /// evicted to make room, if any.
    pub fn enqueue(&mut self, packet: Packet) -> Option<EvictedFlow> {
        let key = *packet.key();
        let limit = self.diverged_queue_limit;
        let slot = self.lookup_or_create(key);
        let conn = slot.connection;
        if conn.diverged && conn.queue_len(packet.side()) >= limit {
            debug!(flow = %key, side = %packet.side(), "Diverged flow queue full, packet dropped");
            metrics::record_frame_dropped("diverged");
            return slot.evicted;
        }
        conn.push(packet);
        let evicted = slot.evicted;
        self.schedule(&key);
        evicted
    }

    /// Put a flow on the pending list unless it already is.
    ///
    /// Diverged flows stay off the list until the checkpoint completes.
    pub fn schedule(&mut self, key: &ConnectionKey) -> bool {
        match self.connections.get_mut(key) {
            Some(conn) if !conn.processing && !conn.diverged => {
                conn.processing = true;
                self.pending.push_back(*key);
                true
            }
            _ => false,
        }
    }

    /// Take the current pending list, oldest first.
    pub fn take_pending(&mut self) -> Vec<ConnectionKey> {
        self.pending.drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Packets waiting in any queue, both sides.
    pub fn queued_packets(&self) -> usize {
        self.connections
            .values()
            .map(|c| c.primary_list.len() + c.secondary_list.len())
            .sum()
    }

    /// Destroy a flow, draining its queues first.
    pub fn remove(&mut self, key: &ConnectionKey) -> Option<EvictedFlow> {
        self.remove_with_reason(key, EvictionReason::Removed)
    }

    pub(crate) fn remove_with_reason(
        &mut self,
        key: &ConnectionKey,
        reason: EvictionReason,
    ) -> Option<EvictedFlow> {
        let mut conn = self.connections.remove(key)?;
        self.lru.remove(&conn.last_active);
        if conn.processing {
            self.pending.retain(|k| k != key);
        }
        let (primary_drained, secondary_drained) = conn.drain();
        metrics::set_tracked_connections(self.connections.len());
        metrics::record_eviction(reason);
        debug!(
            flow = %key,
            %reason,
            primary_drained,
            secondary_drained,
            "Flow removed"
        );
        Some(EvictedFlow {
            key: *key,
            primary_drained,
            secondary_drained,
            reason,
        })
    }

    fn evict_oldest(&mut self) -> Option<EvictedFlow> {
        let key = *self.lru.values().next()?;
        self.remove_with_reason(&key, EvictionReason::Capacity)
    }

    /// Drop every queued packet and clear divergence marks.
    ///
    /// Flows themselves stay registered. Returns the number of packets released.
    pub fn flush(&mut self) -> usize {
        let mut released = 0;
        for conn in self.connections.values_mut() {
            let (p, s) = conn.drain();
            released += p + s;
            conn.processing = false;
            conn.diverged = false;
        }
        self.pending.clear();
        released
    }

    /// Forget every flow.
    pub fn clear(&mut self) {
        self.connections.clear();
        self.lru.clear();
        self.pending.clear();
        self.tick = 0;
        metrics::set_tracked_connections(0);
    }
}
