// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Packet model and classification.
//!
//! [`classify`] parses an Ethernet frame only as far as needed to build a
//! [`ConnectionKey`]: link header (VLAN tags skipped), IPv4 header, and the
//! first bytes of the TCP/UDP/ICMP header. The resulting [`Packet`] owns
//! its bytes and keeps validated offsets into them, so later comparison
//! never re-parses and never depends on the caller's buffer.
//!
//! ```text
//! 0          network_offset   transport_offset   payload_offset      end
//! | ethernet |  ipv4 header   |  l4 header       |  payload          | pad
//! ```

use crate::error::ClassificationError;
use crate::key::ConnectionKey;
use bytes::Bytes;
use etherparse::{Ipv4HeaderSlice, TcpHeaderSlice, UdpHeaderSlice};
use std::fmt;

const ETH_HEADER_LEN: usize = 14;
const ETH_TYPE_OFFSET: usize = 12;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const VLAN_TAG_LEN: usize = 4;

const IPV4_MIN_HEADER_LEN: usize = 20;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const ICMP_HEADER_LEN: usize = 8;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Which replica produced a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Primary,
    Secondary,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Primary => write!(f, "primary"),
            Side::Secondary => write!(f, "secondary"),
        }
    }
}

/// Opaque handle for the client that handed us a packet, kept so the
/// packet can be re-injected towards it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u64);

/// TCP control bits relevant to flow teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

/// One captured frame with parsed offsets.
#[derive(Clone)]
pub struct Packet {
    data: Bytes,
    network_offset: usize,
    transport_offset: usize,
    payload_offset: usize,
    end: usize,
    key: ConnectionKey,
    tcp_flags: Option<TcpFlags>,
    side: Side,
    sender: Option<SenderId>,
}

impl Packet {
    /// Classify an owned buffer without copying it.
    pub fn classify(data: Bytes, side: Side) -> Result<Self, ClassificationError> {
        let network_offset = link_header_len(&data)?;

        let len = data.len();
        if len < network_offset + IPV4_MIN_HEADER_LEN {
            return Err(ClassificationError::TooShort {
                len,
                need: network_offset + IPV4_MIN_HEADER_LEN,
            });
        }

        let ip = Ipv4HeaderSlice::from_slice(&data[network_offset..])
            .map_err(|e| ClassificationError::MalformedHeader(e.to_string()))?;
        let ip_header_len = ip.slice().len();
        let total_len = usize::from(ip.total_len());
        if total_len < ip_header_len {
            return Err(ClassificationError::MalformedHeader(format!(
                "ipv4 total length {} below header length {}",
                total_len, ip_header_len
            )));
        }

        let transport_offset = network_offset + ip_header_len;
        // Trailing link-layer padding is not part of the datagram.
        let end = len.min(network_offset + total_len);
        let ip_proto = ip.protocol().0;
        let (src, dst) = (ip.source_addr(), ip.destination_addr());

        let l4 = &data[transport_offset..end];
        let (src_port, dst_port, l4_header_len, tcp_flags) = match ip_proto {
            IPPROTO_TCP => {
                require(l4.len(), TCP_MIN_HEADER_LEN, transport_offset)?;
                let tcp = TcpHeaderSlice::from_slice(l4)
                    .map_err(|e| ClassificationError::MalformedHeader(e.to_string()))?;
                let flags = TcpFlags {
                    syn: tcp.syn(),
                    fin: tcp.fin(),
                    rst: tcp.rst(),
                };
                (tcp.source_port(), tcp.destination_port(), tcp.slice().len(), Some(flags))
            }
            IPPROTO_UDP => {
                require(l4.len(), UDP_HEADER_LEN, transport_offset)?;
                let udp = UdpHeaderSlice::from_slice(l4)
                    .map_err(|e| ClassificationError::MalformedHeader(e.to_string()))?;
                (udp.source_port(), udp.destination_port(), UDP_HEADER_LEN, None)
            }
            IPPROTO_ICMP => {
                require(l4.len(), ICMP_HEADER_LEN, transport_offset)?;
                (0, 0, ICMP_HEADER_LEN, None)
            }
            other => return Err(ClassificationError::UnsupportedProtocol(other)),
        };

        Ok(Self {
            key: ConnectionKey::new(src, dst, src_port, dst_port, ip_proto),
            network_offset,
            transport_offset,
            payload_offset: transport_offset + l4_header_len,
            end,
            tcp_flags,
            side,
            sender: None,
            data,
        })
    }

    /// Attach the originating client.
    pub fn with_sender(mut self, sender: SenderId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn sender(&self) -> Option<SenderId> {
        self.sender
    }

    pub fn ip_proto(&self) -> u8 {
        self.key.ip_proto
    }

    /// TCP control bits, `None` for UDP and ICMP.
    pub fn tcp_flags(&self) -> Option<TcpFlags> {
        self.tcp_flags
    }

    /// The whole captured frame.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// IPv4 header bytes, options included.
    pub fn network_header(&self) -> &[u8] {
        self.slice(self.network_offset, self.transport_offset)
    }

    /// TCP/UDP/ICMP header bytes.
    pub fn transport_header(&self) -> &[u8] {
        self.slice(self.transport_offset, self.payload_offset)
    }

    /// Transport payload, excluding link-layer padding.
    pub fn payload(&self) -> &[u8] {
        self.slice(self.payload_offset, self.end)
    }

    fn slice(&self, from: usize, to: usize) -> &[u8] {
        self.data.get(from..to).unwrap_or(&[])
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("key", &self.key)
            .field("side", &self.side)
            .field("len", &self.data.len())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

/// Classify a borrowed buffer, copying it into the packet.
pub fn classify(raw: &[u8], side: Side) -> Result<Packet, ClassificationError> {
    Packet::classify(Bytes::copy_from_slice(raw), side)
}

/// Length of the Ethernet header including any VLAN tags.
fn link_header_len(data: &[u8]) -> Result<usize, ClassificationError> {
    let len = data.len();
    if len < ETH_HEADER_LEN {
        return Err(ClassificationError::TooShort {
            len,
            need: ETH_HEADER_LEN,
        });
    }

    let mut type_offset = ETH_TYPE_OFFSET;
    let mut eth_type = read_u16(data, type_offset);
    while eth_type == ETHERTYPE_VLAN || eth_type == ETHERTYPE_QINQ {
        type_offset += VLAN_TAG_LEN;
        if type_offset + 2 > len {
            return Err(ClassificationError::TooShort {
                len,
                need: type_offset + 2,
            });
        }
        eth_type = read_u16(data, type_offset);
    }

    if eth_type != ETHERTYPE_IPV4 {
        return Err(ClassificationError::UnsupportedEtherType(eth_type));
    }
    Ok(type_offset + 2)
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn require(available: usize, need: usize, offset: usize) -> Result<(), ClassificationError> {
    if available < need {
        return Err(ClassificationError::TooShort {
            len: offset + available,
            need: offset + need,
        });
    }
    Ok(())
}
