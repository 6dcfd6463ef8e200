//! Frame builders.
//!
//! All frames are Ethernet II / IPv4 from 10.0.0.1 to 10.0.0.2.

use bytes::Bytes;
use etherparse::PacketBuilder;

pub const SRC_IP: [u8; 4] = [10, 0, 0, 1];
pub const DST_IP: [u8; 4] = [10, 0, 0, 2];

/// UDP frame with the given ports and payload.
pub fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Bytes {
    let builder = PacketBuilder::ethernet2([0x52, 0x54, 0, 0, 0, 1], [0x52, 0x54, 0, 0, 0, 2])
        .ipv4(SRC_IP, DST_IP, 64)
        .udp(src_port, dst_port);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    Bytes::from(frame)
}

/// UDP frame on port 5000 -> 6000.
pub fn udp(payload: &[u8]) -> Bytes {
    udp_frame(5000, 6000, payload)
}

/// TCP control bits for [`tcp_frame`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub fin: bool,
    pub rst: bool,
}

/// TCP frame 40000 -> 80.
pub fn tcp_frame(seq: u32, flags: Flags, payload: &[u8]) -> Bytes {
    let mut builder = PacketBuilder::ethernet2([0x52, 0x54, 0, 0, 0, 1], [0x52, 0x54, 0, 0, 0, 2])
        .ipv4(SRC_IP, DST_IP, 64)
        .tcp(40000, 80, seq, 65535)
        .ack(1);
    if flags.fin {
        builder = builder.fin();
    }
    if flags.rst {
        builder = builder.rst();
    }
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    Bytes::from(frame)
}

/// Too short to hold an Ethernet header.
pub fn runt() -> Bytes {
    Bytes::from_static(&[0xff; 10])
}
