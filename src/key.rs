// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Flow identity.
//!
//! A [`ConnectionKey`] is the exact 5-tuple of an IPv4 packet. Direction is
//! part of the identity: `A:1 -> B:2` and `B:2 -> A:1` are different keys,
//! so the two halves of one TCP connection are tracked as two flows unless
//! the caller normalizes them first.
//!
//! Keys hash with Bob Jenkins' lookup3 mix. The registry map feeds that
//! 32-bit value straight through [`FlowHasher`] instead of re-hashing it.

use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::net::Ipv4Addr;

/// Jenkins hash initial value.
const JHASH_INITVAL: u32 = 0xdead_beef;

/// Packed size of a key on the wire: 4 + 4 + 2 + 2 + 1.
const KEY_SIZE: u32 = 13;

/// Exact-match flow key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub ip_proto: u8,
}

impl ConnectionKey {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, ip_proto: u8) -> Self {
        Self {
            src,
            dst,
            src_port,
            dst_port,
            ip_proto,
        }
    }

    /// 32-bit Jenkins hash over all five fields.
    ///
    /// Ports are folded as `src_port | dst_port << 16`, addresses as
    /// big-endian words. Fields are never swapped.
    pub fn jhash(&self) -> u32 {
        let mut a = JHASH_INITVAL.wrapping_add(KEY_SIZE);
        let mut b = a;
        let mut c = a;

        a = a.wrapping_add(u32::from(self.src));
        b = b.wrapping_add(u32::from(self.dst));
        c = c.wrapping_add(u32::from(self.src_port) | (u32::from(self.dst_port) << 16));
        jhash_mix(&mut a, &mut b, &mut c);

        a = a.wrapping_add(u32::from(self.ip_proto));
        jhash_final(&mut a, &mut b, &mut c);

        c
    }
}

impl Hash for ConnectionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.jhash());
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} (proto={})",
            self.src, self.src_port, self.dst, self.dst_port, self.ip_proto
        )
    }
}

#[inline]
fn jhash_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

#[inline]
fn jhash_final(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

/// Pass-through hasher for [`ConnectionKey`], which feeds it a single
/// `write_u32` of its Jenkins hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlowHasher {
    hash: u64,
}

impl Hasher for FlowHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.hash = self.hash.rotate_left(8) ^ u64::from(*byte);
        }
    }

    fn write_u32(&mut self, i: u32) {
        // Spread into the high bits too; hashbrown takes its control byte from them.
        self.hash = u64::from(i) | (u64::from(i) << 32);
    }
}

/// `BuildHasher` used by the flow registry.
pub type FlowHashBuilder = BuildHasherDefault<FlowHasher>;
