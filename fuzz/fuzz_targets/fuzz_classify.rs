//! Fuzz target for packet classification.
//!
//! Classification runs on untrusted guest and peer bytes. It must never
//! panic, and every accessor on a classified packet must stay in bounds.

#![no_main]

use colo_proxy::packet::{classify, Side};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = classify(data, Side::Primary) {
        assert!(packet.len() <= data.len());
        let header = packet.network_header().len();
        let transport = packet.transport_header().len();
        let payload = packet.payload().len();
        assert!(header + transport + payload <= packet.len());
        let _ = packet.tcp_flags();
        let _ = packet.key().jhash();
    }
});
