//! Fuzz target for connection key hashing and registry bookkeeping.
//!
//! Feeds arbitrary keys through a small registry: lookups must be stable
//! and the bound must always hold.

#![no_main]

use colo_proxy::{ConnectionKey, Registry};
use libfuzzer_sys::fuzz_target;
use std::net::Ipv4Addr;

fuzz_target!(|keys: Vec<(u32, u32, u16, u16, u8)>| {
    let mut registry = Registry::new(8);

    for (src, dst, sp, dp, proto) in keys {
        let key = ConnectionKey::new(Ipv4Addr::from(src), Ipv4Addr::from(dst), sp, dp, proto);
        assert_eq!(key.jhash(), key.jhash());

        registry.lookup_or_create(key);
        assert!(registry.contains(&key));
        assert!(!registry.lookup_or_create(key).created);
        assert!(registry.size() <= 8);
    }
});
