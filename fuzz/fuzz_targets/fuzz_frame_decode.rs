//! Fuzz target for peer frame decoding.
//!
//! The decoder sees raw bytes from the other replica. Arbitrary input must
//! yield frames, a clean "need more", or a FrameTooLarge error. Never a
//! panic, and never a frame above the limit.

#![no_main]

use bytes::BytesMut;
use colo_proxy::transport::FrameCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

const MAX: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let mut codec = FrameCodec::new(MAX);
    let mut buf = BytesMut::from(data);

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(frame)) => assert!(frame.len() <= MAX),
            Ok(None) => break,
            Err(_) => break,
        }
    }
});
