//! Mock PacketDelivery for testing.
//!
//! Records every frame the secondary re-injects so tests can assert on
//! exactly what reached the (simulated) guest.

use bytes::Bytes;
use colo_proxy::PacketDelivery;
use parking_lot::Mutex;

/// Records delivered frames in arrival order.
#[derive(Default)]
pub struct MockDelivery {
    frames: Mutex<Vec<Bytes>>,
}

impl MockDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }
}

impl PacketDelivery for MockDelivery {
    fn deliver(&self, frame: Bytes) {
        self.frames.lock().push(frame);
    }
}
