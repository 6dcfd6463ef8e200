// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Packet delivery integration trait.
//!
//! On the secondary, frames received from the primary are not compared.
//! They are handed back to the host's network path so the secondary guest
//! sees the same inbound traffic as the primary guest. The host provides
//! an implementation of [`PacketDelivery`] to do that.
//!
//! # Example
//!
//! ```rust
//! use colo_proxy::delivery::PacketDelivery;
//! use bytes::Bytes;
//!
//! struct TapWriter { /* ... */ }
//!
//! impl PacketDelivery for TapWriter {
//!     fn deliver(&self, frame: Bytes) {
//!         // write `frame` to the guest's receive queue
//!         let _ = frame;
//!     }
//! }
//! ```

use bytes::Bytes;

/// Re-injects a peer frame into the local guest's traffic path.
///
/// Called from the receive task; must not block for long.
pub trait PacketDelivery: Send + Sync + 'static {
    fn deliver(&self, frame: Bytes);
}

/// Discards every frame (for testing or a primary-only setup).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDelivery;

impl PacketDelivery for NoOpDelivery {
    fn deliver(&self, _frame: Bytes) {}
}

impl<T: PacketDelivery + ?Sized> PacketDelivery for std::sync::Arc<T> {
    fn deliver(&self, frame: Bytes) {
        (**self).deliver(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Bytes>>);

    impl PacketDelivery for Recorder {
        fn deliver(&self, frame: Bytes) {
            self.0.lock().push(frame);
        }
    }

    #[test]
    fn test_noop_accepts_anything() {
        NoOpDelivery.deliver(Bytes::from_static(b"ignored"));
        NoOpDelivery.deliver(Bytes::new());
    }

    #[test]
    fn test_arc_forwards() {
        let inner = Arc::new(Recorder::default());
        let outer: Arc<Arc<Recorder>> = Arc::new(Arc::clone(&inner));
        outer.deliver(Bytes::from_static(b"abc"));
        assert_eq!(inner.0.lock().len(), 1);
        assert_eq!(&inner.0.lock()[0][..], b"abc");
    }
}
