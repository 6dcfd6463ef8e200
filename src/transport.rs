// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-host transport between the primary and secondary proxies.
//!
//! One TCP connection carries every frame in both directions:
//!
//! ```text
//! +-------------------+----------------------+
//! | len (u32, BE)     | payload (len bytes)  |
//! +-------------------+----------------------+
//! ```
//!
//! A zero-length frame is a valid no-op and is skipped by the receiver.
//! The length is checked against `max_frame_size` before any payload is
//! buffered, so a corrupted peer cannot make us allocate arbitrarily.
//!
//! The primary connects, the secondary listens and accepts exactly one
//! peer. A lost connection is never retried here: ordering across a gap
//! cannot be reconstructed, so the coordinator ends the session instead.

use crate::config::TransportConfig;
use crate::error::{ProxyError, Result};
use crate::metrics;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tracing::{info, warn};

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Length-prefixed frame codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_size {
            return Err(ProxyError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        let total = LENGTH_PREFIX_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProxyError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        let too_large = ProxyError::FrameTooLarge {
            len: item.len(),
            max: self.max_frame_size,
        };
        if item.len() > self.max_frame_size {
            return Err(too_large);
        }
        let len = u32::try_from(item.len()).map_err(|_| too_large)?;
        dst.reserve(LENGTH_PREFIX_LEN + item.len());
        dst.put_u32(len);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// An established peer connection, not yet split.
pub struct Transport {
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_size: usize,
}

impl Transport {
    /// Connect to a listening secondary (primary side).
    pub async fn connect(addr: &str, config: &TransportConfig) -> Result<Self> {
        let connect_timeout = config.connect_timeout_duration();
        info!(addr = %addr, timeout_ms = connect_timeout.as_millis(), "Connecting to secondary");

        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                ProxyError::startup(addr, format!("connect timed out after {:?}", connect_timeout))
            })?
            .map_err(|e| ProxyError::startup(addr, e.to_string()))?;

        Self::from_stream(stream, config.max_frame_size)
            .map_err(|e| ProxyError::startup(addr, e.to_string()))
    }

    /// Listen on `addr` and accept exactly one primary (secondary side).
    ///
    /// Blocks until the peer connects. A bare `:port` listens on all
    /// interfaces.
    pub async fn accept(addr: &str, config: &TransportConfig) -> Result<Self> {
        let bind_addr = normalize_listen_addr(addr);
        let listener = TcpListener::bind(bind_addr.as_str())
            .await
            .map_err(|e| ProxyError::startup(addr, format!("listen failed: {}", e)))?;
        Self::accept_on(listener, config).await
    }

    /// Accept one peer on an already bound listener, then close it.
    pub async fn accept_on(listener: TcpListener, config: &TransportConfig) -> Result<Self> {
        let local = listener
            .local_addr()
            .map_err(|e| ProxyError::startup("unbound", e.to_string()))?;
        info!(addr = %local, "Waiting for primary to connect");

        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| ProxyError::startup(local.to_string(), format!("accept failed: {}", e)))?;
        drop(listener);

        info!(peer = %peer, "Primary connected");
        Self::from_stream(stream, config.max_frame_size)
    }

    /// Wrap an established stream.
    pub fn from_stream(stream: TcpStream, max_frame_size: usize) -> Result<Self> {
        let peer = stream.peer_addr().map_err(|e| ProxyError::transport("peer_addr", e))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(Self {
            stream,
            peer,
            max_frame_size,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Split into independently owned send and receive halves.
    pub fn split(self) -> (FrameSender, FrameReceiver) {
        let codec = FrameCodec::new(self.max_frame_size);
        let (read, write) = self.stream.into_split();
        (
            FrameSender {
                writer: Mutex::new(FramedWrite::new(write, codec)),
                max_frame_size: self.max_frame_size,
                peer: self.peer,
            },
            FrameReceiver {
                reader: FramedRead::new(read, codec),
                peer: self.peer,
            },
        )
    }
}

/// Sending half. Shared by every packet-path caller.
pub struct FrameSender {
    writer: Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>,
    max_frame_size: usize,
    peer: SocketAddr,
}

impl FrameSender {
    /// Write one frame and flush it. Empty payloads are not sent.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        let len = payload.len();
        if len == 0 {
            return Ok(());
        }
        if len > self.max_frame_size {
            return Err(ProxyError::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        self.writer.lock().await.send(payload).await?;
        metrics::record_frame_sent(len);
        Ok(())
    }

    /// Flush and shut down the write side.
    pub async fn close(&self) -> Result<()> {
        self.writer.lock().await.close().await
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Receiving half. Owned by the receive task.
pub struct FrameReceiver {
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    peer: SocketAddr,
}

impl FrameReceiver {
    /// Next non-empty frame.
    ///
    /// Peer EOF is [`ProxyError::ConnectionLost`]; an oversized length
    /// prefix is [`ProxyError::FrameTooLarge`]. Both are fatal.
    pub async fn recv(&mut self) -> Result<Bytes> {
        loop {
            match self.reader.next().await {
                Some(Ok(frame)) if frame.is_empty() => continue,
                Some(Ok(frame)) => {
                    metrics::record_frame_received(frame.len());
                    return Ok(frame);
                }
                Some(Err(e)) => return Err(e),
                None => return Err(ProxyError::ConnectionLost),
            }
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// `:12345` means every interface.
fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
