//! Per-connection packet framing and echo

use crate::config::ServerConfig;
use crate::server::LogStore;
use crate::types::{find_nul, PacketCodec, RemainderPolicy};
use crate::{PacketLogError, Result};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Tunables for a single session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Maximum bytes taken from the socket per receive
    pub chunk_size: usize,
    /// Largest packet accepted before the connection is dropped
    pub max_packet_bytes: usize,
    /// Handling of bytes that follow a newline in the same receive
    pub remainder: RemainderPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            max_packet_bytes: 1024 * 1024,
            remainder: RemainderPolicy::Preserve,
        }
    }
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            chunk_size: config.server.chunk_size,
            max_packet_bytes: config.framing.max_packet_bytes,
            remainder: RemainderPolicy::from_preserve(config.framing.preserve_remainder),
        }
    }
}

/// How a session finished without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its side. `discarded` bytes of an unterminated packet
    /// were never committed.
    PeerClosed {
        /// Uncommitted bytes dropped with the connection
        discarded: usize,
    },
    /// The server is shutting down
    Cancelled,
}

/// Protocol state machine for one client connection.
///
/// The session waits for either socket data or cancellation. Received bytes
/// accumulate until a newline completes a packet, which is committed to the
/// [`LogStore`]; the full log returned by the store is then written back to
/// the peer. Only bytes of the packet in progress are ever held locally.
pub struct Session<S> {
    stream: S,
    peer: SocketAddr,
    store: Arc<LogStore>,
    codec: PacketCodec,
    accumulator: BytesMut,
    chunk: Vec<u8>,
    packets: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session over an accepted stream
    pub fn new(stream: S, peer: SocketAddr, store: Arc<LogStore>, settings: SessionSettings) -> Self {
        Self {
            stream,
            peer,
            store,
            codec: PacketCodec::new(settings.max_packet_bytes, settings.remainder),
            accumulator: BytesMut::with_capacity(settings.chunk_size),
            chunk: vec![0; settings.chunk_size.max(1)],
            packets: 0,
        }
    }

    /// Drive the connection until the peer closes it, `cancel` fires or an
    /// error occurs.
    ///
    /// Receive failures and oversized packets are returned as
    /// [`PacketLogError::Connection`] / [`PacketLogError::PacketTooLarge`];
    /// log file failures as [`PacketLogError::Storage`]. The caller decides
    /// what each means for the rest of the service.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SessionEnd> {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(self.cancelled());
                }
                read = self.stream.read(&mut self.chunk) => {
                    read.map_err(|e| {
                        PacketLogError::Connection(format!("receive from {} failed: {}", self.peer, e))
                    })?
                }
            };

            if received == 0 {
                debug!(
                    peer = %self.peer,
                    packets = self.packets,
                    discarded = self.accumulator.len(),
                    "peer closed connection"
                );
                return Ok(SessionEnd::PeerClosed {
                    discarded: self.accumulator.len(),
                });
            }

            let chunk = &self.chunk[..received];
            trace!(peer = %self.peer, bytes = received, "received chunk");
            if let Some(position) = find_nul(chunk) {
                warn!(peer = %self.peer, position, "received chunk contains NUL byte");
            }
            self.accumulator.extend_from_slice(chunk);

            while let Some(packet) = self.codec.decode(&mut self.accumulator)? {
                if !self.flush(packet, &cancel).await? {
                    return Ok(self.cancelled());
                }
            }
        }
    }

    /// Commit one packet and echo the log. Returns `false` when cancelled
    /// while sending.
    async fn flush(&mut self, packet: Bytes, cancel: &CancellationToken) -> Result<bool> {
        let log = self.store.append_and_echo(&packet).await?;
        self.packets += 1;
        debug!(
            peer = %self.peer,
            packet_len = packet.len(),
            echo_len = log.len(),
            "packet committed, echoing log"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(false),
            sent = send_all(&mut self.stream, &log) => {
                sent.map_err(|e| {
                    PacketLogError::Connection(format!("send to {} failed: {}", self.peer, e))
                })?;
                Ok(true)
            }
        }
    }

    fn cancelled(&mut self) -> SessionEnd {
        if !self.accumulator.is_empty() {
            debug!(
                peer = %self.peer,
                discarded = self.accumulator.len(),
                "discarding partial packet on shutdown"
            );
        }
        self.accumulator.clear();
        self.codec.reset();
        SessionEnd::Cancelled
    }
}

async fn send_all<S: AsyncWrite + Unpin>(stream: &mut S, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await
}
