//! Packet framing for the newline-delimited wire protocol

use crate::PacketLogError;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::debug;

/// Packet delimiter
pub const DELIMITER: u8 = b'\n';

/// What to do with bytes that follow a newline inside the same receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainderPolicy {
    /// Keep them as the beginning of the next packet
    Preserve,
    /// Drop them
    Discard,
}

impl RemainderPolicy {
    /// Map the `framing.preserve_remainder` setting to a policy
    pub fn from_preserve(preserve: bool) -> Self {
        if preserve {
            RemainderPolicy::Preserve
        } else {
            RemainderPolicy::Discard
        }
    }
}

/// Splits an accumulated byte stream into newline-terminated packets.
///
/// The codec remembers how far it has already scanned, so feeding it a long
/// packet chunk by chunk only examines each byte once. A returned packet
/// always ends with [`DELIMITER`] and the accumulator keeps only bytes that
/// have not been handed out yet.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    next_index: usize,
    max_length: usize,
    remainder: RemainderPolicy,
}

impl PacketCodec {
    /// Create a codec that rejects packets longer than `max_length` bytes
    pub fn new(max_length: usize, remainder: RemainderPolicy) -> Self {
        Self {
            next_index: 0,
            max_length,
            remainder,
        }
    }

    /// Forget scan progress, used when the accumulator is discarded
    pub fn reset(&mut self) {
        self.next_index = 0;
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = PacketLogError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, PacketLogError> {
        let scan_from = self.next_index.min(buf.len());
        let found = buf[scan_from..].iter().position(|b| *b == DELIMITER);

        match found {
            Some(offset) => {
                let end = scan_from + offset + 1;
                if end > self.max_length {
                    return Err(PacketLogError::PacketTooLarge(self.max_length));
                }
                self.next_index = 0;
                let packet = buf.split_to(end).freeze();
                if self.remainder == RemainderPolicy::Discard && !buf.is_empty() {
                    debug!(dropped = buf.len(), "discarding bytes after packet delimiter");
                    buf.clear();
                }
                Ok(Some(packet))
            }
            None => {
                if buf.len() > self.max_length {
                    return Err(PacketLogError::PacketTooLarge(self.max_length));
                }
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }
}

/// Position of the first NUL byte, if any
pub fn find_nul(chunk: &[u8]) -> Option<usize> {
    chunk.iter().position(|b| *b == 0)
}
