//! Schema-hash handshake.
//!
//! One 8-byte frame per connection per direction: the magic `"BCNP"`
//! followed by the sender's schema hash, big-endian. Peers whose message
//! definitions differ produce different hashes and are refused before any
//! application traffic flows. The frame is not a packet and must never be
//! fed to the stream parser.

use byteorder::{BigEndian, ByteOrder};
use tracing::warn;

use crate::error::HandshakeError;
use crate::types::SchemaHash;

/// Handshake frame length in bytes.
pub const HANDSHAKE_SIZE: usize = 8;

/// Frame magic, `0x42 0x43 0x4E 0x50`.
pub const HANDSHAKE_MAGIC: [u8; 4] = *b"BCNP";

/// Encode the local handshake frame.
pub fn encode_handshake(local: SchemaHash) -> [u8; HANDSHAKE_SIZE] {
    let mut frame = [0u8; HANDSHAKE_SIZE];
    frame[..4].copy_from_slice(&HANDSHAKE_MAGIC);
    BigEndian::write_u32(&mut frame[4..], local.0);
    frame
}

/// Decode a complete handshake frame into the remote schema hash.
pub fn decode_handshake(frame: &[u8; HANDSHAKE_SIZE]) -> Result<SchemaHash, HandshakeError> {
    if frame[..4] != HANDSHAKE_MAGIC {
        return Err(HandshakeError::BadMagic);
    }
    Ok(SchemaHash(BigEndian::read_u32(&frame[4..])))
}

/// Accumulates handshake bytes from a stream and validates the peer.
///
/// Transports feed inbound bytes here until exactly [`HANDSHAKE_SIZE`] have
/// arrived; anything beyond that belongs to normal parsing and is left
/// unconsumed.
#[derive(Debug, Clone)]
pub struct HandshakeState {
    expected: SchemaHash,
    buf: [u8; HANDSHAKE_SIZE],
    received: usize,
    complete: bool,
    validated: bool,
    remote: Option<SchemaHash>,
}

impl HandshakeState {
    /// Start a handshake expecting `expected` from the peer.
    pub fn new(expected: SchemaHash) -> Self {
        Self {
            expected,
            buf: [0u8; HANDSHAKE_SIZE],
            received: 0,
            complete: false,
            validated: false,
            remote: None,
        }
    }

    /// Forget all progress; used on connection loss.
    pub fn reset(&mut self) {
        self.received = 0;
        self.complete = false;
        self.validated = false;
        self.remote = None;
    }

    /// The frame this side sends.
    pub fn local_frame(&self) -> [u8; HANDSHAKE_SIZE] {
        encode_handshake(self.expected)
    }

    /// Whether a full frame has been received and judged.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether the peer's schema matched ours.
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// The peer's claimed schema hash, once a well-formed frame arrived.
    pub fn remote_hash(&self) -> Option<SchemaHash> {
        self.remote
    }

    /// Consume handshake bytes from the front of `data`.
    ///
    /// Returns how many bytes were consumed; the caller forwards the rest to
    /// the parser. Once complete, consumes nothing.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        if self.complete {
            return 0;
        }

        let take = data.len().min(HANDSHAKE_SIZE - self.received);
        self.buf[self.received..self.received + take].copy_from_slice(&data[..take]);
        self.received += take;

        if self.received == HANDSHAKE_SIZE {
            self.complete = true;
            match decode_handshake(&self.buf) {
                Ok(remote) => {
                    self.remote = Some(remote);
                    if remote == self.expected {
                        self.validated = true;
                    } else {
                        warn!(
                            local = %self.expected,
                            remote = %remote,
                            "schema mismatch, refusing application traffic"
                        );
                    }
                }
                Err(HandshakeError::BadMagic) => {
                    warn!("handshake frame with bad magic");
                }
                Err(_) => {}
            }
        }

        take
    }
}
