//! Resynchronizing stream parser.
//!
//! Recovers complete packets from an arbitrary byte stream: a fixed ring
//! buffer absorbs transport chunks, and a bounded parse loop drains as many
//! frames as the bytes allow, resynchronizing after corruption. Never blocks
//! and never allocates after construction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::protocol::{
    self, is_compatible_version, PacketHeader, PacketView, CHECKSUM_SIZE, HEADER_SIZE,
    MIN_FRAME_SIZE,
};
use crate::registry::{MessageRegistry, MessageSpec};
use crate::types::MessageTypeId;
use crate::{PROTOCOL_MAJOR, PROTOCOL_MINOR};

/// Resolves a message type id to its wire layout.
///
/// Defaults to a registry lookup; tests may install a custom closure.
pub type WireLookup = Arc<dyn Fn(MessageTypeId) -> Option<MessageSpec> + Send + Sync>;

/// Callback invoked for every recovered packet.
pub type PacketCallback = Box<dyn FnMut(&PacketView<'_>) + Send>;

/// Callback invoked for every parse error.
pub type ErrorCallback = Box<dyn FnMut(&ParseErrorInfo) + Send>;

/// Diagnostics delivered with each parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseErrorInfo {
    /// What went wrong.
    pub code: DecodeError,
    /// Absolute byte index in the logical input stream where the error was
    /// detected. Never rewinds; zeroed only by `reset(true)`.
    pub stream_offset: u64,
    /// Errors since the last successfully parsed packet.
    pub consecutive_errors: u64,
}

/// Stream parser configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Ring buffer capacity in bytes. Clamped to at least header + CRC.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Cap on header-inspection iterations per `push`, so a pathological
    /// input cannot monopolize the caller.
    #[serde(default = "default_max_parse_iterations")]
    pub max_parse_iterations_per_push: usize,
}

fn default_buffer_size() -> usize {
    4096
}
fn default_max_parse_iterations() -> usize {
    1024
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_parse_iterations_per_push: default_max_parse_iterations(),
        }
    }
}

/// Single-producer, single-consumer packet framer over a fixed ring buffer.
pub struct StreamParser {
    on_packet: PacketCallback,
    on_error: Option<ErrorCallback>,
    lookup: WireLookup,
    max_parse_iterations: usize,
    buffer: Box<[u8]>,
    head: usize,
    size: usize,
    scratch: Vec<u8>,
    stream_offset: u64,
    consecutive_errors: u64,
}

impl StreamParser {
    /// Create a parser that resolves wire sizes through `registry`.
    pub fn new<F>(config: ParserConfig, registry: Arc<MessageRegistry>, on_packet: F) -> Self
    where
        F: FnMut(&PacketView<'_>) + Send + 'static,
    {
        let lookup: WireLookup = Arc::new(move |id| registry.lookup(id));
        Self::with_lookup(config, lookup, on_packet)
    }

    /// Create a parser with a custom wire-size lookup.
    pub fn with_lookup<F>(config: ParserConfig, lookup: WireLookup, on_packet: F) -> Self
    where
        F: FnMut(&PacketView<'_>) + Send + 'static,
    {
        let buffer_size = config.buffer_size.max(MIN_FRAME_SIZE);
        Self {
            on_packet: Box::new(on_packet),
            on_error: None,
            lookup,
            max_parse_iterations: config.max_parse_iterations_per_push.max(1),
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            head: 0,
            size: 0,
            scratch: vec![0u8; buffer_size],
            stream_offset: 0,
            consecutive_errors: 0,
        }
    }

    /// Install the error callback.
    pub fn set_error_callback<F>(&mut self, on_error: F)
    where
        F: FnMut(&ParseErrorInfo) + Send + 'static,
    {
        self.on_error = Some(Box::new(on_error));
    }

    /// Override the wire-size lookup (testing hook).
    pub fn set_wire_size_lookup(&mut self, lookup: WireLookup) {
        self.lookup = lookup;
    }

    /// Ring buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.size
    }

    /// Absolute offset of the next unparsed byte in the logical stream.
    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    /// Errors since the last successful packet.
    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors
    }

    /// Empty the ring; optionally zero the error counter and stream offset.
    pub fn reset(&mut self, clear_error_state: bool) {
        self.head = 0;
        self.size = 0;
        if clear_error_state {
            self.consecutive_errors = 0;
            self.stream_offset = 0;
        }
    }

    /// Append bytes and drain as many complete packets as possible.
    ///
    /// Invokes `on_packet` for each valid frame and `on_error` for each
    /// rejection. If the input would overflow the ring after draining, the
    /// parser reports an overload and drops the buffered window, trading
    /// correctness for liveness under a flood.
    pub fn push(&mut self, mut data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut budget = self.max_parse_iterations;
        let mut scratch = std::mem::take(&mut self.scratch);

        while !data.is_empty() {
            let free = self.capacity() - self.size;
            let take = free.min(data.len());
            self.write_to_ring(&data[..take]);
            data = &data[take..];

            self.parse_buffer(&mut scratch, &mut budget);

            if !data.is_empty() && self.size == self.capacity() {
                // Nothing parseable and no room left: drop the window.
                self.emit_error(DecodeError::TooManyMessages(u16::MAX));
                self.discard(self.size);
            }
        }

        self.scratch = scratch;
    }

    fn parse_buffer(&mut self, scratch: &mut [u8], budget: &mut usize) {
        loop {
            if self.size < HEADER_SIZE {
                return;
            }
            if *budget == 0 {
                // Remaining bytes stay buffered and are re-tried next push.
                return;
            }
            *budget -= 1;

            self.copy_out(0, HEADER_SIZE, &mut scratch[..HEADER_SIZE]);
            let header = PacketHeader::read(scratch);

            if !is_compatible_version(header.major, header.minor) {
                self.emit_error(DecodeError::UnsupportedVersion {
                    major: header.major,
                    minor: header.minor,
                });
                let skip = self.find_next_header_candidate();
                self.discard(skip);
                continue;
            }

            let Some(spec) = (self.lookup)(header.message_type_id) else {
                self.emit_error(DecodeError::UnknownMessageType(header.message_type_id));
                self.discard(1);
                continue;
            };

            let wire_size = spec.wire_size as usize;
            let expected =
                HEADER_SIZE + header.message_count as usize * wire_size + CHECKSUM_SIZE;
            if expected > self.capacity() {
                // Frame could never fit the ring; the count must be bogus.
                self.emit_error(DecodeError::TooManyMessages(header.message_count));
                self.discard(1);
                continue;
            }

            let available = expected.min(self.size);
            self.copy_out(0, available, &mut scratch[..available]);

            let outcome =
                protocol::decode_view_with(&scratch[..available], wire_size, spec.validator);
            match outcome.view {
                Ok(view) => {
                    (self.on_packet)(&view);
                    self.consecutive_errors = 0;
                    self.discard(outcome.bytes_consumed);
                }
                Err(DecodeError::Truncated) => return, // wait for more bytes
                Err(code @ (DecodeError::ChecksumMismatch | DecodeError::InvalidFloat)) => {
                    // The header might be a forgery inside earlier garbage;
                    // a one-byte step keeps a real packet starting later
                    // discoverable.
                    self.emit_error(code);
                    self.discard(1);
                }
                Err(code) => {
                    self.emit_error(code);
                    self.discard(outcome.bytes_consumed.max(1));
                }
            }
        }
    }

    /// Distance to the next plausible header start: the first position whose
    /// byte pair equals the local version, or 1 if none is in the window.
    fn find_next_header_candidate(&self) -> usize {
        let mut i = 1;
        while i + 1 < self.size {
            if self.ring_at(i) == PROTOCOL_MAJOR && self.ring_at(i + 1) == PROTOCOL_MINOR {
                return i;
            }
            i += 1;
        }
        1
    }

    fn ring_at(&self, offset: usize) -> u8 {
        self.buffer[(self.head + offset) % self.buffer.len()]
    }

    fn write_to_ring(&mut self, data: &[u8]) {
        let cap = self.buffer.len();
        let tail = (self.head + self.size) % cap;
        let first = data.len().min(cap - tail);
        self.buffer[tail..tail + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            self.buffer[..data.len() - first].copy_from_slice(&data[first..]);
        }
        self.size += data.len();
    }

    fn copy_out(&self, offset: usize, len: usize, dest: &mut [u8]) {
        let cap = self.buffer.len();
        let start = (self.head + offset) % cap;
        let first = len.min(cap - start);
        dest[..first].copy_from_slice(&self.buffer[start..start + first]);
        if first < len {
            dest[first..len].copy_from_slice(&self.buffer[..len - first]);
        }
    }

    fn discard(&mut self, count: usize) {
        let count = count.min(self.size);
        self.head = (self.head + count) % self.buffer.len();
        self.size -= count;
        self.stream_offset += count as u64;
    }

    fn emit_error(&mut self, code: DecodeError) {
        self.consecutive_errors += 1;
        if let Some(on_error) = self.on_error.as_mut() {
            on_error(&ParseErrorInfo {
                code,
                stream_offset: self.stream_offset,
                consecutive_errors: self.consecutive_errors,
            });
        }
    }
}

impl std::fmt::Debug for StreamParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamParser")
            .field("capacity", &self.capacity())
            .field("buffered", &self.size)
            .field("stream_offset", &self.stream_offset)
            .field("consecutive_errors", &self.consecutive_errors)
            .finish_non_exhaustive()
    }
}
