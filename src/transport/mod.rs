//! Transport layer for BCNP.
//!
//! The core assumes only a duplex byte interface: non-blocking send and
//! receive of raw chunks. TCP and UDP adapters implement it over the
//! network; the loopback adapter implements it in memory for tests.

mod loopback;
mod socket;
mod tcp;
mod udp;

pub use loopback::LoopbackAdapter;
pub use socket::{create_tcp_socket, create_udp_socket, SocketOptions};
pub use tcp::{TcpAdapter, TcpConfig};
pub use udp::{UdpAdapter, UdpConfig};

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::error::{Result, TransportError};
use crate::protocol::{encode_packet, TypedPacket, WireMessage};
use crate::storage::MessageStorage;

/// Sends raw bytes over a transport.
pub trait ByteWriter {
    /// Best-effort, non-blocking send. Returns `false` on hard failure or
    /// overflow; queued-but-unsent counts as success.
    fn send_bytes(&mut self, data: &[u8]) -> bool;
}

/// Receives raw bytes from a transport.
pub trait ByteStream {
    /// Non-blocking receive into `buf`; returns 0 when no data is ready.
    fn receive_chunk(&mut self, buf: &mut [u8]) -> usize;
}

/// Combined send/receive interface for bidirectional transports.
pub trait Duplex: ByteWriter + ByteStream {}

impl<T: ByteWriter + ByteStream + ?Sized> Duplex for T {}

/// Receive iterations per [`PollDriver::poll_once`], so a saturated link
/// cannot starve the caller.
pub const MAX_RECEIVES_PER_POLL: usize = 10;

/// Default receive scratch size. Matches the parser's default ring so one
/// chunk never overflows an empty ring.
const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Polling loop glue between an adapter and a dispatcher.
///
/// Owns a receive scratch and a transmit scratch sized at construction, so
/// steady-state polling does not allocate.
pub struct PollDriver<A> {
    dispatcher: Arc<Dispatcher>,
    adapter: A,
    rx_scratch: Vec<u8>,
    tx_scratch: Vec<u8>,
}

impl<A: Duplex> PollDriver<A> {
    /// Create a driver with default scratch sizes.
    pub fn new(dispatcher: Arc<Dispatcher>, adapter: A) -> Self {
        Self::with_chunk_size(dispatcher, adapter, DEFAULT_CHUNK_SIZE)
    }

    /// Create a driver with explicit scratch sizes.
    ///
    /// For datagram transports the chunk size bounds the largest receivable
    /// packet; size it to the largest frame the schema can produce.
    pub fn with_chunk_size(dispatcher: Arc<Dispatcher>, adapter: A, chunk_size: usize) -> Self {
        Self {
            dispatcher,
            adapter,
            rx_scratch: vec![0u8; chunk_size.max(1)],
            tx_scratch: vec![0u8; chunk_size.max(1)],
        }
    }

    /// Pull available chunks from the adapter into the dispatcher.
    ///
    /// Bounded at [`MAX_RECEIVES_PER_POLL`] iterations; returns the number
    /// of bytes forwarded.
    pub fn poll_once(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_RECEIVES_PER_POLL {
            let received = self.adapter.receive_chunk(&mut self.rx_scratch);
            if received == 0 {
                break;
            }
            self.dispatcher.push_bytes(&self.rx_scratch[..received]);
            total += received;
        }
        total
    }

    /// Encode and send a typed packet through the adapter.
    pub fn send_packet<M, S>(&mut self, packet: &TypedPacket<M, S>) -> Result<()>
    where
        M: WireMessage,
        S: MessageStorage<M>,
    {
        let needed = packet.encoded_size();
        if needed > self.tx_scratch.len() {
            // One-time growth for oversized batches; hot paths stay within
            // the preallocated scratch.
            self.tx_scratch.resize(needed, 0);
        }
        let written = encode_packet(packet, &mut self.tx_scratch)?;
        if !self.adapter.send_bytes(&self.tx_scratch[..written]) {
            return Err(TransportError::SendFailed("adapter rejected packet".into()).into());
        }
        Ok(())
    }

    /// The dispatcher this driver feeds.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Access the adapter (connection state, reconfiguration).
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }
}
