//! In-memory loopback transport for tests and simulation.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ByteStream, ByteWriter};

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory duplex byte pipe.
///
/// Byte-stream semantics like TCP: writes concatenate and reads may split
/// them arbitrarily, which makes this a convenient harness for exercising
/// the parser's reassembly.
pub struct LoopbackAdapter {
    tx: Pipe,
    rx: Pipe,
    connected: bool,
}

impl LoopbackAdapter {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let a_to_b: Pipe = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a: Pipe = Arc::new(Mutex::new(VecDeque::new()));

        let a = Self {
            tx: Arc::clone(&a_to_b),
            rx: Arc::clone(&b_to_a),
            connected: true,
        };
        let b = Self {
            tx: b_to_a,
            rx: a_to_b,
            connected: true,
        };
        (a, b)
    }

    /// Simulate link loss: sends fail and nothing more is received.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Restore the link.
    pub fn reconnect(&mut self) {
        self.connected = true;
    }

    /// Bytes waiting to be read by the peer.
    pub fn pending_tx(&self) -> usize {
        self.tx.lock().len()
    }
}

impl ByteWriter for LoopbackAdapter {
    fn send_bytes(&mut self, data: &[u8]) -> bool {
        if !self.connected {
            return false;
        }
        self.tx.lock().extend(data.iter().copied());
        true
    }
}

impl ByteStream for LoopbackAdapter {
    fn receive_chunk(&mut self, buf: &mut [u8]) -> usize {
        if !self.connected || buf.is_empty() {
            return 0;
        }
        let mut rx = self.rx.lock();
        let take = rx.len().min(buf.len());
        for slot in buf.iter_mut().take(take) {
            *slot = rx.pop_front().expect("length just checked");
        }
        take
    }
}
