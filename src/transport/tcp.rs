//! TCP transport adapter.
//!
//! Poll-driven and non-blocking throughout: a server accepts one planner
//! connection and reaps it after 5 s of silence; a client connects in the
//! background and reconnects automatically after loss. Outbound bytes go
//! through a circular send buffer flushed on every poll, with a soft
//! rejection threshold at half capacity so congestion cannot corrupt a
//! frame mid-send.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use socket2::Socket;
use tracing::{debug, info, warn};

use super::socket::{create_tcp_socket, SocketOptions};
use super::{ByteStream, ByteWriter};
use crate::error::{Result, TransportError};
use crate::handshake::HandshakeState;
use crate::types::SchemaHash;
use crate::util::LogThrottle;

/// TCP adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Circular transmit buffer capacity in bytes.
    #[serde(default = "default_tx_buffer_capacity")]
    pub tx_buffer_capacity: usize,

    /// Server mode: drop a client silent for this long so a dead planner
    /// cannot hold the single connection slot.
    #[serde(default = "default_server_client_timeout", with = "humantime_serde")]
    pub server_client_timeout: Duration,

    /// Client mode: delay between reconnect attempts.
    #[serde(default = "default_reconnect_interval", with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Enable TCP_NODELAY.
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

fn default_tx_buffer_capacity() -> usize {
    256 * 1024
}
fn default_server_client_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_reconnect_interval() -> Duration {
    Duration::from_millis(500)
}
fn default_nodelay() -> bool {
    true
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            tx_buffer_capacity: default_tx_buffer_capacity(),
            server_client_timeout: default_server_client_timeout(),
            reconnect_interval: default_reconnect_interval(),
            nodelay: default_nodelay(),
        }
    }
}

/// Circular transmit buffer.
struct TxRing {
    buf: Box<[u8]>,
    head: usize,
    size: usize,
}

impl TxRing {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(64)].into_boxed_slice(),
            head: 0,
            size: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn len(&self) -> usize {
        self.size
    }

    fn clear(&mut self) {
        self.head = 0;
        self.size = 0;
    }

    fn enqueue(&mut self, data: &[u8]) -> bool {
        if data.len() > self.capacity() - self.size {
            return false;
        }
        let cap = self.capacity();
        let tail = (self.head + self.size) % cap;
        let first = data.len().min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        }
        self.size += data.len();
        true
    }

    /// Longest unbroken span starting at head.
    fn contiguous(&self) -> &[u8] {
        let len = self.size.min(self.capacity() - self.head);
        &self.buf[self.head..self.head + len]
    }

    fn consume(&mut self, count: usize) {
        let count = count.min(self.size);
        self.head = (self.head + count) % self.capacity();
        self.size -= count;
    }
}

enum Mode {
    Server {
        listener: TcpListener,
        client: Option<TcpStream>,
        peer: Option<SocketAddr>,
        last_rx: Option<Instant>,
    },
    Client {
        target: SocketAddr,
        stream: Option<TcpStream>,
        pending: Option<Socket>,
        next_attempt: Option<Instant>,
    },
}

impl Mode {
    fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        match self {
            Mode::Server { client, .. } => client.as_mut(),
            Mode::Client { stream, .. } => stream.as_mut(),
        }
    }
}

/// Duplex adapter over a single TCP connection.
pub struct TcpAdapter {
    mode: Mode,
    config: TcpConfig,
    handshake: HandshakeState,
    handshake_sent: bool,
    tx: TxRing,
    throttle: LogThrottle,
}

impl TcpAdapter {
    /// Listen for one planner connection.
    pub fn server(listen_addr: SocketAddr, schema_hash: SchemaHash, config: TcpConfig) -> Result<Self> {
        let options = SocketOptions {
            reuse_addr: true,
            nodelay: config.nodelay,
        };
        let socket = create_tcp_socket(listen_addr, &options)?;
        socket
            .bind(&listen_addr.into())
            .map_err(|e| TransportError::BindFailed {
                addr: listen_addr,
                reason: e.to_string(),
            })?;
        socket
            .listen(1)
            .map_err(|e| TransportError::BindFailed {
                addr: listen_addr,
                reason: e.to_string(),
            })?;

        Ok(Self {
            mode: Mode::Server {
                listener: socket.into(),
                client: None,
                peer: None,
                last_rx: None,
            },
            tx: TxRing::new(config.tx_buffer_capacity),
            config,
            handshake: HandshakeState::new(schema_hash),
            handshake_sent: false,
            throttle: LogThrottle::per_second(),
        })
    }

    /// Connect to a controller; reconnects in the background after loss.
    pub fn client(target: SocketAddr, schema_hash: SchemaHash, config: TcpConfig) -> Result<Self> {
        let mut adapter = Self {
            mode: Mode::Client {
                target,
                stream: None,
                pending: None,
                next_attempt: None,
            },
            tx: TxRing::new(config.tx_buffer_capacity),
            config,
            handshake: HandshakeState::new(schema_hash),
            handshake_sent: false,
            throttle: LogThrottle::per_second(),
        };
        adapter.poll_connection();
        Ok(adapter)
    }

    /// Local listen/bind address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = match &self.mode {
            Mode::Server { listener, .. } => listener.local_addr(),
            Mode::Client { stream, .. } => match stream {
                Some(stream) => stream.local_addr(),
                None => return Err(TransportError::NotConnected.into()),
            },
        };
        addr.map_err(|e| TransportError::SocketError(e.to_string()).into())
    }

    /// Address of the connected peer, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.mode {
            Mode::Server { peer, .. } => *peer,
            Mode::Client { stream, .. } => stream.as_ref().and_then(|s| s.peer_addr().ok()),
        }
    }

    /// Whether the byte pipe is open. Application-level connectivity also
    /// requires [`is_handshake_complete`](Self::is_handshake_complete).
    pub fn is_connected(&self) -> bool {
        match &self.mode {
            Mode::Server { client, .. } => client.is_some(),
            Mode::Client { stream, .. } => stream.is_some(),
        }
    }

    /// Whether the peer completed the handshake with a matching schema.
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake.is_complete() && self.handshake.is_validated()
    }

    /// Whether a completed handshake carried our schema hash.
    pub fn is_schema_validated(&self) -> bool {
        self.handshake.is_validated()
    }

    /// The peer's claimed schema hash, once received.
    pub fn remote_schema_hash(&self) -> Option<SchemaHash> {
        self.handshake.remote_hash()
    }

    /// Drive connection state: accept, reap zombies, finish async connects.
    fn poll_connection(&mut self) {
        let now = Instant::now();
        let mut lost = false;
        let mut fresh = false;

        match &mut self.mode {
            Mode::Server {
                listener,
                client,
                peer,
                last_rx,
            } => {
                if client.is_some() {
                    if let Some(rx) = *last_rx {
                        if now.saturating_duration_since(rx) > self.config.server_client_timeout {
                            if self.throttle.ready() {
                                warn!(peer = ?*peer, "reaping zombie tcp client");
                            }
                            *client = None;
                            *peer = None;
                            *last_rx = None;
                            lost = true;
                        }
                    }
                } else {
                    match listener.accept() {
                        Ok((stream, addr)) => {
                            let ok = stream.set_nonblocking(true).is_ok()
                                && stream.set_nodelay(self.config.nodelay).is_ok();
                            if ok {
                                info!(peer = %addr, "tcp client accepted");
                                *client = Some(stream);
                                *peer = Some(addr);
                                *last_rx = Some(now);
                                fresh = true;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => {
                            if self.throttle.ready() {
                                warn!(error = %e, "tcp accept failed");
                            }
                        }
                    }
                }
            }
            Mode::Client {
                target,
                stream,
                pending,
                next_attempt,
            } => {
                if stream.is_some() {
                    // Connected; nothing to drive.
                } else if let Some(sock) = pending.as_ref() {
                    if sock.peer_addr().is_ok() {
                        let sock = pending.take().expect("pending just checked");
                        info!(addr = %target, "tcp client connected");
                        *stream = Some(sock.into());
                        fresh = true;
                    } else {
                        match sock.take_error() {
                            Ok(Some(err)) => {
                                if self.throttle.ready() {
                                    warn!(addr = %target, error = %err, "tcp connect failed");
                                }
                                *pending = None;
                            }
                            // No error yet: the connect is still in flight.
                            Ok(None) | Err(_) => {}
                        }
                    }
                } else if next_attempt.map_or(true, |t| now >= t) {
                    *next_attempt = Some(now + self.config.reconnect_interval);
                    let options = SocketOptions {
                        reuse_addr: true,
                        nodelay: self.config.nodelay,
                    };
                    match create_tcp_socket(*target, &options) {
                        Ok(sock) => match sock.connect(&(*target).into()) {
                            Ok(()) => {
                                info!(addr = %target, "tcp client connected");
                                *stream = Some(sock.into());
                                fresh = true;
                            }
                            Err(e) if connect_in_progress(&e) => {
                                debug!(addr = %target, "tcp connect in progress");
                                *pending = Some(sock);
                            }
                            Err(e) => {
                                if self.throttle.ready() {
                                    warn!(addr = %target, error = %e, "tcp connect failed");
                                }
                            }
                        },
                        Err(e) => {
                            if self.throttle.ready() {
                                warn!(error = %e, "tcp socket creation failed");
                            }
                        }
                    }
                }
            }
        }

        if lost || fresh {
            // Either way the old session is gone: pending bytes belong to a
            // connection that no longer exists.
            self.reset_session();
        }
    }

    fn reset_session(&mut self) {
        self.handshake.reset();
        self.handshake_sent = false;
        self.tx.clear();
    }

    fn handle_connection_loss(&mut self) {
        if self.throttle.ready() {
            warn!("tcp connection lost");
        }
        self.reset_session();
        match &mut self.mode {
            Mode::Server {
                client,
                peer,
                last_rx,
                ..
            } => {
                *client = None;
                *peer = None;
                *last_rx = None;
            }
            Mode::Client {
                stream,
                pending,
                next_attempt,
                ..
            } => {
                *stream = None;
                *pending = None;
                // Immediate retry, then the regular interval applies.
                *next_attempt = Some(Instant::now());
            }
        }
    }

    /// Enqueue the local handshake frame ahead of any application bytes.
    fn send_local_handshake(&mut self) {
        let frame = self.handshake.local_frame();
        if self.tx.enqueue(&frame) {
            self.handshake_sent = true;
            self.try_flush();
        }
    }

    fn try_flush(&mut self) {
        let mut lost = false;
        while self.tx.len() > 0 {
            let Some(stream) = self.mode.stream_mut() else {
                break;
            };
            match stream.write(self.tx.contiguous()) {
                Ok(0) => {
                    lost = true;
                    break;
                }
                Ok(written) => self.tx.consume(written),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => {
                    lost = true;
                    break;
                }
            }
        }
        if lost {
            self.handle_connection_loss();
        }
    }
}

impl ByteWriter for TcpAdapter {
    fn send_bytes(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }

        self.poll_connection();
        if !self.is_connected() {
            return false;
        }
        if !self.handshake_sent {
            self.send_local_handshake();
        }

        // Soft rejection at half capacity: refusing a whole frame here beats
        // dropping the buffer mid-frame under congestion.
        if self.tx.len() > self.tx.capacity() / 2 {
            if self.throttle.ready() {
                warn!(
                    buffered = self.tx.len(),
                    "tx buffer congested, rejecting packet"
                );
            }
            return false;
        }
        if !self.tx.enqueue(data) {
            if self.throttle.ready() {
                warn!(len = data.len(), "tx buffer full, dropping packet");
            }
            return false;
        }

        self.try_flush();
        self.is_connected()
    }
}

impl ByteStream for TcpAdapter {
    fn receive_chunk(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        self.poll_connection();
        if !self.is_connected() {
            return 0;
        }

        self.try_flush();
        if !self.handshake_sent && self.is_connected() {
            self.send_local_handshake();
        }

        let result = match self.mode.stream_mut() {
            Some(stream) => stream.read(buf),
            None => return 0,
        };

        match result {
            Ok(0) => {
                self.handle_connection_loss();
                0
            }
            Ok(received) => {
                if let Mode::Server { last_rx, .. } = &mut self.mode {
                    *last_rx = Some(Instant::now());
                }

                if !self.handshake.is_complete() {
                    let consumed = self.handshake.feed(&buf[..received]);
                    if consumed >= received {
                        return 0;
                    }
                    // Forward whatever followed the handshake frame.
                    buf.copy_within(consumed..received, 0);
                    return received - consumed;
                }

                received
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::NotConnected
                ) =>
            {
                self.handle_connection_loss();
                0
            }
            Err(e) => {
                if self.throttle.ready() {
                    warn!(error = %e, "tcp recv failed");
                }
                0
            }
        }
    }
}

/// Whether a non-blocking `connect` error means "in flight" rather than
/// "failed". EINPROGRESS is 115 on Linux and 36 on macOS/BSD.
fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || matches!(e.raw_os_error(), Some(36 | 115))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_ring_wraps() {
        let mut ring = TxRing::new(64);
        assert!(ring.enqueue(&[1u8; 40]));
        ring.consume(40);
        assert!(ring.enqueue(&[2u8; 40])); // wraps past the end
        assert_eq!(ring.len(), 40);

        let first = ring.contiguous().len();
        assert!(first < 40);
        ring.consume(first);
        assert_eq!(ring.contiguous().len(), 40 - first);
    }

    #[test]
    fn test_tx_ring_rejects_oversize() {
        let mut ring = TxRing::new(64);
        assert!(ring.enqueue(&[0u8; 64]));
        assert!(!ring.enqueue(&[0u8; 1]));
        ring.clear();
        assert!(ring.enqueue(&[0u8; 1]));
    }

    #[test]
    fn test_client_not_connected_before_completion() {
        // Nothing listens on this port; the non-blocking connect must not
        // report connected prematurely.
        let target: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut client =
            TcpAdapter::client(target, SchemaHash(1), TcpConfig::default()).unwrap();

        assert!(!client.is_connected());
        assert!(!client.send_bytes(&[0x42]));
        let mut buf = [0u8; 16];
        assert_eq!(client.receive_chunk(&mut buf), 0);
    }

    #[test]
    fn test_server_binds_ephemeral_port() {
        let server = TcpAdapter::server(
            "127.0.0.1:0".parse().unwrap(),
            SchemaHash(1),
            TcpConfig::default(),
        )
        .unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(!server.is_connected());
    }
}
