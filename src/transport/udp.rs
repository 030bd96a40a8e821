//! UDP transport adapter.
//!
//! Datagram transport with optional peer locking: a listening controller
//! can require an 8-byte pairing frame (magic + schema hash) before it
//! accepts traffic, then ignores every other source until the paired peer
//! goes silent for the peer timeout.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::socket::{create_udp_socket, SocketOptions};
use super::{ByteStream, ByteWriter};
use crate::error::Result;
use crate::handshake::{decode_handshake, encode_handshake, HANDSHAKE_SIZE};
use crate::types::SchemaHash;
use crate::util::LogThrottle;

/// UDP adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Lock to a single peer; other sources are ignored.
    #[serde(default = "default_peer_lock")]
    pub peer_lock: bool,

    /// Without a datagram from the locked peer for this long, unlock so a
    /// replacement planner can pair.
    #[serde(default = "default_peer_timeout", with = "humantime_serde")]
    pub peer_timeout: Duration,
}

fn default_peer_lock() -> bool {
    true
}
fn default_peer_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            peer_lock: default_peer_lock(),
            peer_timeout: default_peer_timeout(),
        }
    }
}

/// Duplex adapter over a UDP socket.
pub struct UdpAdapter {
    socket: UdpSocket,
    config: UdpConfig,
    pairing_token: SchemaHash,
    last_peer: Option<SocketAddr>,
    initial_peer: Option<SocketAddr>,
    last_peer_rx: Option<Instant>,
    require_pairing: bool,
    pairing_complete: bool,
    fixed_peer: bool,
    throttle: LogThrottle,
}

impl UdpAdapter {
    /// Bind to `listen_addr`.
    ///
    /// With a fixed `target` (planner side) the adapter locks to it
    /// immediately and no pairing is required. Without one (controller
    /// side), peer locking requires a valid pairing frame first.
    pub fn bind(
        listen_addr: SocketAddr,
        target: Option<SocketAddr>,
        schema_hash: SchemaHash,
        config: UdpConfig,
    ) -> Result<Self> {
        let socket: UdpSocket = create_udp_socket(listen_addr, &SocketOptions::default())?.into();

        let fixed_peer = target.is_some();
        Ok(Self {
            socket,
            pairing_token: schema_hash,
            last_peer: target,
            initial_peer: target,
            last_peer_rx: None,
            require_pairing: !fixed_peer,
            pairing_complete: fixed_peer,
            fixed_peer,
            config,
            throttle: LogThrottle::per_second(),
        })
    }

    /// Local bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| crate::error::TransportError::SocketError(e.to_string()).into())
    }

    /// The peer datagrams are currently sent to, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.last_peer
    }

    /// Whether pairing completed (always true for a fixed peer).
    pub fn is_paired(&self) -> bool {
        self.pairing_complete
    }

    /// Enable or disable peer locking at runtime.
    pub fn set_peer_lock(&mut self, locked: bool) {
        self.config.peer_lock = locked;
        if !locked {
            self.pairing_complete = false;
            return;
        }

        if self.fixed_peer {
            self.initial_peer = self.last_peer;
            self.pairing_complete = true;
            return;
        }

        if self.require_pairing {
            self.pairing_complete = false;
            self.last_peer = None;
            self.initial_peer = None;
        }
    }

    /// Forget the locked peer so a new one may pair.
    pub fn unlock_peer(&mut self) {
        if !self.fixed_peer {
            self.pairing_complete = false;
            self.last_peer = None;
            self.initial_peer = None;
            self.last_peer_rx = None;
        }
    }

    /// Send the pairing frame to the fixed peer (planner side).
    pub fn send_pairing(&mut self) -> bool {
        let frame = encode_handshake(self.pairing_token);
        self.send_bytes_raw(&frame)
    }

    fn send_bytes_raw(&mut self, data: &[u8]) -> bool {
        let Some(peer) = self.last_peer else {
            return false;
        };
        match self.socket.send_to(data, peer) {
            Ok(sent) => sent == data.len(),
            Err(e) => {
                if self.throttle.ready() {
                    warn!(error = %e, "udp send failed");
                }
                false
            }
        }
    }

    /// Validate an inbound pairing frame; locks to its source on success.
    fn process_pairing(&mut self, data: &[u8], src: SocketAddr) -> bool {
        if data.len() != HANDSHAKE_SIZE {
            return false;
        }
        let mut frame = [0u8; HANDSHAKE_SIZE];
        frame.copy_from_slice(data);

        match decode_handshake(&frame) {
            Ok(token) if token == self.pairing_token => {
                info!(peer = %src, "udp peer paired");
                self.initial_peer = Some(src);
                self.last_peer = Some(src);
                self.pairing_complete = true;
                true
            }
            Ok(token) => {
                if self.throttle.ready() {
                    warn!(peer = %src, remote = %token, "udp pairing token mismatch");
                }
                false
            }
            Err(_) => false,
        }
    }
}

impl ByteWriter for UdpAdapter {
    fn send_bytes(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        self.send_bytes_raw(data)
    }
}

impl ByteStream for UdpAdapter {
    fn receive_chunk(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let now = Instant::now();

        // Auto-unlock after peer silence so a replacement planner can pair.
        if self.config.peer_lock && !self.fixed_peer && self.last_peer.is_some() {
            if let Some(rx) = self.last_peer_rx {
                if now.saturating_duration_since(rx) > self.config.peer_timeout {
                    debug!("udp peer timed out, unlocking");
                    self.unlock_peer();
                }
            }
        }

        let (received, src) = match self.socket.recv_from(buf) {
            Ok(result) => result,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return 0,
            Err(e) => {
                if self.throttle.ready() {
                    warn!(error = %e, "udp recv failed");
                }
                return 0;
            }
        };

        if self.config.peer_lock {
            if self.require_pairing && !self.pairing_complete {
                // Pairing frames are consumed here, never forwarded upwards.
                if self.process_pairing(&buf[..received], src) {
                    self.last_peer_rx = Some(now);
                }
                return 0;
            }

            match self.initial_peer {
                Some(initial) if src != initial => return 0, // foreign source
                Some(_) => {}
                None => self.initial_peer = Some(src),
            }
            self.last_peer = Some(src);
            self.last_peer_rx = Some(now);
        } else {
            self.last_peer = Some(src);
            self.last_peer_rx = Some(now);
        }

        received
    }
}
