//! Error types for BCNP.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::types::{MessageTypeId, SchemaHash};

/// Result type alias for BCNP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for BCNP.
#[derive(Error, Debug)]
pub enum Error {
    // Wire-level errors
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    // Handshake errors
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("connection timeout")]
    ConnectionTimeout,

    // Registry errors
    #[error("duplicate message type id {0}")]
    DuplicateMessageType(MessageTypeId),

    #[error("message registry not installed")]
    RegistryNotInstalled,

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Packet encode failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("too many messages: {0}")]
    TooManyMessages(usize),

    #[error("message {index} rejected by its encoder")]
    MessageRejected { index: usize },

    #[error("buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

/// Packet decode failures.
///
/// These are data, not exceptions: the codec returns them inside a
/// [`DecodeOutcome`](crate::protocol::DecodeOutcome) together with a
/// `bytes_consumed` count so the stream parser can resynchronize.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeError {
    #[error("input smaller than a packet header")]
    TooSmall,

    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("unknown message type {0}")]
    UnknownMessageType(MessageTypeId),

    #[error("too many messages in packet: {0}")]
    TooManyMessages(u16),

    #[error("frame truncated, waiting for more bytes")]
    Truncated,

    #[error("non-finite float in payload")]
    InvalidFloat,

    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Handshake failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("bad handshake magic")]
    BadMagic,

    #[error("schema mismatch: local {local}, remote {remote}")]
    SchemaMismatch { local: SchemaHash, remote: SchemaHash },

    #[error("handshake required before application traffic")]
    HandshakeRequired,
}

/// Transport layer errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("connect failed to {addr}: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("socket error: {0}")]
    SocketError(String),

    #[error("tx buffer congested")]
    TxCongested,

    #[error("not connected")]
    NotConnected,
}

impl Error {
    /// Check if error is recoverable (should retry).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout
                | Error::Transport(
                    TransportError::SendFailed(_)
                        | TransportError::ReceiveFailed(_)
                        | TransportError::TxCongested
                )
                | Error::Io(_)
        )
    }

    /// Check if error indicates the connection should be torn down.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::NotConnected | TransportError::ConnectFailed { .. })
                | Error::Handshake(HandshakeError::SchemaMismatch { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::UnsupportedVersion { major: 9, minor: 7 };
        assert_eq!(err.to_string(), "unsupported protocol version 9.7");

        let err = DecodeError::UnknownMessageType(MessageTypeId(42));
        assert_eq!(err.to_string(), "unknown message type 42");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::ConnectionTimeout.is_recoverable());
        assert!(!Error::Decode(DecodeError::ChecksumMismatch).is_recoverable());
        assert!(Error::Handshake(HandshakeError::SchemaMismatch {
            local: SchemaHash(1),
            remote: SchemaHash(2),
        })
        .should_reconnect());
    }
}
