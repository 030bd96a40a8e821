//! Core types used throughout BCNP.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire identifier of a message type, unique within a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageTypeId(pub u16);

impl MessageTypeId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for MessageTypeId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// 32-bit fingerprint of the set of `(type_id, wire_size)` pairs known to a
/// peer. Exchanged in the handshake; peers with different hashes cannot talk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaHash(pub u32);

impl SchemaHash {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
