//! Wire protocol for BCNP.
//!
//! Defines the packet format, the message capability traits, and the codec.
//!
//! ## Packet Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Major (1) │ Minor (1) │ Flags (1) │ Message Type (2) │ Count (2)     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                Payload: Count × wire_size bytes                      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                           CRC32 (4)                                  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte fields are big-endian. The CRC covers header + payload.

mod codec;
mod message;
mod packet;

pub use codec::{
    decode_view, decode_view_by_registry, encode_packet, encode_packet_to_vec, DecodeOutcome,
};
pub(crate) use codec::decode_view_with;
pub use message::{TimedMessage, WireMessage};
pub use packet::{MessageIter, PacketFlags, PacketHeader, PacketView, TypedPacket};

use crate::{PROTOCOL_MAJOR, PROTOCOL_MINOR};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 7;

/// CRC trailer size in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Maximum messages in a single packet.
pub const MAX_MESSAGES_PER_PACKET: usize = 65_535;

/// Smallest frame that can appear on the wire (header + CRC, empty payload).
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

// Header field offsets.
pub(crate) const HEADER_MAJOR_INDEX: usize = 0;
pub(crate) const HEADER_MINOR_INDEX: usize = 1;
pub(crate) const HEADER_FLAGS_INDEX: usize = 2;
pub(crate) const HEADER_TYPE_INDEX: usize = 3;
pub(crate) const HEADER_COUNT_INDEX: usize = 5;

/// Calculate the CRC32 checksum used by the wire format.
///
/// Reflected polynomial `0xEDB88320`, initial value `0xFFFFFFFF`, final XOR
/// `0xFFFFFFFF` (CRC-32/ISO-HDLC).
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify protocol version compatibility. Both components must match.
pub fn is_compatible_version(major: u8, minor: u8) -> bool {
    major == PROTOCOL_MAJOR && minor == PROTOCOL_MINOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_vector() {
        // CRC-32/ISO-HDLC of "123456789"
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_version_check() {
        assert!(is_compatible_version(PROTOCOL_MAJOR, PROTOCOL_MINOR));
        assert!(!is_compatible_version(PROTOCOL_MAJOR + 1, PROTOCOL_MINOR));
        assert!(!is_compatible_version(PROTOCOL_MAJOR, PROTOCOL_MINOR + 1));
    }
}
