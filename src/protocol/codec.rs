//! Packet encoding and decoding.
//!
//! Decode results carry a `bytes_consumed` even on failure: the stream
//! parser needs to know how far to advance to hunt for the next frame.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{DecodeError, EncodeError};
use crate::registry::MessageRegistry;
use crate::storage::MessageStorage;

use super::{
    checksum, is_compatible_version, PacketHeader, PacketView, TypedPacket, WireMessage,
    CHECKSUM_SIZE, HEADER_SIZE, MAX_MESSAGES_PER_PACKET,
};

/// Result of a view decode attempt.
///
/// `bytes_consumed` is meaningful for both arms:
///
/// - on success, the full frame length;
/// - on failure, how far the caller may safely advance (0 = wait for more
///   bytes, 1 = single-byte resync step, frame length = discard the frame).
#[derive(Debug)]
pub struct DecodeOutcome<'a> {
    /// The parsed view, or the reason the bytes were rejected.
    pub view: Result<PacketView<'a>, DecodeError>,
    /// Bytes of input this attempt accounts for.
    pub bytes_consumed: usize,
}

impl DecodeOutcome<'_> {
    fn error(error: DecodeError, bytes_consumed: usize) -> Self {
        Self {
            view: Err(error),
            bytes_consumed,
        }
    }
}

/// Encode a typed packet into `dst`.
///
/// Writes header, payload, and CRC trailer; returns the number of bytes
/// written. Fails when the message count exceeds the wire limit, when any
/// message's encoder rejects its value (e.g. a non-finite float), or when
/// `dst` is too small.
pub fn encode_packet<M, S>(
    packet: &TypedPacket<M, S>,
    dst: &mut [u8],
) -> Result<usize, EncodeError>
where
    M: WireMessage,
    S: MessageStorage<M>,
{
    let count = packet.messages.len();
    if count > MAX_MESSAGES_PER_PACKET {
        return Err(EncodeError::TooManyMessages(count));
    }

    let payload_size = HEADER_SIZE + count * M::WIRE_SIZE;
    let needed = payload_size + CHECKSUM_SIZE;
    if dst.len() < needed {
        return Err(EncodeError::BufferTooSmall {
            needed,
            capacity: dst.len(),
        });
    }

    packet.header().write(&mut dst[..HEADER_SIZE]);

    let mut offset = HEADER_SIZE;
    for (index, msg) in packet.messages.as_slice().iter().enumerate() {
        if !msg.encode(&mut dst[offset..offset + M::WIRE_SIZE]) {
            return Err(EncodeError::MessageRejected { index });
        }
        offset += M::WIRE_SIZE;
    }

    let crc = checksum(&dst[..payload_size]);
    BigEndian::write_u32(&mut dst[payload_size..payload_size + CHECKSUM_SIZE], crc);

    Ok(needed)
}

/// Encode a typed packet into a freshly allocated buffer.
///
/// Allocates; not for real-time loops. Use [`encode_packet`] with a
/// caller-owned buffer there.
pub fn encode_packet_to_vec<M, S>(packet: &TypedPacket<M, S>) -> Result<Vec<u8>, EncodeError>
where
    M: WireMessage,
    S: MessageStorage<M>,
{
    let mut buf = vec![0u8; packet.encoded_size()];
    let written = encode_packet(packet, &mut buf)?;
    buf.truncate(written);
    Ok(buf)
}

/// Decode a packet view with a known per-message wire size.
pub fn decode_view(bytes: &[u8], wire_size: usize) -> DecodeOutcome<'_> {
    decode_view_inner(bytes, |_| Some((wire_size, None)))
}

/// Decode with an explicit wire size and optional payload validator.
///
/// The stream parser resolves both through its wire-size lookup before the
/// full frame is buffered, then decodes here.
pub(crate) fn decode_view_with(
    bytes: &[u8],
    wire_size: usize,
    validator: Option<fn(&[u8]) -> bool>,
) -> DecodeOutcome<'_> {
    decode_view_inner(bytes, |_| Some((wire_size, validator)))
}

/// Decode a packet view, resolving the wire size through the registry.
///
/// Unregistered type ids fail with `UnknownMessageType` and a single-byte
/// advance. When the registry entry carries a validator, every message in
/// the payload must pass it.
pub fn decode_view_by_registry<'a>(
    bytes: &'a [u8],
    registry: &MessageRegistry,
) -> DecodeOutcome<'a> {
    decode_view_inner(bytes, |header| {
        registry
            .lookup(header.message_type_id)
            .map(|spec| (spec.wire_size as usize, spec.validator))
    })
}

fn decode_view_inner<'a, F>(bytes: &'a [u8], resolve: F) -> DecodeOutcome<'a>
where
    F: FnOnce(&PacketHeader) -> Option<(usize, Option<fn(&[u8]) -> bool>)>,
{
    if bytes.len() < HEADER_SIZE {
        return DecodeOutcome::error(DecodeError::TooSmall, 0);
    }

    let header = PacketHeader::read(bytes);

    if !is_compatible_version(header.major, header.minor) {
        // Single-byte advance lets the parser search for a resync point.
        return DecodeOutcome::error(
            DecodeError::UnsupportedVersion {
                major: header.major,
                minor: header.minor,
            },
            1,
        );
    }

    let Some((wire_size, validator)) = resolve(&header) else {
        return DecodeOutcome::error(DecodeError::UnknownMessageType(header.message_type_id), 1);
    };

    let count = header.message_count as usize;
    if count > MAX_MESSAGES_PER_PACKET {
        return DecodeOutcome::error(DecodeError::TooManyMessages(header.message_count), 1);
    }

    let payload_size = HEADER_SIZE + count * wire_size;
    let frame_size = payload_size + CHECKSUM_SIZE;
    if bytes.len() < frame_size {
        return DecodeOutcome::error(DecodeError::Truncated, 0);
    }

    let transmitted = BigEndian::read_u32(&bytes[payload_size..payload_size + CHECKSUM_SIZE]);
    let computed = checksum(&bytes[..payload_size]);
    if transmitted != computed {
        // A length field can be forged to engulf a later legitimate packet,
        // so the parser discards one byte instead of the whole frame.
        return DecodeOutcome::error(DecodeError::ChecksumMismatch, frame_size);
    }

    let payload = &bytes[HEADER_SIZE..payload_size];
    if let Some(validate) = validator {
        if wire_size > 0 && !payload.chunks_exact(wire_size).all(validate) {
            return DecodeOutcome::error(DecodeError::InvalidFloat, frame_size);
        }
    }

    DecodeOutcome {
        view: Ok(PacketView::new(header, payload)),
        bytes_consumed: frame_size,
    }
}
