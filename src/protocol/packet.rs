//! Packet structures: header, typed send-side packets, borrowed views.

use std::marker::PhantomData;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::storage::MessageStorage;
use crate::types::MessageTypeId;
use crate::{PROTOCOL_MAJOR, PROTOCOL_MINOR};

use super::{
    WireMessage, HEADER_COUNT_INDEX, HEADER_FLAGS_INDEX, HEADER_MAJOR_INDEX, HEADER_MINOR_INDEX,
    HEADER_SIZE, HEADER_TYPE_INDEX,
};

/// Packet flags (header byte 2).
///
/// Bit 0 requests that the receiver drop queued messages of this type before
/// enqueuing the packet contents. Remaining bits are reserved; they are
/// preserved on decode but not interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Drop queued messages before applying this packet.
    pub const CLEAR_QUEUE: u8 = 1 << 0;

    /// Create flags from raw bits.
    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// Check if a flag is set.
    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Set a flag.
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Clear a flag.
    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// True if the clear-queue bit is set.
    pub fn clear_queue(self) -> bool {
        self.has(Self::CLEAR_QUEUE)
    }

    /// Get raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Packet header (7 bytes on the wire, big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol major version.
    pub major: u8,
    /// Protocol minor version.
    pub minor: u8,
    /// Flags.
    pub flags: PacketFlags,
    /// Wire type of the messages in the payload.
    pub message_type_id: MessageTypeId,
    /// Number of messages in the payload.
    pub message_count: u16,
}

impl PacketHeader {
    /// Create a header for the local protocol version.
    pub fn new(message_type_id: MessageTypeId, message_count: u16, flags: PacketFlags) -> Self {
        Self {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            flags,
            message_type_id,
            message_count,
        }
    }

    /// Write the header fields into `buf[..HEADER_SIZE]`.
    pub(crate) fn write(&self, buf: &mut [u8]) {
        buf[HEADER_MAJOR_INDEX] = self.major;
        buf[HEADER_MINOR_INDEX] = self.minor;
        buf[HEADER_FLAGS_INDEX] = self.flags.bits();
        BigEndian::write_u16(&mut buf[HEADER_TYPE_INDEX..HEADER_TYPE_INDEX + 2], self.message_type_id.0);
        BigEndian::write_u16(&mut buf[HEADER_COUNT_INDEX..HEADER_COUNT_INDEX + 2], self.message_count);
    }

    /// Read header fields from `buf[..HEADER_SIZE]` without validation.
    ///
    /// The codec performs version/count checks separately so it can report
    /// the right error kind and resync distance.
    pub(crate) fn read(buf: &[u8]) -> Self {
        Self {
            major: buf[HEADER_MAJOR_INDEX],
            minor: buf[HEADER_MINOR_INDEX],
            flags: PacketFlags::new(buf[HEADER_FLAGS_INDEX]),
            message_type_id: MessageTypeId(BigEndian::read_u16(
                &buf[HEADER_TYPE_INDEX..HEADER_TYPE_INDEX + 2],
            )),
            message_count: BigEndian::read_u16(&buf[HEADER_COUNT_INDEX..HEADER_COUNT_INDEX + 2]),
        }
    }
}

/// A typed packet under construction on the send side.
///
/// Generic over the storage backend: `Vec<M>` by default, or
/// [`StackVec`](crate::storage::StackVec) for allocation-free hot paths.
#[derive(Debug, Clone, Default)]
pub struct TypedPacket<M, S = Vec<M>>
where
    S: MessageStorage<M>,
{
    /// Flags to send in the header.
    pub flags: PacketFlags,
    /// Message payload.
    pub messages: S,
    _marker: PhantomData<M>,
}

impl<M, S> TypedPacket<M, S>
where
    M: WireMessage,
    S: MessageStorage<M> + Default,
{
    /// Create an empty packet.
    pub fn new() -> Self {
        Self {
            flags: PacketFlags::NONE,
            messages: S::default(),
            _marker: PhantomData,
        }
    }

    /// Create an empty packet with the clear-queue flag set.
    pub fn with_clear_queue() -> Self {
        let mut packet = Self::new();
        packet.flags.set(PacketFlags::CLEAR_QUEUE);
        packet
    }
}

impl<M, S> TypedPacket<M, S>
where
    M: WireMessage,
    S: MessageStorage<M>,
{
    /// Wrap an existing storage container.
    pub fn from_storage(messages: S, flags: PacketFlags) -> Self {
        Self {
            flags,
            messages,
            _marker: PhantomData,
        }
    }

    /// Append a message; returns `false` if a fixed container is full.
    pub fn push(&mut self, msg: M) -> bool {
        self.messages.push(msg)
    }

    /// Header this packet will carry on the wire.
    pub fn header(&self) -> PacketHeader {
        PacketHeader::new(M::TYPE_ID, self.messages.len() as u16, self.flags)
    }

    /// Total encoded size in bytes.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.messages.len() * M::WIRE_SIZE + super::CHECKSUM_SIZE
    }
}

/// A borrowed, read-only view into a parsed packet.
///
/// Valid only while the backing buffer is unchanged; the stream parser never
/// invalidates a view until the handler returns to it.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    /// Decoded header.
    pub header: PacketHeader,
    payload: &'a [u8],
}

impl<'a> PacketView<'a> {
    pub(crate) fn new(header: PacketHeader, payload: &'a [u8]) -> Self {
        Self { header, payload }
    }

    /// Raw payload bytes (`message_count × wire_size`).
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Iterate the payload as messages of type `M`.
    ///
    /// Yields `message_count` decoded messages when `M::TYPE_ID` matches the
    /// header's type id, and nothing otherwise.
    pub fn messages<M: WireMessage>(&self) -> MessageIter<'a, M> {
        let count = if M::TYPE_ID == self.header.message_type_id {
            self.header.message_count as usize
        } else {
            0
        };
        MessageIter {
            payload: self.payload,
            index: 0,
            count,
            _marker: PhantomData,
        }
    }
}

/// Iterator over the typed messages of a [`PacketView`].
pub struct MessageIter<'a, M> {
    payload: &'a [u8],
    index: usize,
    count: usize,
    _marker: PhantomData<M>,
}

impl<M: WireMessage> Iterator for MessageIter<'_, M> {
    type Item = M;

    fn next(&mut self) -> Option<M> {
        if self.index >= self.count {
            return None;
        }
        let start = self.index * M::WIRE_SIZE;
        let chunk = self.payload.get(start..start + M::WIRE_SIZE)?;
        self.index += 1;
        M::decode(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (0, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DriveCmd;
    use crate::storage::StackVec;

    #[test]
    fn test_header_write_read() {
        let header = PacketHeader::new(MessageTypeId(0x0102), 513, PacketFlags::new(0x01));

        let mut buf = [0u8; HEADER_SIZE];
        header.write(&mut buf);

        assert_eq!(buf, [PROTOCOL_MAJOR, PROTOCOL_MINOR, 0x01, 0x01, 0x02, 0x02, 0x01]);
        assert_eq!(PacketHeader::read(&buf), header);
    }

    #[test]
    fn test_flags() {
        let mut flags = PacketFlags::NONE;
        assert!(!flags.clear_queue());
        flags.set(PacketFlags::CLEAR_QUEUE);
        assert!(flags.clear_queue());
        flags.clear(PacketFlags::CLEAR_QUEUE);
        assert_eq!(flags.bits(), 0);
    }

    #[test]
    fn test_typed_packet_sizes() {
        let mut packet: TypedPacket<DriveCmd> = TypedPacket::new();
        packet.push(DriveCmd::new(0.5, -1.0, 1500));
        packet.push(DriveCmd::new(-0.25, 0.25, 500));

        assert_eq!(packet.encoded_size(), 7 + 2 * 10 + 4);
        assert_eq!(packet.header().message_count, 2);
        assert_eq!(packet.header().message_type_id, DriveCmd::TYPE_ID);
    }

    #[test]
    fn test_typed_packet_stack_storage() {
        let mut packet: TypedPacket<DriveCmd, StackVec<DriveCmd, 2>> =
            TypedPacket::from_storage(StackVec::new(), PacketFlags::NONE);
        assert!(packet.push(DriveCmd::new(0.1, 0.0, 100)));
        assert!(packet.push(DriveCmd::new(0.2, 0.0, 100)));
        assert!(!packet.push(DriveCmd::new(0.3, 0.0, 100)));
        assert_eq!(packet.header().message_count, 2);
    }

    #[test]
    fn test_view_typed_iteration_wrong_type_is_empty() {
        let header = PacketHeader::new(MessageTypeId(999), 3, PacketFlags::NONE);
        let payload = [0u8; 30];
        let view = PacketView::new(header, &payload);
        assert_eq!(view.messages::<DriveCmd>().count(), 0);
    }
}
