//! Message registry: the process-wide `type_id → wire layout` table.
//!
//! Populated once at startup from the application's schema and immutable
//! afterwards, so lookups on the receive path need no synchronization. The
//! registry also owns the schema hash that peers compare in the handshake.

use std::collections::BTreeMap;
use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use once_cell::sync::OnceCell;

use crate::error::{Error, Result};
use crate::protocol::{checksum, WireMessage};
use crate::types::{MessageTypeId, SchemaHash};

static GLOBAL_REGISTRY: OnceCell<MessageRegistry> = OnceCell::new();

/// Wire layout of one registered message type.
#[derive(Debug, Clone, Copy)]
pub struct MessageSpec {
    /// Encoded size of one message in bytes (1–65535).
    pub wire_size: u16,
    /// Optional payload validator run against each message on decode.
    pub validator: Option<fn(&[u8]) -> bool>,
}

/// Immutable mapping from message type ids to their wire layout.
#[derive(Debug, Clone)]
pub struct MessageRegistry {
    entries: HashMap<u16, MessageSpec>,
    schema_hash: SchemaHash,
}

impl MessageRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up the wire layout for a type id.
    pub fn lookup(&self, id: MessageTypeId) -> Option<MessageSpec> {
        self.entries.get(&id.0).copied()
    }

    /// Look up just the wire size for a type id.
    pub fn wire_size(&self, id: MessageTypeId) -> Option<u16> {
        self.lookup(id).map(|spec| spec.wire_size)
    }

    /// The fingerprint peers compare during the handshake.
    pub fn schema_hash(&self) -> SchemaHash {
        self.schema_hash
    }

    /// Number of registered message types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install this registry as the process-wide default.
    ///
    /// Must happen before the first packet arrives; fails if a registry has
    /// already been installed.
    pub fn install(self) -> Result<&'static MessageRegistry> {
        GLOBAL_REGISTRY
            .set(self)
            .map_err(|_| Error::Config("message registry already installed".into()))?;
        Ok(GLOBAL_REGISTRY.get().expect("registry just installed"))
    }

    /// The process-wide registry, if one has been installed.
    pub fn global() -> Option<&'static MessageRegistry> {
        GLOBAL_REGISTRY.get()
    }
}

/// Builder for a [`MessageRegistry`].
///
/// Keeps entries ordered by type id so the schema hash is independent of
/// registration order.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<u16, MessageSpec>,
}

impl RegistryBuilder {
    /// Register a message type by its trait implementation.
    pub fn register<M: WireMessage>(self) -> Result<Self> {
        self.register_spec(
            M::TYPE_ID,
            MessageSpec {
                wire_size: M::WIRE_SIZE as u16,
                validator: Some(M::validate as fn(&[u8]) -> bool),
            },
        )
    }

    /// Register a raw `(type_id, layout)` entry.
    ///
    /// Duplicate ids are refused: two types sharing an id is a schema bug
    /// that must surface at setup, not on the wire.
    pub fn register_spec(mut self, id: MessageTypeId, spec: MessageSpec) -> Result<Self> {
        assert!(spec.wire_size > 0, "wire size must be 1-65535");
        if self.entries.contains_key(&id.0) {
            return Err(Error::DuplicateMessageType(id));
        }
        self.entries.insert(id.0, spec);
        Ok(self)
    }

    /// Finish building; computes the schema hash.
    pub fn build(self) -> MessageRegistry {
        let schema_hash = compute_schema_hash(&self.entries);
        MessageRegistry {
            entries: self.entries.into_iter().collect(),
            schema_hash,
        }
    }
}

/// Hash the ordered `(type_id, wire_size)` list.
///
/// CRC32 over `type_id (BE u16) ‖ wire_size (BE u16)` for every entry in
/// ascending type-id order. Peer implementations must mirror this exactly.
fn compute_schema_hash(entries: &BTreeMap<u16, MessageSpec>) -> SchemaHash {
    let mut bytes = Vec::with_capacity(entries.len() * 4);
    for (id, spec) in entries {
        let mut pair = [0u8; 4];
        BigEndian::write_u16(&mut pair[0..2], *id);
        BigEndian::write_u16(&mut pair[2..4], spec.wire_size);
        bytes.extend_from_slice(&pair);
    }
    SchemaHash(checksum(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DriveCmd, DrivetrainState};

    #[test]
    fn test_lookup_registered_and_absent() {
        let registry = MessageRegistry::builder()
            .register::<DriveCmd>()
            .unwrap()
            .build();

        assert_eq!(registry.wire_size(DriveCmd::TYPE_ID), Some(10));
        assert_eq!(registry.wire_size(MessageTypeId(9999)), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_refused() {
        let result = MessageRegistry::builder()
            .register::<DriveCmd>()
            .unwrap()
            .register::<DriveCmd>();
        assert!(matches!(
            result,
            Err(Error::DuplicateMessageType(id)) if id == DriveCmd::TYPE_ID
        ));
    }

    #[test]
    fn test_schema_hash_is_order_independent() {
        let forward = MessageRegistry::builder()
            .register::<DriveCmd>()
            .unwrap()
            .register::<DrivetrainState>()
            .unwrap()
            .build();
        let reverse = MessageRegistry::builder()
            .register::<DrivetrainState>()
            .unwrap()
            .register::<DriveCmd>()
            .unwrap()
            .build();

        assert_eq!(forward.schema_hash(), reverse.schema_hash());
    }

    #[test]
    fn test_schema_hash_changes_with_layout() {
        let one = MessageRegistry::builder()
            .register::<DriveCmd>()
            .unwrap()
            .build();
        let two = MessageRegistry::builder()
            .register_spec(
                DriveCmd::TYPE_ID,
                MessageSpec {
                    wire_size: DriveCmd::WIRE_SIZE as u16 + 2,
                    validator: None,
                },
            )
            .unwrap()
            .build();

        assert_ne!(one.schema_hash(), two.schema_hash());
    }

    #[test]
    fn test_schema_hash_known_vector() {
        // Single entry (1, 10): CRC32 over 00 01 00 0A must be stable so
        // peer implementations can hard-code test vectors against it.
        let registry = MessageRegistry::builder()
            .register_spec(
                MessageTypeId(1),
                MessageSpec {
                    wire_size: 10,
                    validator: None,
                },
            )
            .unwrap()
            .build();
        assert_eq!(
            registry.schema_hash().as_u32(),
            checksum(&[0x00, 0x01, 0x00, 0x0A])
        );
    }
}
