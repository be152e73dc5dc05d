//! Scope message: bulk replication of whole entities
//!
//! # Format
//! `[count: u32]` then per entity `[entity_type: u32][net_id: u32][full snapshot]`.

use crate::bitstream::{BitStream, LENGTH_PREFIX};
use crate::entity_registry::EntityTypeRegistry;
use crate::message::{MessageHeader, MessageType};
use crate::persistable::Replicated;
use bytes::Bytes;
use replica_core::{IdGenerator, NetId, Result};

/// Entities to replicate in full
///
/// Holds references only; the entities stay owned by their world.
#[derive(Default)]
pub struct Scope<'a> {
    entities: Vec<&'a dyn Replicated>,
}

impl<'a> Scope<'a> {
    pub const TYPE: MessageType = MessageType::Scope;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: &'a dyn Replicated) {
        self.entities.push(entity);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn minimum_payload_length() -> usize {
        LENGTH_PREFIX
    }

    pub fn required_memory(&self) -> usize {
        LENGTH_PREFIX
            + self
                .entities
                .iter()
                .map(|e| 8 + e.properties().snapshot_len())
                .sum::<usize>()
    }

    pub fn pack_payload(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.entities.len() as u32)?;
        for entity in &self.entities {
            out.write(entity.entity_type())?;
            out.write(entity.net_id().get())?;
            entity.pack_all(out)?;
        }
        Ok(())
    }

    /// Write the envelope header and the payload
    ///
    /// # Returns
    /// The sequence number that was used
    pub fn pack(&self, sequence: &IdGenerator, out: &mut BitStream<'_>) -> Result<u32> {
        let header = MessageHeader::new(Self::TYPE, sequence.next());
        header.pack(out)?;
        self.pack_payload(out)?;
        Ok(header.sequence)
    }

    /// Pack into a new, exactly sized buffer
    pub fn encode(&self, sequence: &IdGenerator) -> Result<Bytes> {
        let mut out = BitStream::with_capacity(MessageHeader::SIZE + self.required_memory());
        self.pack(sequence, &mut out)?;
        Ok(out.into_bytes())
    }

    /// Decode a scope payload, constructing each entity through `registry`
    ///
    /// # Errors
    /// `PayloadTooShort` if the count is missing, `UnknownEntityType` for an
    /// unregistered type id, or whatever the constructor reports.
    pub fn unpack(
        input: &mut BitStream<'_>,
        registry: &EntityTypeRegistry,
    ) -> Result<Vec<Box<dyn Replicated>>> {
        input.ensure_remaining(Self::TYPE.name(), Self::minimum_payload_length())?;
        let count = input.read::<u32>()?;

        let mut entities = Vec::new();
        for _ in 0..count {
            let entity_type = input.read::<u32>()?;
            let net_id = NetId(input.read()?);
            entities.push(registry.construct(entity_type, net_id, input)?);
        }
        Ok(entities)
    }
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = self.entities.iter().map(|e| e.net_id()).collect();
        f.debug_struct("Scope").field("entities", &ids).finish()
    }
}
