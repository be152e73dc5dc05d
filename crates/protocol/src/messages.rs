//! Session message kinds
//!
//! Payload layouts (after the envelope header):
//!
//! ```text
//! handshake:  [major: u8][minor: u8][revision: u8][build: u32][protocol: u32]
//! disconnect: [reason: string]
//! rpc:        [name: string]
//! simcommit:  [tick: u32][count: u32]{[net_id: u32][snapshot]}*
//! unscope:    [count: u32]{[net_id: u32]}*
//! ```
//!
//! [`Scope`](crate::Scope) lives in its own module since it borrows entities.

use crate::bitstream::{BitStream, LENGTH_PREFIX};
use crate::message::{Message, MessageType};
use crate::persistable::{Replicated, Snapshot};
use replica_core::{EngineVersion, NetId, Result, PROTOCOL_VERSION};

/// Version exchange that opens every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub version: EngineVersion,
    pub protocol: u32,
}

impl Handshake {
    pub fn new(version: EngineVersion, protocol: u32) -> Self {
        Self { version, protocol }
    }

    /// Handshake describing this build
    pub fn local() -> Self {
        Self::new(EngineVersion::CURRENT, PROTOCOL_VERSION)
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::local()
    }
}

impl Message for Handshake {
    const TYPE: MessageType = MessageType::Handshake;

    fn minimum_payload_length() -> usize {
        3 + 4 + 4
    }

    fn required_memory(&self) -> usize {
        Self::minimum_payload_length()
    }

    fn pack_payload(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.version.major)?;
        out.write(self.version.minor)?;
        out.write(self.version.revision)?;
        out.write(self.version.build)?;
        out.write(self.protocol)
    }

    fn unpack_payload(input: &mut BitStream<'_>) -> Result<Self> {
        let major = input.read()?;
        let minor = input.read()?;
        let revision = input.read()?;
        let build = input.read()?;
        let protocol = input.read()?;
        Ok(Self::new(EngineVersion::new(major, minor, revision, build), protocol))
    }
}

/// Session teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: String,
}

impl Disconnect {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Message for Disconnect {
    const TYPE: MessageType = MessageType::Disconnect;

    fn minimum_payload_length() -> usize {
        LENGTH_PREFIX
    }

    fn required_memory(&self) -> usize {
        LENGTH_PREFIX + self.reason.len()
    }

    fn pack_payload(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write_string(&self.reason)
    }

    fn unpack_payload(input: &mut BitStream<'_>) -> Result<Self> {
        Ok(Self {
            reason: input.read_string()?,
        })
    }
}

/// Request to run a named remote procedure on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRpc {
    pub name: String,
}

impl ExecuteRpc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Message for ExecuteRpc {
    const TYPE: MessageType = MessageType::ExecuteRpc;

    fn minimum_payload_length() -> usize {
        LENGTH_PREFIX
    }

    fn required_memory(&self) -> usize {
        LENGTH_PREFIX + self.name.len()
    }

    fn pack_payload(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write_string(&self.name)
    }

    fn unpack_payload(input: &mut BitStream<'_>) -> Result<Self> {
        Ok(Self {
            name: input.read_string()?,
        })
    }
}

/// Closes one simulation tick and carries the property deltas produced in it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimCommit {
    pub tick: u32,
    deltas: Vec<(NetId, Snapshot)>,
}

impl SimCommit {
    pub fn new(tick: u32) -> Self {
        Self {
            tick,
            deltas: Vec::new(),
        }
    }

    /// Take the pending deltas of `entity`, clearing its dirty set
    ///
    /// Entities with nothing to send are skipped.
    ///
    /// # Returns
    /// Whether a delta was added
    pub fn add(&mut self, entity: &mut dyn Replicated) -> bool {
        let snapshot = entity.properties_mut().take_deltas();
        if snapshot.is_empty() {
            return false;
        }
        self.deltas.push((entity.net_id(), snapshot));
        true
    }

    /// Add an already captured delta
    pub fn push(&mut self, net_id: NetId, snapshot: Snapshot) {
        self.deltas.push((net_id, snapshot));
    }

    pub fn deltas(&self) -> &[(NetId, Snapshot)] {
        &self.deltas
    }

    pub fn into_deltas(self) -> Vec<(NetId, Snapshot)> {
        self.deltas
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

impl Message for SimCommit {
    const TYPE: MessageType = MessageType::SimCommit;

    fn minimum_payload_length() -> usize {
        4 + 4
    }

    fn required_memory(&self) -> usize {
        Self::minimum_payload_length()
            + self
                .deltas
                .iter()
                .map(|(_, snapshot)| 4 + snapshot.encoded_len())
                .sum::<usize>()
    }

    fn pack_payload(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.tick)?;
        out.write(self.deltas.len() as u32)?;
        for (net_id, snapshot) in &self.deltas {
            out.write(net_id.get())?;
            snapshot.pack(out)?;
        }
        Ok(())
    }

    fn unpack_payload(input: &mut BitStream<'_>) -> Result<Self> {
        let tick = input.read()?;
        let count = input.read::<u32>()?;
        let mut deltas = Vec::new();
        for _ in 0..count {
            let net_id = NetId(input.read()?);
            deltas.push((net_id, Snapshot::unpack(input)?));
        }
        Ok(Self { tick, deltas })
    }
}

/// Entities the receiver must drop from its mirror
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Unscope {
    net_ids: Vec<NetId>,
}

impl Unscope {
    pub fn new(net_ids: impl IntoIterator<Item = NetId>) -> Self {
        Self {
            net_ids: net_ids.into_iter().collect(),
        }
    }

    pub fn net_ids(&self) -> &[NetId] {
        &self.net_ids
    }

    pub fn is_empty(&self) -> bool {
        self.net_ids.is_empty()
    }
}

impl Message for Unscope {
    const TYPE: MessageType = MessageType::Unscope;

    fn minimum_payload_length() -> usize {
        4
    }

    fn required_memory(&self) -> usize {
        4 + 4 * self.net_ids.len()
    }

    fn pack_payload(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.net_ids.len() as u32)?;
        for net_id in &self.net_ids {
            out.write(net_id.get())?;
        }
        Ok(())
    }

    fn unpack_payload(input: &mut BitStream<'_>) -> Result<Self> {
        let count = input.read::<u32>()?;
        input.ensure_remaining("unscope", count as usize * 4)?;
        let net_ids = (0..count)
            .map(|_| input.read().map(NetId))
            .collect::<Result<_>>()?;
        Ok(Self { net_ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{decode_payload, pack_message, unpack_message, MessageHeader};
    use crate::persistable::{NetworkPersistable, NetworkedEntity};
    use crate::property::PropertyValue;
    use replica_core::{IdGenerator, NetError};

    #[test]
    fn test_handshake_layout() {
        let handshake = Handshake::new(EngineVersion::new(1, 2, 3, 4), 9);
        let mut stream = BitStream::new();
        handshake.pack_payload(&mut stream).unwrap();
        assert_eq!(
            stream.as_bytes(),
            &[1, 2, 3, 4, 0, 0, 0, 9, 0, 0, 0]
        );
        assert_eq!(stream.written_len(), Handshake::minimum_payload_length());
        assert_eq!(decode_payload::<Handshake>(&mut stream).unwrap(), handshake);
    }

    #[test]
    fn test_short_handshake_is_rejected_before_reading() {
        // Truncated after the version triple
        let bytes = [1u8, 2, 3];
        let mut stream = BitStream::from_received(&bytes);
        assert!(matches!(
            decode_payload::<Handshake>(&mut stream),
            Err(NetError::PayloadTooShort { message: "handshake", required: 11, available: 3 })
        ));
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_disconnect_round_trip() {
        let sequence = IdGenerator::new();
        let mut stream = BitStream::new();
        pack_message(&Disconnect::new("Kicked"), &sequence, &mut stream).unwrap();

        let (header, message) = unpack_message::<Disconnect>(&mut stream).unwrap();
        assert_eq!(header.kind(), Some(MessageType::Disconnect));
        assert_eq!(message.reason, "Kicked");
    }

    #[test]
    fn test_short_disconnect() {
        let bytes = [5u8, 0];
        let mut stream = BitStream::from_received(&bytes);
        assert!(matches!(
            decode_payload::<Disconnect>(&mut stream),
            Err(NetError::PayloadTooShort { required: 4, available: 2, .. })
        ));
    }

    #[test]
    fn test_sim_commit_collects_dirty_entities() {
        let mut ogre = NetworkedEntity::new(NetId(7), 1);
        ogre.register_property("health", 100u32).unwrap();
        let mut idle = NetworkedEntity::new(NetId(8), 1);
        idle.register_property("health", 50u32).unwrap();

        ogre.set_property("health", 85u32).unwrap();

        let mut commit = SimCommit::new(12);
        assert!(commit.add(&mut ogre));
        assert!(!commit.add(&mut idle));
        assert!(!ogre.is_dirty());

        let mut stream = BitStream::new();
        pack_message(&commit, &IdGenerator::new(), &mut stream).unwrap();
        assert_eq!(stream.written_len(), MessageHeader::SIZE + commit.required_memory());

        let (_, decoded) = unpack_message::<SimCommit>(&mut stream).unwrap();
        assert_eq!(decoded.tick, 12);
        assert_eq!(decoded.deltas().len(), 1);

        let (net_id, snapshot) = &decoded.deltas()[0];
        assert_eq!(*net_id, NetId(7));
        assert_eq!(snapshot.entries()[0].1, PropertyValue::U32(85));
    }

    #[test]
    fn test_short_sim_commit() {
        let bytes = [1u8, 0, 0, 0, 0, 0];
        let mut stream = BitStream::from_received(&bytes);
        assert!(matches!(
            decode_payload::<SimCommit>(&mut stream),
            Err(NetError::PayloadTooShort { required: 8, available: 6, .. })
        ));
    }

    #[test]
    fn test_rpc_round_trip() {
        let mut stream = BitStream::new();
        pack_message(&ExecuteRpc::new("open_door"), &IdGenerator::new(), &mut stream).unwrap();
        let (_, rpc) = unpack_message::<ExecuteRpc>(&mut stream).unwrap();
        assert_eq!(rpc.name, "open_door");
    }

    #[test]
    fn test_unscope_layout() {
        let unscope = Unscope::new([NetId(3), NetId(9)]);
        let mut stream = BitStream::new();
        unscope.pack_payload(&mut stream).unwrap();
        assert_eq!(stream.as_bytes(), &[2, 0, 0, 0, 3, 0, 0, 0, 9, 0, 0, 0]);
        assert_eq!(stream.written_len(), unscope.required_memory());
        assert_eq!(decode_payload::<Unscope>(&mut stream).unwrap(), unscope);
    }

    #[test]
    fn test_unscope_count_past_end() {
        let bytes = [3u8, 0, 0, 0, 1, 0, 0, 0];
        let mut stream = BitStream::from_received(&bytes);
        assert!(matches!(
            decode_payload::<Unscope>(&mut stream),
            Err(NetError::PayloadTooShort { message: "unscope", .. })
        ));
    }
}
