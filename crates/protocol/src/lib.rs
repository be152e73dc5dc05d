//! # Replica Protocol Library
//!
//! Binary serialization and message framing for replicated game sessions.
//!
//! ## Architecture
//!
//! ### 1. Stream layer ([`bitstream`])
//! A bounds-checked byte stream with typed, little-endian reads and writes.
//! Backing memory is either owned and growable, a borrowed fixed region, or
//! borrowed bytes received from a peer.
//!
//! ### 2. Properties ([`property`], [`persistable`])
//! Objects register named, typed values in a [`PropertyTable`]. The table
//! tracks which values changed and packs either a full snapshot or only the
//! deltas. Keys are name hashes, so registration order does not matter.
//!
//! ### 3. Messages ([`message`], [`messages`], [`scope`])
//! Every message starts with a `[type: u32][sequence: u32]` header. The kinds
//! are [`Handshake`], [`Disconnect`], [`Scope`], [`SimCommit`],
//! [`ExecuteRpc`] and [`Unscope`]. Each one has a minimum payload length that is checked
//! before any field is read.
//!
//! ### 4. Entity construction ([`entity_registry`])
//! The receiving side of a scope turns type ids back into objects through an
//! [`EntityTypeRegistry`].
//!
//! ## Usage Example
//!
//! ```rust
//! use replica_core::{IdGenerator, NetId};
//! use replica_protocol::{
//!     BitStream, NetworkPersistable, NetworkedEntity, SimCommit, unpack_message, pack_message,
//! };
//!
//! let mut ogre = NetworkedEntity::new(NetId(1), 4);
//! ogre.register_property("health", 100u32)?;
//! ogre.set_property("health", 85u32)?;
//!
//! let mut commit = SimCommit::new(1);
//! commit.add(&mut ogre);
//!
//! let sequence = IdGenerator::new();
//! let mut stream = BitStream::new();
//! pack_message(&commit, &sequence, &mut stream)?;
//!
//! let (_header, received) = unpack_message::<SimCommit>(&mut stream)?;
//! assert_eq!(received.deltas().len(), 1);
//! # Ok::<(), replica_core::NetError>(())
//! ```

pub mod bitstream;
pub mod entity_registry;
pub mod message;
pub mod messages;
pub mod persistable;
pub mod property;
pub mod scope;

pub use bitstream::{BitStream, Serializable, StreamScalar};
pub use entity_registry::{EntityConstructor, EntityTypeRegistry};
pub use message::{
    decode_payload, encode_message, pack_message, unpack_message, Message, MessageHeader,
    MessageType,
};
pub use messages::{Disconnect, ExecuteRpc, Handshake, SimCommit, Unscope};
pub use persistable::{
    NetworkPersistable, NetworkedEntity, PropertyEntry, PropertyTable, Replicated, ScopeFlags,
    Snapshot,
};
pub use property::{NetworkedValue, PropertySlot, PropertyType, PropertyValue};
pub use scope::Scope;
