//! Message envelope
//!
//! Every message on the wire starts with the same header:
//!
//! ```text
//! [type: u32][sequence: u32][payload...]
//! ```
//!
//! The sequence number comes from the sender's own generator and increases by
//! one per packed message. Several messages may sit back to back in one
//! transport packet.

use crate::bitstream::BitStream;
use bytes::Bytes;
use replica_core::{IdGenerator, NetError, Result};

/// Closed set of message kinds
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    /// Version exchange opening a session
    Handshake = 1,
    /// Session teardown with a reason
    Disconnect = 2,
    /// Bulk entity replication
    Scope = 3,
    /// End of a simulation tick, with property deltas
    SimCommit = 4,
    /// Named remote procedure call from client to server
    ExecuteRpc = 5,
    /// Entities leaving a peer's scope
    Unscope = 6,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::Handshake,
        MessageType::Disconnect,
        MessageType::Scope,
        MessageType::SimCommit,
        MessageType::ExecuteRpc,
        MessageType::Unscope,
    ];

    /// Convert a wire tag to a message type
    ///
    /// # Example
    /// ```
    /// use replica_protocol::MessageType;
    ///
    /// assert_eq!(MessageType::from_u32(3), Some(MessageType::Scope));
    /// assert_eq!(MessageType::from_u32(99), None);
    /// ```
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Handshake),
            2 => Some(Self::Disconnect),
            3 => Some(Self::Scope),
            4 => Some(Self::SimCommit),
            5 => Some(Self::ExecuteRpc),
            6 => Some(Self::Unscope),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Disconnect => "disconnect",
            Self::Scope => "scope",
            Self::SimCommit => "sim commit",
            Self::ExecuteRpc => "execute rpc",
            Self::Unscope => "unscope",
        }
    }
}

/// Decoded envelope header
///
/// The type is kept raw so dispatch can tell an unknown tag from a known tag
/// arriving in the wrong stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: u32,
    pub sequence: u32,
}

impl MessageHeader {
    /// Encoded size of the header
    pub const SIZE: usize = 8;

    pub fn new(message_type: MessageType, sequence: u32) -> Self {
        Self {
            message_type: message_type.as_u32(),
            sequence,
        }
    }

    /// The known message type, if any
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u32(self.message_type)
    }

    pub fn pack(&self, out: &mut BitStream<'_>) -> Result<()> {
        out.write(self.message_type)?;
        out.write(self.sequence)
    }

    /// Read a header, checking that a full header remains first
    pub fn unpack(input: &mut BitStream<'_>) -> Result<Self> {
        input.ensure_remaining("message header", Self::SIZE)?;
        Ok(Self {
            message_type: input.read()?,
            sequence: input.read()?,
        })
    }
}

/// A message kind with a statically known payload layout
pub trait Message: Sized {
    const TYPE: MessageType;

    /// Fewest payload bytes a valid instance can occupy
    fn minimum_payload_length() -> usize;

    /// Payload bytes this instance packs to
    fn required_memory(&self) -> usize;

    fn pack_payload(&self, out: &mut BitStream<'_>) -> Result<()>;

    /// Decode the payload; the minimum length has already been checked
    fn unpack_payload(input: &mut BitStream<'_>) -> Result<Self>;
}

/// Write `message` with a fresh sequence number from `sequence`
///
/// # Returns
/// The sequence number that was used
pub fn pack_message<M: Message>(
    message: &M,
    sequence: &IdGenerator,
    out: &mut BitStream<'_>,
) -> Result<u32> {
    let header = MessageHeader::new(M::TYPE, sequence.next());
    header.pack(out)?;
    message.pack_payload(out)?;
    Ok(header.sequence)
}

/// Pack one message into a new, exactly sized buffer
pub fn encode_message<M: Message>(message: &M, sequence: &IdGenerator) -> Result<Bytes> {
    let mut out = BitStream::with_capacity(MessageHeader::SIZE + message.required_memory());
    pack_message(message, sequence, &mut out)?;
    Ok(out.into_bytes())
}

/// Decode the payload of `M` after its header has been read
///
/// # Errors
/// `PayloadTooShort` before any field is read if fewer than
/// `M::minimum_payload_length()` bytes remain.
pub fn decode_payload<M: Message>(input: &mut BitStream<'_>) -> Result<M> {
    input.ensure_remaining(M::TYPE.name(), M::minimum_payload_length())?;
    M::unpack_payload(input)
}

/// Read a header and the payload of `M`
///
/// # Errors
/// `UnexpectedMessageType` if the header names another type
pub fn unpack_message<M: Message>(input: &mut BitStream<'_>) -> Result<(MessageHeader, M)> {
    let header = MessageHeader::unpack(input)?;
    if header.message_type != M::TYPE.as_u32() {
        return Err(NetError::UnexpectedMessageType {
            expected: M::TYPE.as_u32(),
            found: header.message_type,
        });
    }
    let message = decode_payload(input)?;
    Ok((header, message))
}
