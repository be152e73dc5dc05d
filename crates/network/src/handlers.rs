//! # Message Handler System
//!
//! Routes decoded message headers to handler functions by connection stage.
//!
//! # Architecture
//!
//! The registry keeps one table of "unstaged" handlers that apply in every
//! stage, plus one table per [`ConnectionStage`]. Lookup tries the unstaged
//! table first, then the table for the peer's current stage.
//!
//! Handlers are plain function pointers over a session type `C`, so a handler
//! is copied out of the registry before it runs and may freely mutate the
//! session that owns the registry.
//!
//! # Example
//!
//! ```
//! use replica_core::{PeerId, Result};
//! use replica_network::{ConnectionStage, HandlerRegistry};
//! use replica_protocol::{BitStream, MessageHeader, MessageType};
//!
//! struct Session { handshakes: u32 }
//!
//! fn on_handshake(s: &mut Session, _: PeerId, _: &MessageHeader, _: &mut BitStream<'_>) -> Result<()> {
//!     s.handshakes += 1;
//!     Ok(())
//! }
//!
//! let mut registry = HandlerRegistry::<Session>::new();
//! registry.register(ConnectionStage::Authentication, MessageType::Handshake, on_handshake);
//! assert!(registry.has_handler(ConnectionStage::Authentication, MessageType::Handshake));
//! assert!(!registry.has_handler(ConnectionStage::Active, MessageType::Handshake));
//! ```

use crate::stage::ConnectionStage;
use replica_core::{NetError, PeerId, Result};
use replica_protocol::{BitStream, MessageHeader, MessageType};
use std::collections::HashMap;

/// Handler for one message kind
///
/// Receives the session, the sending peer, the decoded header, and the stream
/// positioned at the start of the payload. It must consume exactly its payload.
pub type Handler<C> = fn(&mut C, PeerId, &MessageHeader, &mut BitStream<'_>) -> Result<()>;

/// Registry of message handlers keyed by stage and message type
pub struct HandlerRegistry<C> {
    unstaged: HashMap<u32, Handler<C>>,
    staged: HashMap<(ConnectionStage, u32), Handler<C>>,
}

impl<C> HandlerRegistry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            unstaged: HashMap::new(),
            staged: HashMap::new(),
        }
    }

    /// Register a handler for `message_type` while a peer is in `stage`
    pub fn register(&mut self, stage: ConnectionStage, message_type: MessageType, handler: Handler<C>) {
        tracing::debug!("Registered {} handler for stage {}", message_type.name(), stage);
        self.staged.insert((stage, message_type.as_u32()), handler);
    }

    /// Register a handler valid in every stage
    pub fn register_unstaged(&mut self, message_type: MessageType, handler: Handler<C>) {
        tracing::debug!("Registered unstaged {} handler", message_type.name());
        self.unstaged.insert(message_type.as_u32(), handler);
    }

    /// Find the handler for a raw message type in `stage`
    ///
    /// # Errors
    /// - `OutOfStageMessage` - the type is known but not accepted in `stage`
    /// - `UnknownMessageType` - the type is not a known message kind
    pub fn lookup(&self, stage: ConnectionStage, message_type: u32) -> Result<Handler<C>> {
        if let Some(handler) = self.unstaged.get(&message_type) {
            return Ok(*handler);
        }
        if let Some(handler) = self.staged.get(&(stage, message_type)) {
            return Ok(*handler);
        }

        match MessageType::from_u32(message_type) {
            Some(_) => Err(NetError::OutOfStageMessage {
                message_type,
                stage: stage.name(),
            }),
            None => Err(NetError::UnknownMessageType(message_type)),
        }
    }

    /// Look up and run the handler for `header`
    pub fn dispatch(
        &self,
        session: &mut C,
        stage: ConnectionStage,
        peer: PeerId,
        header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let handler = self.lookup(stage, header.message_type)?;
        handler(session, peer, header, payload)
    }

    /// Check if a handler applies to `message_type` in `stage`
    pub fn has_handler(&self, stage: ConnectionStage, message_type: MessageType) -> bool {
        self.lookup(stage, message_type.as_u32()).is_ok()
    }

    /// Get the number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.unstaged.len() + self.staged.len()
    }
}

impl<C> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        calls: Vec<(&'static str, PeerId)>,
    }

    fn on_handshake(c: &mut Counter, peer: PeerId, _: &MessageHeader, _: &mut BitStream<'_>) -> Result<()> {
        c.calls.push(("handshake", peer));
        Ok(())
    }

    fn on_disconnect(c: &mut Counter, peer: PeerId, _: &MessageHeader, _: &mut BitStream<'_>) -> Result<()> {
        c.calls.push(("disconnect", peer));
        Ok(())
    }

    fn registry() -> HandlerRegistry<Counter> {
        let mut registry = HandlerRegistry::new();
        registry.register(ConnectionStage::Authentication, MessageType::Handshake, on_handshake);
        registry.register_unstaged(MessageType::Disconnect, on_disconnect);
        registry
    }

    #[test]
    fn test_registry_register() {
        let registry = registry();
        assert_eq!(registry.handler_count(), 2);
        assert!(registry.has_handler(ConnectionStage::Authentication, MessageType::Handshake));
        assert!(!registry.has_handler(ConnectionStage::Loading, MessageType::Handshake));
        for stage in ConnectionStage::ALL {
            assert!(registry.has_handler(stage, MessageType::Disconnect));
        }
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = registry();
        let mut counter = Counter::default();
        let mut payload = BitStream::new();

        let header = MessageHeader::new(MessageType::Handshake, 0);
        registry
            .dispatch(&mut counter, ConnectionStage::Authentication, PeerId(3), &header, &mut payload)
            .unwrap();
        let header = MessageHeader::new(MessageType::Disconnect, 1);
        registry
            .dispatch(&mut counter, ConnectionStage::Active, PeerId(3), &header, &mut payload)
            .unwrap();

        assert_eq!(counter.calls, vec![("handshake", PeerId(3)), ("disconnect", PeerId(3))]);
    }

    #[test]
    fn test_out_of_stage_and_unknown() {
        let registry = registry();
        assert!(matches!(
            registry.lookup(ConnectionStage::Active, MessageType::Handshake.as_u32()),
            Err(NetError::OutOfStageMessage { message_type: 1, stage: "active" })
        ));
        assert!(matches!(
            registry.lookup(ConnectionStage::Authentication, MessageType::Scope.as_u32()),
            Err(NetError::OutOfStageMessage { message_type: 3, .. })
        ));
        assert!(matches!(
            registry.lookup(ConnectionStage::Active, 77),
            Err(NetError::UnknownMessageType(77))
        ));
    }
}
