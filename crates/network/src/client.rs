//! # Game Client Session
//!
//! The client side of a replication session: sends the handshake, builds a
//! [`ReplicatedWorld`] from scopes, and keeps it current from sim commits.
//!
//! Unlike the server, the client decodes every message as soon as a packet
//! arrives. Any protocol error ends the session.

use crate::handlers::HandlerRegistry;
use crate::stage::ConnectionStage;
use crate::transport::Transport;
use crate::world::ReplicatedWorld;
use replica_core::{IdGenerator, NetError, PeerId, Result};
use replica_protocol::{
    decode_payload, encode_message, BitStream, Disconnect, EntityTypeRegistry, ExecuteRpc,
    Handshake, Message, MessageHeader, MessageType, Scope, SimCommit, Unscope,
};

/// Session events for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server accepted the handshake
    Authenticated(Handshake),
    /// Entities arrived in a scope
    Scoped(usize),
    /// Entities left scope and were removed
    Unscoped(usize),
    /// A sim commit was applied
    Committed { tick: u32, entities: usize },
    /// The first commit arrived; the world is loaded
    Active,
    /// The session ended
    Disconnected(String),
}

/// Client side of the replication session
pub struct GameClient<T: Transport> {
    transport: T,
    /// Transport handle of the server
    server: PeerId,
    local: Handshake,
    stage: ConnectionStage,
    connected: bool,
    handlers: HandlerRegistry<Self>,
    entity_types: EntityTypeRegistry,
    world: ReplicatedWorld,
    sequence: IdGenerator,
    remote: Option<Handshake>,
    last_tick: Option<u32>,
    disconnect_reason: Option<String>,
    events: Vec<ClientEvent>,
}

impl<T: Transport> GameClient<T> {
    /// Create a client talking to `server` through `transport`
    ///
    /// # Arguments
    /// * `entity_types` - Constructors for every entity type the server may scope
    pub fn new(transport: T, server: PeerId, entity_types: EntityTypeRegistry) -> Self {
        let mut handlers = HandlerRegistry::<Self>::new();
        handlers.register_unstaged(MessageType::Disconnect, Self::handle_disconnect);
        handlers.register(ConnectionStage::Authentication, MessageType::Handshake, Self::handle_handshake);
        for stage in [ConnectionStage::Loading, ConnectionStage::Active] {
            handlers.register(stage, MessageType::Scope, Self::handle_scope);
            handlers.register(stage, MessageType::SimCommit, Self::handle_sim_commit);
            handlers.register(stage, MessageType::Unscope, Self::handle_unscope);
        }

        Self {
            transport,
            server,
            local: Handshake::local(),
            stage: ConnectionStage::Authentication,
            connected: false,
            handlers,
            entity_types,
            world: ReplicatedWorld::new(),
            sequence: IdGenerator::new(),
            remote: None,
            last_tick: None,
            disconnect_reason: None,
            events: Vec::new(),
        }
    }

    /// Override the handshake announced to the server
    pub fn with_handshake(mut self, local: Handshake) -> Self {
        self.local = local;
        self
    }

    pub fn stage(&self) -> ConnectionStage {
        self.stage
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn world(&self) -> &ReplicatedWorld {
        &self.world
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Handshake received from the server
    pub fn server_handshake(&self) -> Option<&Handshake> {
        self.remote.as_ref()
    }

    /// Tick of the last applied sim commit
    pub fn last_tick(&self) -> Option<u32> {
        self.last_tick
    }

    /// Why the session ended, once it has
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Take the events queued since the last call
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// The transport connected; open the session with our handshake
    pub fn on_connected(&mut self) -> Result<()> {
        tracing::info!("Established connection to server");
        self.connected = true;
        self.stage = ConnectionStage::Authentication;
        self.disconnect_reason = None;
        let local = self.local;
        self.send(&local)
    }

    /// The transport connection closed underneath the session
    pub fn on_disconnected(&mut self) {
        if self.connected {
            self.finish("Connection closed".into());
        }
    }

    /// Decode and handle every message in a packet from the server
    ///
    /// # Errors
    /// The protocol error that ended the session. The server has already been
    /// sent a `Disconnect` and the connection is closed.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<()> {
        let mut stream = BitStream::from_received(bytes);
        while self.connected && !stream.is_empty() {
            if let Err(e) = self.process_message(&mut stream) {
                tracing::warn!("Protocol error from server: {}", e);
                self.terminate(&e.to_string());
                return Err(e);
            }
        }
        Ok(())
    }

    /// Ask the server to run a remote procedure
    pub fn execute_rpc(&mut self, name: &str) -> Result<()> {
        if self.stage != ConnectionStage::Active {
            return Err(NetError::OutOfStageMessage {
                message_type: MessageType::ExecuteRpc.as_u32(),
                stage: self.stage.name(),
            });
        }
        self.send(&ExecuteRpc::new(name))
    }

    /// Leave the session
    pub fn disconnect(&mut self, reason: &str) {
        if self.connected {
            tracing::info!("Disconnecting: {}", reason);
            self.terminate(reason);
        }
    }

    fn send<M: Message>(&mut self, message: &M) -> Result<()> {
        let bytes = encode_message(message, &self.sequence)?;
        self.transport.send(self.server, bytes, true)
    }

    fn process_message(&mut self, stream: &mut BitStream<'_>) -> Result<()> {
        let header = MessageHeader::unpack(stream)?;
        tracing::debug!(
            "Server message type {} seq {} in stage {}",
            header.message_type,
            header.sequence,
            self.stage
        );
        let handler = self.handlers.lookup(self.stage, header.message_type)?;
        let server = self.server;
        handler(self, server, &header, stream)
    }

    /// Tell the server why we are leaving, then close
    fn terminate(&mut self, reason: &str) {
        if let Err(e) = self.send(&Disconnect::new(reason)) {
            tracing::debug!("Server did not receive disconnect: {}", e);
        }
        self.transport.disconnect(self.server);
        self.finish(reason.to_string());
    }

    fn finish(&mut self, reason: String) {
        self.connected = false;
        self.world.clear();
        self.events.push(ClientEvent::Disconnected(reason.clone()));
        self.disconnect_reason = Some(reason);
    }

    fn advance(&mut self, next: ConnectionStage) {
        if self.stage.can_advance_to(next) {
            tracing::debug!("Client stage {} -> {}", self.stage, next);
            self.stage = next;
        }
    }

    fn handle_handshake(
        client: &mut Self,
        _server: PeerId,
        _header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let remote: Handshake = decode_payload(payload)?;
        tracing::info!("Server version is {} (protocol {})", remote.version, remote.protocol);
        tracing::info!("Passed initial authentication");

        client.remote = Some(remote);
        client.advance(ConnectionStage::Loading);
        client.events.push(ClientEvent::Authenticated(remote));
        Ok(())
    }

    fn handle_scope(
        client: &mut Self,
        _server: PeerId,
        _header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let entities = Scope::unpack(payload, &client.entity_types)?;
        let count = entities.len();
        for entity in entities {
            client.world.insert(entity);
        }
        tracing::debug!("Scoped {} entities ({} total)", count, client.world.len());
        client.events.push(ClientEvent::Scoped(count));
        Ok(())
    }

    fn handle_unscope(
        client: &mut Self,
        _server: PeerId,
        _header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let unscope: Unscope = decode_payload(payload)?;
        let removed = unscope
            .net_ids()
            .iter()
            .filter(|net_id| client.world.remove(**net_id).is_some())
            .count();
        tracing::debug!("Unscoped {} entities ({} total)", removed, client.world.len());
        client.events.push(ClientEvent::Unscoped(removed));
        Ok(())
    }

    fn handle_sim_commit(
        client: &mut Self,
        _server: PeerId,
        _header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let commit: SimCommit = decode_payload(payload)?;
        client.world.apply_commit(&commit)?;
        client.last_tick = Some(commit.tick);
        client.events.push(ClientEvent::Committed {
            tick: commit.tick,
            entities: commit.deltas().len(),
        });

        if client.stage == ConnectionStage::Loading {
            client.advance(ConnectionStage::Active);
            tracing::info!("World loaded, {} entities", client.world.len());
            client.events.push(ClientEvent::Active);
        }
        Ok(())
    }

    fn handle_disconnect(
        client: &mut Self,
        _server: PeerId,
        _header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let message: Disconnect = decode_payload(payload)?;
        tracing::info!("Disconnected by server: {}", message.reason);
        client.transport.disconnect(client.server);
        client.finish(message.reason);
        Ok(())
    }
}
