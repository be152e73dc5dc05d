//! # Game Server Session
//!
//! Owns the connected peers, dispatches their messages by connection stage,
//! and replicates the [`ServerWorld`] to them every tick.
//!
//! # Lifecycle of a peer
//!
//! ```text
//! 1. on_connected      -> Authentication (pending)
//! 2. Handshake         -> version check, reply, Loading
//! 3. initial Scope     -> every always-scoped or static entity
//! 4. SimCommit         -> closes the load, Active
//! 5. update()          -> scope changes, then one SimCommit of deltas per tick
//! ```
//!
//! # Per-peer scope
//!
//! Each peer tracks the net ids it holds. Every update sends a `Scope` for
//! in-scope entities the peer lacks and an `Unscope` for entities it holds
//! that were despawned or left scope. Its `SimCommit` only carries deltas of
//! entities it holds.
//!
//! Any protocol error drops the peer: it gets a `Disconnect` carrying the
//! reason, its connection is closed, and a [`ServerEvent::ClientDropped`] is
//! queued.
//!
//! # Input limits
//!
//! Packets are queued per peer by [`GameServer::receive`] and decoded by
//! [`GameServer::update`], at most `messages_per_tick` messages per peer per
//! update. A packet that is not fully decoded keeps its tail at the front of
//! the queue. More than `max_queued_streams` queued packets drops the peer.

use crate::handlers::HandlerRegistry;
use crate::peer::Peer;
use crate::stage::ConnectionStage;
use crate::transport::Transport;
use crate::world::ServerWorld;
use bytes::Bytes;
use replica_config::{Settings, VersionPolicy};
use replica_core::{EngineVersion, IdGenerator, NetError, NetId, PeerId, Result};
use replica_protocol::{
    decode_payload, encode_message, BitStream, Disconnect, ExecuteRpc, Handshake, Message,
    MessageHeader, MessageType, SimCommit, Unscope,
};
use std::collections::BTreeMap;

/// Reason sent to a peer whose input queue overflowed
pub const QUEUE_OVERFLOW_REASON: &str = "Too much queued data.";

/// Reason sent to a peer that connects while the server is full
pub const SERVER_FULL_REASON: &str = "Server is full.";

/// Session events for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A transport connection opened
    ClientConnected(PeerId),

    /// The peer finished loading and receives per-tick updates
    ClientActive(PeerId),

    /// The peer left, either with a `Disconnect` or by closing the connection
    ClientDisconnected { peer: PeerId, reason: String },

    /// The peer was dropped for a protocol error or a limit
    ClientDropped { peer: PeerId, reason: String },

    /// The peer asked to run a remote procedure
    RemoteCall { peer: PeerId, name: String },
}

/// Tunables of a [`GameServer`]
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    /// Handshake sent to every client
    pub local: Handshake,
    pub version_policy: VersionPolicy,
    pub maximum_client_count: usize,
    /// 0 for no limit
    pub messages_per_tick: usize,
    /// 0 for no limit
    pub max_queued_streams: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ServerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            local: Handshake::new(EngineVersion::CURRENT, settings.protocol_version),
            version_policy: settings.version_policy,
            maximum_client_count: settings.maximum_client_count,
            messages_per_tick: settings.messages_per_tick,
            max_queued_streams: settings.max_queued_streams,
        }
    }
}

/// Server side of the replication session
pub struct GameServer<T: Transport> {
    options: ServerOptions,
    transport: T,
    handlers: HandlerRegistry<Self>,
    peers: BTreeMap<PeerId, Peer>,
    world: ServerWorld,
    sequence: IdGenerator,
    tick: u32,
    events: Vec<ServerEvent>,
}

impl<T: Transport> GameServer<T> {
    /// Create a server sending through `transport`
    pub fn new(options: ServerOptions, transport: T) -> Self {
        let mut handlers = HandlerRegistry::<Self>::new();
        handlers.register_unstaged(MessageType::Disconnect, Self::handle_disconnect);
        handlers.register(ConnectionStage::Authentication, MessageType::Handshake, Self::handle_handshake);
        handlers.register(ConnectionStage::Active, MessageType::ExecuteRpc, Self::handle_execute_rpc);

        Self {
            options,
            transport,
            handlers,
            peers: BTreeMap::new(),
            world: ServerWorld::new(),
            sequence: IdGenerator::new(),
            tick: 0,
            events: Vec::new(),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn world(&self) -> &ServerWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut ServerWorld {
        &mut self.world
    }

    /// Current simulation tick
    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn peer(&self, peer: PeerId) -> Option<&Peer> {
        self.peers.get(&peer)
    }

    /// Ids of every connected peer
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    pub fn stage_of(&self, peer: PeerId) -> Option<ConnectionStage> {
        self.peers.get(&peer).map(Peer::stage)
    }

    /// Peers still in authentication
    pub fn pending_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_pending()).count()
    }

    /// Peers past authentication
    pub fn connected_count(&self) -> usize {
        self.peers.len() - self.pending_count()
    }

    /// Take the events queued since the last call
    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    /// A transport connection opened
    ///
    /// # Returns
    /// `false` if the server is full; the connection is refused and closed
    pub fn on_connected(&mut self, peer: PeerId) -> bool {
        if self.peers.len() >= self.options.maximum_client_count {
            tracing::warn!("Connection {} rejected: server full ({} clients)", peer.get(), self.peers.len());
            self.refuse(peer, SERVER_FULL_REASON);
            return false;
        }

        tracing::info!("Connection {} opened", peer.get());
        self.peers.insert(peer, Peer::new(peer));
        self.events.push(ServerEvent::ClientConnected(peer));
        true
    }

    /// The transport connection closed underneath the session
    pub fn on_disconnected(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_some() {
            tracing::info!("Connection {} closed", peer.get());
            self.events.push(ServerEvent::ClientDisconnected {
                peer,
                reason: "Connection closed".into(),
            });
        }
    }

    /// Queue a packet received from `peer` for the next update
    pub fn receive(&mut self, peer: PeerId, bytes: Bytes) {
        let limit = self.options.max_queued_streams;
        let Some(state) = self.peers.get_mut(&peer) else {
            tracing::debug!("Dropping {} bytes from unknown connection {}", bytes.len(), peer.get());
            return;
        };

        state.enqueue(bytes);
        if limit != 0 && state.queued_len() > limit {
            self.drop_peer(peer, QUEUE_OVERFLOW_REASON);
        }
    }

    /// Run one server tick
    ///
    /// Decodes queued input, brings every active peer's scope up to date, then
    /// sends each of them the deltas of the dirty entities it holds.
    pub fn update(&mut self) -> Result<()> {
        let ids: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in ids {
            self.process_input(peer);
        }

        self.tick = self.tick.wrapping_add(1);
        self.sync_scopes()?;

        let commit = self.world.collect_deltas(self.tick);
        if commit.is_empty() {
            return Ok(());
        }

        let mut sent = 0;
        for peer in self.active_peers() {
            let Some(state) = self.peers.get(&peer) else {
                continue;
            };
            let mut visible = SimCommit::new(self.tick);
            for (net_id, snapshot) in commit.deltas() {
                if state.is_scoped(*net_id) {
                    visible.push(*net_id, snapshot.clone());
                }
            }
            if visible.is_empty() {
                continue;
            }

            let bytes = encode_message(&visible, &self.sequence)?;
            if self.deliver(peer, bytes) {
                sent += 1;
            }
        }
        tracing::debug!("Tick {}: {} entity deltas to {} clients", self.tick, commit.deltas().len(), sent);
        Ok(())
    }

    /// Send `message` to every active peer
    ///
    /// # Returns
    /// The number of peers it was sent to. Peers whose send failed are dropped.
    pub fn broadcast<M: Message>(&mut self, message: &M) -> Result<usize> {
        let bytes = encode_message(message, &self.sequence)?;
        let mut sent = 0;
        for peer in self.active_peers() {
            if self.deliver(peer, bytes.clone()) {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Send `message` to one peer
    pub fn send<M: Message>(&mut self, peer: PeerId, message: &M) -> Result<()> {
        let bytes = encode_message(message, &self.sequence)?;
        self.transport.send(peer, bytes, true)
    }

    /// Disconnect a peer with a reason
    pub fn kick(&mut self, peer: PeerId, reason: &str) -> Result<()> {
        if !self.peers.contains_key(&peer) {
            return Err(NetError::UnknownPeer(peer.get()));
        }
        tracing::info!("Kicking connection {}: {}", peer.get(), reason);
        self.close(peer, reason);
        self.events.push(ServerEvent::ClientDisconnected {
            peer,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn active_peers(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.stage() == ConnectionStage::Active)
            .map(Peer::id)
            .collect()
    }

    /// Send an encoded packet, dropping the peer if the transport refuses it
    fn deliver(&mut self, peer: PeerId, bytes: Bytes) -> bool {
        match self.transport.send(peer, bytes, true) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to send to connection {}: {}", peer.get(), e);
                self.drop_peer(peer, &e.to_string());
                false
            }
        }
    }

    /// Unscope despawned or out-of-scope entities and scope new ones, per active peer
    fn sync_scopes(&mut self) -> Result<()> {
        let despawned = self.world.take_despawned();
        let in_scope = self.world.scoped_ids();

        for peer in self.active_peers() {
            let Some(state) = self.peers.get(&peer) else {
                continue;
            };
            let leaving: Vec<NetId> = state
                .scoped()
                .iter()
                .copied()
                .filter(|net_id| despawned.contains(net_id) || !in_scope.contains(net_id))
                .collect();
            let entering: Vec<NetId> = in_scope
                .iter()
                .copied()
                .filter(|net_id| !state.is_scoped(*net_id) || leaving.contains(net_id))
                .collect();

            if !leaving.is_empty() {
                let bytes = encode_message(&Unscope::new(leaving.iter().copied()), &self.sequence)?;
                if !self.deliver(peer, bytes) {
                    continue;
                }
            }
            if !entering.is_empty() {
                let bytes = self.world.scope_of(&entering).encode(&self.sequence)?;
                if !self.deliver(peer, bytes) {
                    continue;
                }
            }

            if let Some(state) = self.peers.get_mut(&peer) {
                state.scope_out(&leaving);
                state.scope_in(entering.iter().copied());
            }
            if !leaving.is_empty() || !entering.is_empty() {
                tracing::debug!(
                    "Connection {} scope: {} in, {} out",
                    peer.get(),
                    entering.len(),
                    leaving.len()
                );
            }
        }
        Ok(())
    }

    /// Decode up to `messages_per_tick` messages queued for `peer`
    fn process_input(&mut self, peer: PeerId) {
        let mut budget = match self.options.messages_per_tick {
            0 => usize::MAX,
            limit => limit,
        };

        while budget > 0 {
            let Some(packet) = self.peers.get_mut(&peer).and_then(Peer::next_queued) else {
                return;
            };

            let mut stream = BitStream::from_received(&packet[..]);
            while budget > 0 && !stream.is_empty() {
                budget -= 1;
                if let Err(e) = self.process_message(peer, &mut stream) {
                    tracing::warn!("Connection {} protocol error: {}", peer.get(), e);
                    self.drop_peer(peer, &e.to_string());
                    return;
                }
                if !self.peers.contains_key(&peer) {
                    // Left during its own message
                    return;
                }
            }

            if !stream.is_empty() {
                let tail = packet.slice(stream.position()..);
                if let Some(state) = self.peers.get_mut(&peer) {
                    state.requeue_front(tail);
                }
            }
        }
    }

    fn process_message(&mut self, peer: PeerId, stream: &mut BitStream<'_>) -> Result<()> {
        let header = MessageHeader::unpack(stream)?;
        let stage = self.stage_of(peer).ok_or(NetError::UnknownPeer(peer.get()))?;
        tracing::debug!(
            "Connection {} message type {} seq {} in stage {}",
            peer.get(),
            header.message_type,
            header.sequence,
            stage
        );

        let handler = self.handlers.lookup(stage, header.message_type)?;
        handler(self, peer, &header, stream)
    }

    fn advance(&mut self, peer: PeerId, stage: ConnectionStage) -> Result<()> {
        let state = self.peers.get_mut(&peer).ok_or(NetError::UnknownPeer(peer.get()))?;
        state.advance(stage);
        Ok(())
    }

    /// Drop a peer after a protocol error or a limit
    fn drop_peer(&mut self, peer: PeerId, reason: &str) {
        if !self.peers.contains_key(&peer) {
            return;
        }
        tracing::warn!("Dropping connection {}: {}", peer.get(), reason);
        self.close(peer, reason);
        self.events.push(ServerEvent::ClientDropped {
            peer,
            reason: reason.to_string(),
        });
    }

    /// Send a `Disconnect`, close the transport connection and forget the peer
    fn close(&mut self, peer: PeerId, reason: &str) {
        self.refuse(peer, reason);
        self.peers.remove(&peer);
    }

    fn refuse(&mut self, peer: PeerId, reason: &str) {
        if let Err(e) = self.send(peer, &Disconnect::new(reason)) {
            tracing::debug!("Connection {} did not receive disconnect: {}", peer.get(), e);
        }
        self.transport.disconnect(peer);
    }

    fn handle_handshake(
        server: &mut Self,
        peer: PeerId,
        _header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let remote: Handshake = decode_payload(payload)?;
        let local = server.options.local;

        if !server
            .options
            .version_policy
            .accepts((local.version, local.protocol), (remote.version, remote.protocol))
        {
            return Err(NetError::VersionMismatch {
                local: format!("{} (protocol {})", local.version, local.protocol),
                remote: format!("{} (protocol {})", remote.version, remote.protocol),
            });
        }

        tracing::info!(
            "Connection {} passed authentication (version {}, protocol {})",
            peer.get(),
            remote.version,
            remote.protocol
        );
        if let Some(state) = server.peers.get_mut(&peer) {
            state.set_remote_handshake(remote);
        }

        server.send(peer, &local)?;
        server.advance(peer, ConnectionStage::Loading)?;

        let scope = server.world.initial_scope();
        let entity_count = scope.len();
        let bytes = scope.encode(&server.sequence)?;
        server.transport.send(peer, bytes, true)?;
        let scoped = server.world.scoped_ids();
        if let Some(state) = server.peers.get_mut(&peer) {
            state.scope_in(scoped);
        }
        tracing::debug!("Connection {} initial scope: {} entities", peer.get(), entity_count);

        server.send(peer, &SimCommit::new(server.tick))?;
        server.advance(peer, ConnectionStage::Active)?;
        server.events.push(ServerEvent::ClientActive(peer));
        Ok(())
    }

    fn handle_disconnect(
        server: &mut Self,
        peer: PeerId,
        _header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let message: Disconnect = decode_payload(payload)?;
        tracing::info!("Connection {} disconnected: {}", peer.get(), message.reason);

        server.peers.remove(&peer);
        server.transport.disconnect(peer);
        server.events.push(ServerEvent::ClientDisconnected {
            peer,
            reason: message.reason,
        });
        Ok(())
    }

    fn handle_execute_rpc(
        server: &mut Self,
        peer: PeerId,
        _header: &MessageHeader,
        payload: &mut BitStream<'_>,
    ) -> Result<()> {
        let rpc: ExecuteRpc = decode_payload(payload)?;
        tracing::debug!("Connection {} remote call: {}", peer.get(), rpc.name);
        server.events.push(ServerEvent::RemoteCall { peer, name: rpc.name });
        Ok(())
    }
}
