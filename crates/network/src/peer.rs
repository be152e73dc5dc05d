//! Per-connection session state on the server

use crate::stage::ConnectionStage;
use bytes::Bytes;
use replica_core::{NetId, PeerId};
use replica_protocol::Handshake;
use std::collections::{BTreeSet, VecDeque};
use std::time::Instant;

/// A connected remote peer
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    stage: ConnectionStage,
    /// Received packets not yet fully decoded, oldest first
    queued: VecDeque<Bytes>,
    /// Handshake the peer sent, once accepted
    remote: Option<Handshake>,
    /// Entities the peer holds a copy of
    scoped: BTreeSet<NetId>,
    connected_at: Instant,
}

impl Peer {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            stage: ConnectionStage::Authentication,
            queued: VecDeque::new(),
            remote: None,
            scoped: BTreeSet::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn stage(&self) -> ConnectionStage {
        self.stage
    }

    /// Move to `next`; returns false (and stays put) for a backwards or repeated move
    pub fn advance(&mut self, next: ConnectionStage) -> bool {
        if !self.stage.can_advance_to(next) {
            return false;
        }
        tracing::debug!("Connection {} stage {} -> {}", self.id.get(), self.stage, next);
        self.stage = next;
        true
    }

    /// Still waiting for an accepted handshake
    pub fn is_pending(&self) -> bool {
        self.stage == ConnectionStage::Authentication
    }

    pub fn remote_handshake(&self) -> Option<&Handshake> {
        self.remote.as_ref()
    }

    pub(crate) fn set_remote_handshake(&mut self, handshake: Handshake) {
        self.remote = Some(handshake);
    }

    /// Net ids of the entities replicated to this peer
    pub fn scoped(&self) -> &BTreeSet<NetId> {
        &self.scoped
    }

    pub fn is_scoped(&self, net_id: NetId) -> bool {
        self.scoped.contains(&net_id)
    }

    pub(crate) fn scope_in(&mut self, net_ids: impl IntoIterator<Item = NetId>) {
        self.scoped.extend(net_ids);
    }

    pub(crate) fn scope_out(&mut self, net_ids: &[NetId]) {
        for net_id in net_ids {
            self.scoped.remove(net_id);
        }
    }

    pub fn connected_for(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub(crate) fn enqueue(&mut self, bytes: Bytes) {
        self.queued.push_back(bytes);
    }

    pub(crate) fn next_queued(&mut self) -> Option<Bytes> {
        self.queued.pop_front()
    }

    /// Put back the undecoded tail of a packet so it is processed first next time
    pub(crate) fn requeue_front(&mut self, bytes: Bytes) {
        self.queued.push_front(bytes);
    }
}
