//! Transport seam between the sessions and the wire
//!
//! Sessions are synchronous and never await. They hand finished packets to a
//! [`Transport`], which either records them ([`MemoryTransport`], for tests and
//! loopback) or pushes them into per-peer channels drained by connection tasks
//! ([`ChannelTransport`], used by the TCP host).

use bytes::Bytes;
use dashmap::DashMap;
use replica_core::{NetError, PeerId, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Packet sink used by the sessions
pub trait Transport {
    /// Queue `bytes` for `peer`
    ///
    /// `reliable` requests ordered, guaranteed delivery; stream transports are
    /// always reliable and ignore it.
    fn send(&mut self, peer: PeerId, bytes: Bytes, reliable: bool) -> Result<()>;

    /// Close the connection to `peer`; unknown peers are ignored
    fn disconnect(&mut self, peer: PeerId);
}

/// One packet recorded by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub peer: PeerId,
    pub bytes: Bytes,
    pub reliable: bool,
}

/// Transport that records everything it is asked to do
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Vec<SentPacket>,
    closed: Vec<PeerId>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets sent so far, oldest first
    pub fn sent(&self) -> &[SentPacket] {
        &self.sent
    }

    /// Remove and return every recorded packet
    pub fn take_sent(&mut self) -> Vec<SentPacket> {
        std::mem::take(&mut self.sent)
    }

    /// Remove and return the packets addressed to `peer`
    pub fn take_sent_to(&mut self, peer: PeerId) -> Vec<Bytes> {
        let (mine, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.sent).into_iter().partition(|p| p.peer == peer);
        self.sent = rest;
        mine.into_iter().map(|p| p.bytes).collect()
    }

    /// Peers whose connection was closed
    pub fn closed(&self) -> &[PeerId] {
        &self.closed
    }

    pub fn is_closed(&self, peer: PeerId) -> bool {
        self.closed.contains(&peer)
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, peer: PeerId, bytes: Bytes, reliable: bool) -> Result<()> {
        self.sent.push(SentPacket {
            peer,
            bytes,
            reliable,
        });
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId) {
        if !self.closed.contains(&peer) {
            self.closed.push(peer);
        }
    }
}

/// Instruction for a connection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write one frame
    Frame(Bytes),
    /// Flush and close the connection
    Close,
}

/// Transport backed by one unbounded channel per connection
///
/// Cloning shares the peer table, so the host can register connections while
/// the session sends through its own handle.
#[derive(Debug, Clone, Default)]
pub struct ChannelTransport {
    peers: Arc<DashMap<PeerId, mpsc::UnboundedSender<Outbound>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the outbound channel of a new connection
    pub fn register(&self, peer: PeerId, sender: mpsc::UnboundedSender<Outbound>) {
        self.peers.insert(peer, sender);
    }

    /// Forget a connection without telling its task
    pub fn unregister(&self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, peer: PeerId, bytes: Bytes, _reliable: bool) -> Result<()> {
        let sender = self.peers.get(&peer).ok_or(NetError::UnknownPeer(peer.get()))?;
        sender
            .send(Outbound::Frame(bytes))
            .map_err(|_| NetError::Network(format!("Connection {} closed", peer.get())))
    }

    fn disconnect(&mut self, peer: PeerId) {
        if let Some((_, sender)) = self.peers.remove(&peer) {
            // The task may already be gone
            let _ = sender.send(Outbound::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport_records() {
        let mut transport = MemoryTransport::new();
        transport.send(PeerId(1), Bytes::from_static(&[1, 2]), true).unwrap();
        transport.send(PeerId(2), Bytes::from_static(&[3]), false).unwrap();
        transport.disconnect(PeerId(2));
        transport.disconnect(PeerId(2));

        assert_eq!(transport.take_sent_to(PeerId(1)), vec![Bytes::from_static(&[1, 2])]);
        assert_eq!(transport.sent().len(), 1);
        assert!(!transport.sent()[0].reliable);
        assert_eq!(transport.closed(), &[PeerId(2)]);
    }

    #[tokio::test]
    async fn test_channel_transport_routes_frames() {
        let mut transport = ChannelTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.register(PeerId(5), tx);

        transport.send(PeerId(5), Bytes::from_static(b"frame"), true).unwrap();
        transport.disconnect(PeerId(5));

        assert_eq!(rx.recv().await, Some(Outbound::Frame(Bytes::from_static(b"frame"))));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
        assert!(!transport.contains(PeerId(5)));
        assert!(matches!(
            transport.send(PeerId(5), Bytes::from_static(b"late"), true),
            Err(NetError::UnknownPeer(5))
        ));
    }

    #[test]
    fn test_channel_transport_closed_receiver() {
        let mut transport = ChannelTransport::new();
        let (tx, rx) = mpsc::unbounded_channel();
        transport.register(PeerId(1), tx);
        drop(rx);
        assert!(matches!(transport.send(PeerId(1), Bytes::from_static(&[0]), true), Err(NetError::Network(_))));
    }
}
