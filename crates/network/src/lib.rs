//! # Replica Networking Layer
//!
//! Replication sessions and the Tokio transport that carries them.
//!
//! ## Modules
//!
//! - [`stage`] - Connection stages (authentication, loading, active)
//! - [`handlers`] - Stage-aware message handler registry
//! - [`transport`] - Transport trait plus in-memory and channel backends
//! - [`peer`] - Per-connection state on the server
//! - [`world`] - Authoritative and mirrored entity collections
//! - [`server`] - Server session ([`GameServer`])
//! - [`client`] - Client session ([`GameClient`])
//! - [`host`] - TCP listener and connection tasks

pub mod client;
pub mod handlers;
pub mod host;
pub mod peer;
pub mod server;
pub mod stage;
pub mod transport;
pub mod world;

// Re-export commonly used items
pub use client::{ClientEvent, GameClient};
pub use handlers::{Handler, HandlerRegistry};
pub use host::{connect, HostEvent, TcpHost};
pub use peer::Peer;
pub use server::{GameServer, ServerEvent, ServerOptions};
pub use stage::ConnectionStage;
pub use transport::{ChannelTransport, MemoryTransport, Outbound, SentPacket, Transport};
pub use world::{ReplicatedWorld, ServerWorld};
