//! # TCP Host
//!
//! Accepts TCP connections and moves frames between sockets and a session.
//!
//! # Architecture
//!
//! ```text
//! TcpListener ──accept──> connection task (one per socket)
//!                            │  reads frames  ──> HostEvent::Received
//!                            │  writes frames <── Outbound (ChannelTransport)
//! ```
//!
//! Each frame on the wire is `[length: u32 big-endian][packet]`, handled by
//! `LengthDelimitedCodec`. A packet may hold several session messages.
//!
//! Sessions never touch sockets. They receive [`HostEvent`]s from a channel
//! and send through the [`ChannelTransport`] returned by [`TcpHost::transport`],
//! which keeps session logic synchronous and testable.

use crate::transport::{ChannelTransport, Outbound};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use replica_core::{IdGenerator, NetError, PeerId, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Largest frame accepted from a remote
pub const MAX_FRAME_LENGTH: usize = 1 << 20;

/// What happened on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Connected(PeerId, SocketAddr),
    Received(PeerId, Bytes),
    Disconnected(PeerId),
}

/// Listening side of the transport
pub struct TcpHost {
    listener: TcpListener,
    transport: ChannelTransport,
    events: mpsc::UnboundedSender<HostEvent>,
    ids: Arc<IdGenerator>,
}

impl TcpHost {
    /// Bind a listener
    ///
    /// # Returns
    /// The host and the receiver of its connection events
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<(Self, mpsc::UnboundedReceiver<HostEvent>)> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        let (events, receiver) = mpsc::unbounded_channel();
        let host = Self {
            listener,
            transport: ChannelTransport::new(),
            events,
            ids: Arc::new(IdGenerator::new()),
        };
        Ok((host, receiver))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for sending to accepted connections
    pub fn transport(&self) -> ChannelTransport {
        self.transport.clone()
    }

    /// Accept connections until the event receiver is dropped
    pub async fn run(self) -> Result<()> {
        loop {
            let (socket, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Error accepting connection: {:?}", e);
                    continue;
                }
            };
            if self.events.is_closed() {
                break;
            }

            let peer = PeerId(self.ids.acquire());
            tracing::debug!("New connection {} from {}", peer, addr);
            spawn_connection(
                peer,
                addr,
                socket,
                self.transport.clone(),
                self.events.clone(),
                Some(self.ids.clone()),
            );
        }
        tracing::info!("Host accept loop ended");
        Ok(())
    }

    /// Run the accept loop on its own task
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}

/// Open an outgoing connection
///
/// The remote end is reported as [`PeerId`] 0 on the returned transport.
///
/// # Errors
/// Returns an error if the connection cannot be established
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
) -> Result<(PeerId, ChannelTransport, mpsc::UnboundedReceiver<HostEvent>)> {
    let socket = TcpStream::connect(addr).await?;
    let remote = socket.peer_addr()?;
    tracing::info!("Connected to {}", remote);

    let server = PeerId(0);
    let transport = ChannelTransport::new();
    let (events, receiver) = mpsc::unbounded_channel();
    spawn_connection(server, remote, socket, transport.clone(), events, None);
    Ok((server, transport, receiver))
}

fn spawn_connection(
    peer: PeerId,
    addr: SocketAddr,
    socket: TcpStream,
    transport: ChannelTransport,
    events: mpsc::UnboundedSender<HostEvent>,
    ids: Option<Arc<IdGenerator>>,
) {
    if let Err(e) = socket.set_nodelay(true) {
        tracing::debug!("Connection {} nodelay: {:?}", peer, e);
    }

    let (outbound, receiver) = mpsc::unbounded_channel();
    transport.register(peer, outbound);

    tokio::spawn(async move {
        // The session learns of the peer before any of its frames
        let _ = events.send(HostEvent::Connected(peer, addr));

        match run_connection(peer, socket, receiver, &events).await {
            Ok(()) => tracing::info!("Connection {} closed", peer),
            Err(e) => tracing::warn!("Connection {} failed: {}", peer, e),
        }

        transport.unregister(peer);
        let _ = events.send(HostEvent::Disconnected(peer));
        if let Some(ids) = ids {
            ids.release(peer.get());
        }
    });
}

async fn run_connection(
    peer: PeerId,
    socket: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<HostEvent>,
) -> Result<()> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    let mut framed = Framed::new(socket, codec);

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(bytes)) => {
                    tracing::trace!("Connection {} received {} bytes", peer, bytes.len());
                    if events.send(HostEvent::Received(peer, bytes.freeze())).is_err() {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(NetError::Io(e)),
                None => return Ok(()),
            },
            message = outbound.recv() => match message {
                Some(Outbound::Frame(bytes)) => SinkExt::<Bytes>::send(&mut framed, bytes).await?,
                Some(Outbound::Close) | None => {
                    // Frames queued before the close still go out
                    while let Ok(Outbound::Frame(bytes)) = outbound.try_recv() {
                        SinkExt::<Bytes>::feed(&mut framed, bytes).await?;
                    }
                    SinkExt::<Bytes>::flush(&mut framed).await?;
                    return Ok(());
                }
            },
        }
    }
}
