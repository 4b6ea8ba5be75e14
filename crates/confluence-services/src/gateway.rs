//! Player gateway: the single downstream consumer.
//!
//! Binds a listener, accepts exactly one connection, answers with a bare
//! `HTTP/1.1 200 OK` so HTTP-speaking players start reading, and hands the
//! socket to playout. Everything after the handshake is raw stream payload.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use confluence_core::Chunk;

/// Sent once, before any payload.
pub const HANDSHAKE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid listen address {0:?}")]
    InvalidAddr(String),
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("handshake with player {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}

pub struct PlayerGateway {
    listener: TcpListener,
}

impl PlayerGateway {
    /// Bind `addr:port` with SO_REUSEADDR. Must be called inside a runtime.
    pub fn bind(addr: &str, port: u16) -> Result<Self, GatewayError> {
        let ip = addr
            .parse()
            .map_err(|_| GatewayError::InvalidAddr(addr.to_string()))?;
        Self::bind_addr(SocketAddr::new(ip, port))
    }

    pub fn bind_addr(addr: SocketAddr) -> Result<Self, GatewayError> {
        let listen = |addr: SocketAddr| -> io::Result<TcpListener> {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            socket.set_reuse_address(true)?;
            socket.set_nonblocking(true)?;
            socket.bind(&addr.into())?;
            // One consumer; no need for a deep backlog.
            socket.listen(1)?;
            TcpListener::from_std(socket.into())
        };
        let listener = listen(addr).map_err(|source| GatewayError::Listen { addr, source })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept the player and send the handshake. Consumes the gateway: no
    /// further connections are accepted.
    pub async fn wait_for_consumer(self) -> Result<DownstreamConnection, GatewayError> {
        let local = self.listener.local_addr().ok();
        tracing::info!(addr = ?local, "waiting for the player");

        let (mut stream, peer) = self.listener.accept().await.map_err(GatewayError::Accept)?;
        tracing::info!(player = %peer, "player connected");

        stream.set_nodelay(true).ok();
        stream
            .write_all(HANDSHAKE)
            .await
            .map_err(|source| GatewayError::Handshake { peer, source })?;

        Ok(DownstreamConnection { stream, peer })
    }
}

/// The accepted player socket. Written only by playout.
pub struct DownstreamConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl DownstreamConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Write the whole chunk before returning.
    pub async fn write_chunk(&mut self, chunk: &Chunk) -> io::Result<()> {
        self.stream.write_all(chunk.as_bytes()).await
    }
}
