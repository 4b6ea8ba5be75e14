//! Peer ingestor: one task per upstream peer.
//!
//! Connects, then reads the peer's stream in `CHUNK_SIZE` receive units into
//! the peer's buffer. Before alignment the buffer only grows; once the gate
//! is open every complete chunk is moved out of the buffer and offered to
//! the merge set.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use confluence_core::{PeerEndpoint, CHUNK_SIZE};

use crate::buffer::SharedBuffer;
use crate::gate::AlignmentGate;
use crate::merge::MergeSet;
use crate::peer::{record_receive, set_state, PeerState, PeerTable};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connect to {peer} timed out after {timeout:?}")]
    TimedOut { peer: PeerEndpoint, timeout: Duration },
    #[error("connect to {peer} failed: {source}")]
    Io {
        peer: PeerEndpoint,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("receive from {peer} failed: {source}")]
    Receive {
        peer: PeerEndpoint,
        #[source]
        source: io::Error,
    },
}

pub struct PeerIngestor {
    id: usize,
    endpoint: PeerEndpoint,
    buffer: SharedBuffer,
    merge: Arc<MergeSet>,
    gate: AlignmentGate,
    peers: PeerTable,
    connect_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl PeerIngestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        endpoint: PeerEndpoint,
        buffer: SharedBuffer,
        merge: Arc<MergeSet>,
        gate: AlignmentGate,
        peers: PeerTable,
        connect_timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            endpoint,
            buffer,
            merge,
            gate,
            peers,
            connect_timeout,
            shutdown,
        }
    }

    /// Connect and ingest until the peer goes away, the peer is excluded,
    /// or shutdown is signalled.
    ///
    /// A connect failure retires this peer's buffer so the aligner does not
    /// wait for it; it never affects other peers.
    pub async fn run(mut self) -> Result<(), IngestError> {
        tracing::info!(peer = %self.endpoint, id = self.id, "connecting to peer");

        let connected = tokio::select! {
            _ = self.shutdown.recv() => return Ok(()),
            r = connect(self.endpoint, self.connect_timeout) => r,
        };
        let stream = match connected {
            Ok(s) => s,
            Err(e) => {
                set_state(&self.peers, self.id, PeerState::Failed);
                self.buffer.retire().await;
                return Err(e.into());
            }
        };

        tracing::info!(peer = %self.endpoint, id = self.id, "connected to peer");
        set_state(&self.peers, self.id, PeerState::Streaming);

        let result = self.ingest(stream).await;
        if let Err(e) = &result {
            tracing::warn!(peer = %self.endpoint, id = self.id, error = %e, "peer ingest stopped");
            set_state(&self.peers, self.id, PeerState::Failed);
            self.buffer.seal().await;
        }
        result
    }

    async fn ingest(&mut self, mut stream: TcpStream) -> Result<(), IngestError> {
        let mut unit = [0u8; CHUNK_SIZE];

        loop {
            if !self.wait_for_room().await {
                return Ok(());
            }

            let read = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(id = self.id, "ingestor shutting down");
                    return Ok(());
                }
                r = stream.read_exact(&mut unit) => r,
            };
            match read {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::info!(peer = %self.endpoint, id = self.id, "peer closed its stream");
                    set_state(&self.peers, self.id, PeerState::Closed);
                    self.buffer.seal().await;
                    return Ok(());
                }
                Err(source) => {
                    return Err(IngestError::Receive {
                        peer: self.endpoint,
                        source,
                    })
                }
            }

            // The gate is read under the buffer lock: the aligner opens it
            // while holding this lock, so post-gate data is always aligned.
            let chunks = {
                let mut buf = self.buffer.lock().await;
                if buf.is_retired() {
                    drop(buf);
                    self.exclude();
                    return Ok(());
                }
                if let Err(e) = buf.append(&unit) {
                    tracing::warn!(id = self.id, error = %e, "dropping receive unit");
                }
                if self.gate.is_open() {
                    buf.drain_chunks()
                } else {
                    Vec::new()
                }
            };
            self.buffer.notify();
            record_receive(&self.peers, self.id, CHUNK_SIZE, chunks.len());

            if !chunks.is_empty() {
                let offered = chunks.len();
                let added = self.merge.insert_all(chunks).await;
                tracing::trace!(id = self.id, offered, added, "chunks merged");
            }
        }
    }

    /// Block while the buffer is full. Before alignment only the aligner
    /// frees space, so wait for the gate. Returns false if the ingestor
    /// should stop.
    async fn wait_for_room(&mut self) -> bool {
        loop {
            {
                let buf = self.buffer.lock().await;
                if buf.is_retired() {
                    drop(buf);
                    self.exclude();
                    return false;
                }
                if buf.remaining() >= CHUNK_SIZE {
                    return true;
                }
                if self.gate.is_open() {
                    // Aligned buffers never hold a full chunk between reads.
                    tracing::error!(id = self.id, len = buf.len(), "aligned buffer unexpectedly full");
                    return false;
                }
            }
            tracing::debug!(id = self.id, "buffer full, pausing peer until alignment");
            tokio::select! {
                _ = self.shutdown.recv() => return false,
                _ = self.gate.opened() => {}
            }
        }
    }

    fn exclude(&self) {
        tracing::info!(peer = %self.endpoint, id = self.id, "peer excluded from merge, disconnecting");
        set_state(&self.peers, self.id, PeerState::Excluded);
    }
}

/// Open the outbound connection to `peer`, giving up after `timeout`.
async fn connect(peer: PeerEndpoint, timeout: Duration) -> Result<TcpStream, ConnectError> {
    match tokio::time::timeout(timeout, TcpStream::connect(peer.socket_addr())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ConnectError::Io { peer, source }),
        Err(_) => Err(ConnectError::TimedOut { peer, timeout }),
    }
}
