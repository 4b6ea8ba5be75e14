//! Playout loop: drains the merge set into the player connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use confluence_core::Chunk;

use crate::gateway::DownstreamConnection;
use crate::merge::MergeSet;

#[derive(Debug, thiserror::Error)]
pub enum PlayoutError {
    #[error("write to player {peer} failed after {played} chunks: {source}")]
    StreamWrite {
        peer: SocketAddr,
        played: u64,
        #[source]
        source: io::Error,
    },
}

pub struct PlayoutLoop {
    merge: Arc<MergeSet>,
    conn: DownstreamConnection,
    poll_interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl PlayoutLoop {
    pub fn new(
        merge: Arc<MergeSet>,
        conn: DownstreamConnection,
        poll_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            merge,
            conn,
            poll_interval,
            shutdown,
        }
    }

    /// Play chunks until shutdown or a write failure. Returns the number of
    /// chunks written.
    pub async fn run(mut self) -> Result<u64, PlayoutError> {
        let peer = self.conn.peer_addr();
        let mut played = 0u64;
        tracing::info!(player = %peer, "playout started");

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    tracing::info!(played, "playout shutting down");
                    return Ok(played);
                }
                c = next_chunk(&self.merge, self.poll_interval) => c,
            };

            self.conn
                .write_chunk(&chunk)
                .await
                .map_err(|source| PlayoutError::StreamWrite {
                    peer,
                    played,
                    source,
                })?;
            played += 1;
            tracing::trace!(
                played,
                digest = %hex::encode(&chunk.digest()[..4]),
                "chunk written to the player"
            );
        }
    }
}

/// Poll the merge set until it yields a chunk.
async fn next_chunk(merge: &MergeSet, poll_interval: Duration) -> Chunk {
    loop {
        if let Some(chunk) = merge.try_take_one().await {
            return chunk;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
