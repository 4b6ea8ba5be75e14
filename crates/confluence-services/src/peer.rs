//! Peer status table: per-peer state shared across all tasks.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use confluence_core::PeerEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Streaming,
    /// Left out of the merge by the aligner.
    Excluded,
    /// Could not connect, or the connection broke.
    Failed,
    /// The peer ended its stream.
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::Connecting => "connecting",
            PeerState::Streaming => "streaming",
            PeerState::Excluded => "excluded",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub endpoint: PeerEndpoint,
    pub state: PeerState,
    pub bytes_received: u64,
    /// Chunks this peer offered to the merge set after alignment.
    pub chunks_offered: u64,
    pub last_change: Instant,
}

/// Peer index → status. Each ingestor writes only its own entry.
pub type PeerTable = Arc<DashMap<usize, PeerStatus>>;

/// Create a table with every peer in `Connecting`.
pub fn new_peer_table(peers: &[PeerEndpoint]) -> PeerTable {
    let table = DashMap::with_capacity(peers.len());
    for (id, endpoint) in peers.iter().enumerate() {
        table.insert(
            id,
            PeerStatus {
                endpoint: *endpoint,
                state: PeerState::Connecting,
                bytes_received: 0,
                chunks_offered: 0,
                last_change: Instant::now(),
            },
        );
    }
    Arc::new(table)
}

pub(crate) fn set_state(table: &PeerTable, id: usize, state: PeerState) {
    if let Some(mut entry) = table.get_mut(&id) {
        if entry.state != state {
            entry.state = state;
            entry.last_change = Instant::now();
        }
    }
}

pub(crate) fn record_receive(table: &PeerTable, id: usize, bytes: usize, chunks: usize) {
    if let Some(mut entry) = table.get_mut(&id) {
        entry.bytes_received += bytes as u64;
        entry.chunks_offered += chunks as u64;
    }
}
