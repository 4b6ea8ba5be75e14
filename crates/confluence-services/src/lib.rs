//! confluence-services: the synchronization-and-merge engine.
//!
//! Peer ingestors fill per-peer buffers, the aligner phase-aligns them once
//! against peer 0, and afterwards every ingestor feeds fixed-size chunks into
//! a deduplicating merge set that the playout loop drains to the player.

pub mod aligner;
pub mod buffer;
pub mod gate;
pub mod gateway;
pub mod ingest;
pub mod merge;
pub mod peer;
pub mod playout;
pub mod relay;

pub use aligner::{
    find_stable_offset, Aligner, AlignmentError, AlignmentFailure, AlignmentParams,
    AlignmentReport, StableMatch,
};
pub use buffer::{BufferFull, ChunkBuffer, ReadyError, SharedBuffer};
pub use gate::AlignmentGate;
pub use gateway::{DownstreamConnection, GatewayError, PlayerGateway, HANDSHAKE};
pub use ingest::{ConnectError, IngestError, PeerIngestor};
pub use merge::{MergeSet, MergeStats};
pub use peer::{new_peer_table, PeerState, PeerStatus, PeerTable};
pub use playout::{PlayoutError, PlayoutLoop};
pub use relay::{Relay, RelayError};
