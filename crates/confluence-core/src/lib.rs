//! confluence-core: shared types and configuration for the relay node.
//! All other Confluence crates depend on this one.

pub mod chunk;
pub mod config;
pub mod peer;

pub use chunk::{Chunk, ChunkSizeError, CHUNK_SIZE};
pub use config::{ConfigError, RelayConfig};
pub use peer::{parse_peer_list, ParseError, PeerEndpoint};
