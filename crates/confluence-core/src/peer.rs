//! Upstream peer endpoints.
//!
//! Peers are given as `host:port` with an IPv4 literal host. The list order
//! matters: index 0 is the alignment reference.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

/// One upstream peer. Immutable once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerEndpoint(SocketAddrV4);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("peer list is empty")]
    Empty,
    #[error("peer {0:?} is not of the form host:port")]
    MissingPort(String),
    #[error("peer {0:?} does not have an IPv4 literal host")]
    InvalidHost(String),
    #[error("peer {0:?} does not have a numeric port")]
    InvalidPort(String),
}

impl PeerEndpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(ip, port))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.0)
    }
}

impl FromStr for PeerEndpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::MissingPort(s.to_string()))?;
        let ip: Ipv4Addr = host
            .parse()
            .map_err(|_| ParseError::InvalidHost(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(ip, port))
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Parse an ordered peer list. Fails on the first malformed entry.
pub fn parse_peer_list<I, S>(entries: I) -> Result<Vec<PeerEndpoint>, ParseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let peers = entries
        .into_iter()
        .map(|e| e.as_ref().parse())
        .collect::<Result<Vec<PeerEndpoint>, _>>()?;
    if peers.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(peers)
}
