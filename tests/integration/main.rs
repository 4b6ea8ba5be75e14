//! Confluence integration test harness.
//!
//! Every test runs a full relay in-process against fake upstream peers and
//! a fake player, all on loopback TCP with OS-assigned ports. No root or
//! external setup is needed.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use confluence_core::{parse_peer_list, PeerEndpoint, RelayConfig, CHUNK_SIZE};
use confluence_services::{PlayerGateway, Relay, RelayError, HANDSHAKE};

mod failures;
mod relay;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long fake peers keep their connection open after sending.
const PEER_LINGER: Duration = Duration::from_secs(30);

/// A 1024-byte chunk that starts with `HELLO-CHUNK-{n:04}` and is padded with dots.
pub fn hello_chunk(n: u32) -> Vec<u8> {
    let mut chunk = format!("HELLO-CHUNK-{n:04}").into_bytes();
    chunk.resize(CHUNK_SIZE, b'.');
    chunk
}

/// `prefix` followed by chunks `1..=count`.
pub fn prefixed_stream(prefix: &[u8], count: u32) -> Vec<u8> {
    let mut data = prefix.to_vec();
    for n in 1..=count {
        data.extend_from_slice(&hello_chunk(n));
    }
    data
}

/// Start a fake upstream peer that sends `data` to its first client and then
/// keeps the connection open.
pub async fn spawn_peer(data: Vec<u8>) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            if stream.write_all(&data).await.is_ok() {
                tokio::time::sleep(PEER_LINGER).await;
            }
        }
    });
    Ok(addr)
}

/// An address nothing listens on.
pub async fn dead_peer() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

pub fn endpoints(addrs: &[SocketAddr]) -> Result<Vec<PeerEndpoint>> {
    parse_peer_list(addrs.iter().map(|a| a.to_string())).context("peer list")
}

/// Config tuned for loopback tests. Alignment waits until every peer has
/// delivered `ready_units` receive units, and playout remembers recent chunks
/// so a peer that lags behind another cannot replay them.
pub fn test_config(start_offset: usize, ready_units: usize) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.network.bind_addr = "127.0.0.1".into();
    config.network.player_port = 0;
    config.network.connect_timeout_ms = 1_000;
    config.alignment.start_offset = start_offset;
    config.alignment.ready_bytes = ready_units * CHUNK_SIZE;
    config.alignment.ready_timeout_ms = 1_000;
    config.alignment.max_attempts = 2;
    config.alignment.retry_delay_ms = 20;
    config.playout.poll_interval_ms = 5;
    config.playout.replay_history = 64;
    config
}

pub struct RunningRelay {
    pub player_addr: SocketAddr,
    pub shutdown: broadcast::Sender<()>,
    pub handle: JoinHandle<Result<u64, RelayError>>,
    pub peers: confluence_services::PeerTable,
    pub gate: confluence_services::AlignmentGate,
}

pub fn start_relay(config: RelayConfig, peers: Vec<PeerEndpoint>) -> Result<RunningRelay> {
    let gateway = PlayerGateway::bind(&config.network.bind_addr, config.network.player_port)?;
    let player_addr = gateway.local_addr()?;
    let (shutdown, _) = broadcast::channel(1);
    let relay = Relay::new(config, peers);
    let peer_table = relay.peer_table();
    let gate = relay.gate();
    let handle = tokio::spawn(relay.run(gateway, shutdown.clone()));
    Ok(RunningRelay {
        player_addr,
        shutdown,
        handle,
        peers: peer_table,
        gate,
    })
}

/// Connect as the player and consume the handshake.
pub async fn connect_player(addr: SocketAddr) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await.context("player connect")?;
    let mut handshake = vec![0u8; HANDSHAKE.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut handshake))
        .await
        .context("handshake timed out")??;
    anyhow::ensure!(handshake == HANDSHAKE, "unexpected handshake {handshake:?}");
    Ok(stream)
}

/// Read `count` chunks from the player socket.
pub async fn read_chunks(stream: &mut TcpStream, count: usize) -> Result<Vec<Vec<u8>>> {
    let mut chunks = Vec::with_capacity(count);
    for _ in 0..count {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        tokio::time::timeout(Duration::from_secs(10), stream.read_exact(&mut chunk))
            .await
            .context("timed out waiting for a chunk")??;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// True if nothing arrives on `stream` within `wait`.
pub async fn stays_quiet(stream: &mut TcpStream, wait: Duration) -> bool {
    let mut byte = [0u8; 1];
    tokio::time::timeout(wait, stream.read(&mut byte)).await.is_err()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_player_receives_handshake_first() {
    let gateway = PlayerGateway::bind("127.0.0.1", 0).unwrap();
    let addr = gateway.local_addr().unwrap();

    let accept = tokio::spawn(gateway.wait_for_consumer());
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let _conn = accept.await.unwrap().expect("gateway should accept");

    let mut buf = vec![0u8; HANDSHAKE.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, b"HTTP/1.1 200 OK\r\n\r\n");
    assert!(stays_quiet(&mut stream, Duration::from_millis(100)).await);
}
