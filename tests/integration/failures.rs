use std::time::Duration;

use confluence_core::CHUNK_SIZE;
use confluence_services::{AlignmentError, PeerState, RelayError};
use tokio::io::AsyncReadExt;

use crate::*;

/// An unreachable peer is isolated; the others still align and play.
#[tokio::test]
async fn test_unreachable_peer_is_isolated() {
    let a = spawn_peer(prefixed_stream(b"AAAAAAAAAA", 4)).await.unwrap();
    let dead = dead_peer().await.unwrap();
    let b = spawn_peer(prefixed_stream(b"BBBBB", 4)).await.unwrap();

    let relay = start_relay(test_config(10, 4), endpoints(&[a, dead, b]).unwrap()).unwrap();
    let mut player = connect_player(relay.player_addr).await.unwrap();

    let mut chunks = read_chunks(&mut player, 3).await.unwrap();
    chunks.sort();
    assert_eq!(chunks, vec![hello_chunk(1), hello_chunk(2), hello_chunk(3)]);
    assert_eq!(relay.peers.get(&1).unwrap().state, PeerState::Failed);
    assert_eq!(relay.peers.get(&2).unwrap().state, PeerState::Streaming);

    relay.shutdown.send(()).unwrap();
    relay.handle.await.unwrap().unwrap();
}

/// A peer whose content never matches the reference is reported and the
/// gate stays shut when it leaves too few peers.
#[tokio::test]
async fn test_unalignable_peer_fails_alignment() {
    let a = spawn_peer(prefixed_stream(b"AAAAAAAAAA", 4)).await.unwrap();
    let junk = spawn_peer(vec![0u8; 4 * CHUNK_SIZE]).await.unwrap();

    let relay = start_relay(test_config(10, 4), endpoints(&[a, junk]).unwrap()).unwrap();
    let mut player = connect_player(relay.player_addr).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), relay.handle)
        .await
        .expect("relay should give up")
        .unwrap();
    match result {
        Err(RelayError::Alignment(AlignmentError::InsufficientPeers { failures, .. })) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, 1);
        }
        other => panic!("expected alignment failure, got {other:?}"),
    }
    assert!(!relay.gate.is_open());

    // The player connection is closed without any payload.
    let mut rest = Vec::new();
    player.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

/// A player that disconnects ends the relay and stops the ingestors.
#[tokio::test]
async fn test_player_disconnect_stops_relay() {
    let a = spawn_peer(prefixed_stream(b"", 256)).await.unwrap();
    let relay = start_relay(test_config(0, 4), endpoints(&[a]).unwrap()).unwrap();
    let player = connect_player(relay.player_addr).await.unwrap();
    drop(player);

    let result = tokio::time::timeout(Duration::from_secs(10), relay.handle)
        .await
        .expect("relay should stop")
        .unwrap();
    assert!(matches!(result, Err(RelayError::Playout(_))));
}
