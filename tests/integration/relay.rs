use std::time::Duration;

use crate::*;

/// Two peers carry the same chunks behind different-length prefixes. After
/// alignment the player gets each chunk exactly once.
#[tokio::test]
async fn test_two_peers_merge_into_one_stream() {
    let a = spawn_peer(prefixed_stream(b"AAAAAAAAAA", 4)).await.unwrap();
    let b = spawn_peer(prefixed_stream(b"BBBBB", 4)).await.unwrap();

    // Peer 0's ten-byte prefix is the leader to discard.
    let relay = start_relay(test_config(10, 4), endpoints(&[a, b]).unwrap()).unwrap();
    let mut player = connect_player(relay.player_addr).await.unwrap();

    // Each peer delivers four whole receive units; the last one stops short
    // of chunk 4's end, so chunks 1-3 are complete.
    let chunks = read_chunks(&mut player, 3).await.unwrap();
    assert!(stays_quiet(&mut player, Duration::from_millis(300)).await);

    let first = hello_chunk(1);
    assert_eq!(chunks.iter().filter(|c| **c == first).count(), 1);

    let mut sorted = chunks.clone();
    sorted.sort();
    assert_eq!(sorted, vec![hello_chunk(1), hello_chunk(2), hello_chunk(3)]);

    assert!(relay.gate.is_open());
    relay.shutdown.send(()).unwrap();
    let played = relay.handle.await.unwrap().unwrap();
    assert_eq!(played, 3);
}

/// Default alignment settings: peer 0 carries the full 100-byte leader, and
/// each peer must hold 16 KiB before the pass runs.
#[tokio::test]
async fn test_default_alignment_discards_reference_leader() {
    let a = spawn_peer(prefixed_stream(&[b'#'; 100], 20)).await.unwrap();
    let b = spawn_peer(prefixed_stream(&[b'~'; 37], 20)).await.unwrap();

    let mut config = test_config(0, 0);
    config.alignment = Default::default();
    assert_eq!(config.alignment.start_offset, 100);

    let relay = start_relay(config, endpoints(&[a, b]).unwrap()).unwrap();
    let mut player = connect_player(relay.player_addr).await.unwrap();

    let mut chunks = read_chunks(&mut player, 20).await.unwrap();
    assert!(stays_quiet(&mut player, Duration::from_millis(300)).await);
    assert!(chunks.iter().all(|c| c.starts_with(b"HELLO-CHUNK-")));

    chunks.sort();
    let expected: Vec<_> = (1..=20).map(hello_chunk).collect();
    assert_eq!(chunks, expected);

    relay.shutdown.send(()).unwrap();
    assert_eq!(relay.handle.await.unwrap().unwrap(), 20);
}

/// A single peer needs no alignment partner.
#[tokio::test]
async fn test_single_peer_streams_through() {
    let a = spawn_peer(prefixed_stream(b"", 3)).await.unwrap();
    let relay = start_relay(test_config(0, 3), endpoints(&[a]).unwrap()).unwrap();
    let mut player = connect_player(relay.player_addr).await.unwrap();

    let mut chunks = read_chunks(&mut player, 3).await.unwrap();
    chunks.sort();
    assert_eq!(chunks, vec![hello_chunk(1), hello_chunk(2), hello_chunk(3)]);

    relay.shutdown.send(()).unwrap();
    assert_eq!(relay.handle.await.unwrap().unwrap(), 3);
}

/// Data arriving after alignment flows through the merge set too.
#[tokio::test]
async fn test_chunks_after_alignment_are_played() {
    use tokio::io::AsyncWriteExt;

    // Peers send two chunks first and two more once the test says so.
    let (go_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut addrs = Vec::new();
    for prefix in [&b"AAAAAAAAAA"[..], &b"BB"[..]] {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        addrs.push(listener.local_addr().unwrap());
        let first = prefixed_stream(prefix, 3);
        let mut later = Vec::new();
        for n in 4..=6 {
            later.extend_from_slice(&hello_chunk(n));
        }
        let mut go = go_tx.subscribe();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            s.write_all(&first).await.unwrap();
            let _ = go.recv().await;
            s.write_all(&later).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
    }

    let relay = start_relay(test_config(10, 3), endpoints(&addrs).unwrap()).unwrap();
    let mut player = connect_player(relay.player_addr).await.unwrap();

    // Peer 0 buffers 3 units (3072 bytes) minus the 10-byte leader: two
    // whole chunks at alignment.
    let mut chunks = read_chunks(&mut player, 2).await.unwrap();
    go_tx.send(()).unwrap();
    chunks.extend(read_chunks(&mut player, 3).await.unwrap());

    chunks.sort();
    chunks.dedup();
    assert_eq!(chunks.len(), 5);
    assert_eq!(chunks[0], hello_chunk(1));
    assert_eq!(chunks[4], hello_chunk(5));

    relay.shutdown.send(()).unwrap();
    relay.handle.await.unwrap().unwrap();
}
