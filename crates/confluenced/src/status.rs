//! Periodic status logging: merge counters and per-peer state.

use std::sync::Arc;
use std::time::Duration;

use confluence_services::{AlignmentGate, MergeSet, PeerTable};

pub async fn status_loop(merge: Arc<MergeSet>, peers: PeerTable, gate: AlignmentGate, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        interval.tick().await;

        let stats = merge.stats().await;
        tracing::info!(
            synchronized = gate.is_open(),
            pending = stats.pending,
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            late_duplicates = stats.late_duplicates,
            played = stats.taken,
            "merge set snapshot"
        );

        let mut ids: Vec<usize> = peers.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(p) = peers.get(&id) {
                tracing::info!(
                    id,
                    peer = %p.endpoint,
                    state = %p.state,
                    bytes_received = p.bytes_received,
                    chunks_offered = p.chunks_offered,
                    since_secs = p.last_change.elapsed().as_secs(),
                    "  peer"
                );
            }
        }
    }
}
