//! Relay: sequences the phases of a relay node.
//!
//! Ingestors start first and run for the lifetime of the relay. The relay
//! then waits for the player, runs the aligner once, and plays out until
//! the player goes away. Whatever ends the relay, shutdown is broadcast so
//! every ingestor stops.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use confluence_core::{PeerEndpoint, RelayConfig};

use crate::aligner::{Aligner, AlignmentError, AlignmentParams};
use crate::buffer::SharedBuffer;
use crate::gate::AlignmentGate;
use crate::gateway::{GatewayError, PlayerGateway};
use crate::ingest::{IngestError, PeerIngestor};
use crate::merge::MergeSet;
use crate::peer::{new_peer_table, PeerTable};
use crate::playout::{PlayoutError, PlayoutLoop};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("player gateway: {0}")]
    Gateway(#[from] GatewayError),
    #[error("alignment: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("playout: {0}")]
    Playout(#[from] PlayoutError),
    #[error("shut down before playout finished")]
    Shutdown,
}

pub struct Relay {
    config: RelayConfig,
    peers: Vec<PeerEndpoint>,
    buffers: Vec<SharedBuffer>,
    merge: Arc<MergeSet>,
    gate: AlignmentGate,
    peer_table: PeerTable,
}

impl Relay {
    pub fn new(config: RelayConfig, peers: Vec<PeerEndpoint>) -> Self {
        let buffers = peers
            .iter()
            .map(|_| SharedBuffer::new(config.buffer.capacity_bytes))
            .collect();
        let merge = Arc::new(MergeSet::with_replay_history(config.playout.replay_history));
        let peer_table = new_peer_table(&peers);
        Self {
            config,
            peers,
            buffers,
            merge,
            gate: AlignmentGate::new(),
            peer_table,
        }
    }

    pub fn merge_set(&self) -> Arc<MergeSet> {
        self.merge.clone()
    }

    pub fn peer_table(&self) -> PeerTable {
        self.peer_table.clone()
    }

    pub fn gate(&self) -> AlignmentGate {
        self.gate.clone()
    }

    /// Run every phase. Returns the number of chunks played if playout ended
    /// by shutdown.
    pub async fn run(
        self,
        gateway: PlayerGateway,
        shutdown: broadcast::Sender<()>,
    ) -> Result<u64, RelayError> {
        let ingestors = self.spawn_ingestors(&shutdown);

        let result = self.run_phases(gateway, &shutdown).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "relay stopping");
        }

        let _ = shutdown.send(());
        for handle in ingestors {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "ingestor task panicked");
            }
        }
        result
    }

    fn spawn_ingestors(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        self.peers
            .iter()
            .enumerate()
            .map(|(id, endpoint)| {
                let ingestor = PeerIngestor::new(
                    id,
                    *endpoint,
                    self.buffers[id].clone(),
                    self.merge.clone(),
                    self.gate.clone(),
                    self.peer_table.clone(),
                    self.config.connect_timeout(),
                    shutdown.subscribe(),
                );
                tokio::spawn(async move {
                    match ingestor.run().await {
                        Ok(()) => {}
                        Err(IngestError::Connect(e)) => {
                            tracing::warn!(id, error = %e, "peer unreachable, continuing without it")
                        }
                        Err(e) => tracing::warn!(id, error = %e, "peer ingestor exited"),
                    }
                })
            })
            .collect()
    }

    async fn run_phases(
        &self,
        gateway: PlayerGateway,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<u64, RelayError> {
        let mut shutdown_rx = shutdown.subscribe();

        let conn = tokio::select! {
            _ = shutdown_rx.recv() => return Err(RelayError::Shutdown),
            r = gateway.wait_for_consumer() => r?,
        };

        let aligner = Aligner::new(AlignmentParams::from(&self.config));
        tokio::select! {
            _ = shutdown_rx.recv() => return Err(RelayError::Shutdown),
            r = aligner.run(&self.buffers, &self.merge, &self.gate) => { r?; }
        }

        let played = PlayoutLoop::new(
            self.merge.clone(),
            conn,
            self.config.poll_interval(),
            shutdown.subscribe(),
        )
        .run()
        .await?;
        Ok(played)
    }
}
