//! The alignment gate: a one-shot, process-wide readiness signal.
//!
//! Closed until the aligner finishes; opening it is the only valid
//! transition. Ingestors read it under their buffer lock, and the aligner
//! opens it while holding every buffer lock, so no chunk is emitted from
//! unaligned data.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct AlignmentGate {
    tx: Arc<watch::Sender<bool>>,
}

impl AlignmentGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the gate. Returns true only for the call that opened it.
    pub fn open(&self) -> bool {
        self.tx.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        })
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the gate is open.
    pub async fn opened(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for AlignmentGate {
    fn default() -> Self {
        Self::new()
    }
}
