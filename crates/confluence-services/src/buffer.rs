//! Per-peer chunk buffers.
//!
//! Each peer's raw stream lands in a `ChunkBuffer`: bytes are appended at the
//! tail as they arrive and trimmed from the head by alignment or chunk
//! extraction. The buffer is bounded; a full buffer means the ingestor stops
//! reading, which pushes back on the peer through TCP flow control.
//!
//! `SharedBuffer` puts the buffer behind its own lock so the aligner can take
//! every peer's lock at once while ingestors are still running.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{Mutex, MutexGuard, Notify};

use confluence_core::{Chunk, CHUNK_SIZE};

#[derive(Debug, thiserror::Error)]
#[error("buffer full: {len} of {capacity} bytes used, {requested} more requested")]
pub struct BufferFull {
    pub len: usize,
    pub capacity: usize,
    pub requested: usize,
}

/// Why a readiness wait gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadyError {
    #[error("timed out holding {have} of {want} bytes")]
    TimedOut { have: usize, want: usize },
    #[error("stream ended holding {have} of {want} bytes")]
    Sealed { have: usize, want: usize },
    #[error("buffer retired")]
    Retired,
}

#[derive(Debug)]
pub struct ChunkBuffer {
    data: BytesMut,
    capacity: usize,
    /// No more bytes will arrive (peer closed or failed).
    sealed: bool,
    /// Excluded from merging; the owning ingestor stops.
    retired: bool,
}

impl ChunkBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity.min(64 * 1024)),
            capacity,
            sealed: false,
            retired: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes that can still be appended before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        if bytes.len() > self.remaining() {
            return Err(BufferFull {
                len: self.data.len(),
                capacity: self.capacity,
                requested: bytes.len(),
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Drop up to `n` bytes from the head. Returns how many were dropped.
    pub fn trim_front(&mut self, n: usize) -> usize {
        let n = n.min(self.data.len());
        let _ = self.data.split_to(n);
        n
    }

    /// Remove the front `CHUNK_SIZE` bytes as a chunk, if there are enough.
    pub fn take_chunk(&mut self) -> Option<Chunk> {
        if self.data.len() < CHUNK_SIZE {
            return None;
        }
        Chunk::new(self.data.split_to(CHUNK_SIZE).freeze()).ok()
    }

    /// Remove every complete chunk from the front.
    pub fn drain_chunks(&mut self) -> Vec<Chunk> {
        let mut chunks = Vec::with_capacity(self.data.len() / CHUNK_SIZE);
        while let Some(chunk) = self.take_chunk() {
            chunks.push(chunk);
        }
        chunks
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn retire(&mut self) {
        self.retired = true;
        self.sealed = true;
        self.data.clear();
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

struct BufferCell {
    buffer: Mutex<ChunkBuffer>,
    changed: Notify,
}

/// A `ChunkBuffer` shared between its ingestor and the aligner.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<BufferCell>,
}

impl SharedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BufferCell {
                buffer: Mutex::new(ChunkBuffer::with_capacity(capacity)),
                changed: Notify::new(),
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ChunkBuffer> {
        self.inner.buffer.lock().await
    }

    /// Wake readiness waiters. Call after releasing the lock.
    pub fn notify(&self) {
        self.inner.changed.notify_waiters();
    }

    pub async fn seal(&self) {
        self.lock().await.seal();
        self.notify();
    }

    pub async fn retire(&self) {
        self.lock().await.retire();
        self.notify();
    }

    /// Wait until the buffer holds at least `want` bytes.
    ///
    /// Returns the length observed. Fails if the deadline passes, the stream
    /// ends short, or the buffer is retired.
    pub async fn wait_for_len(&self, want: usize, timeout: Duration) -> Result<usize, ReadyError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register before checking so an append between the check and
            // the await is not missed.
            let notified = self.inner.changed.notified();
            let have = {
                let buf = self.lock().await;
                if buf.is_retired() {
                    return Err(ReadyError::Retired);
                }
                if buf.len() >= want {
                    return Ok(buf.len());
                }
                if buf.is_sealed() {
                    return Err(ReadyError::Sealed {
                        have: buf.len(),
                        want,
                    });
                }
                buf.len()
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ReadyError::TimedOut { have, want });
            }
        }
    }
}
