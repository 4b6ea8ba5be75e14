//! Merge set: the deduplicating pool between ingestors and playout.
//!
//! After alignment every peer delivers the same content, so the same chunk
//! usually arrives once per peer. The set keeps one copy by content. Removal
//! order is whatever the hash set yields; it is not arrival order.
//!
//! Every operation is a single critical section under one lock.

use std::collections::{HashSet, VecDeque};

use tokio::sync::Mutex;

use confluence_core::Chunk;

/// Counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Chunks added to the set.
    pub inserted: u64,
    /// Inserts dropped because the content was already pending.
    pub duplicates: u64,
    /// Inserts dropped because the content was played recently.
    pub late_duplicates: u64,
    /// Chunks handed to playout.
    pub taken: u64,
    /// Chunks currently pending.
    pub pending: usize,
}

struct MergeState {
    pending: HashSet<Chunk>,
    history: ReplayHistory,
    stats: MergeStats,
}

/// Bounded memory of recently taken chunk digests.
struct ReplayHistory {
    limit: usize,
    order: VecDeque<[u8; 32]>,
    seen: HashSet<[u8; 32]>,
}

impl ReplayHistory {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            order: VecDeque::with_capacity(limit),
            seen: HashSet::with_capacity(limit),
        }
    }

    fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    fn contains(&self, digest: &[u8; 32]) -> bool {
        self.seen.contains(digest)
    }

    fn record(&mut self, digest: [u8; 32]) {
        if !self.seen.insert(digest) {
            return;
        }
        self.order.push_back(digest);
        while self.order.len() > self.limit {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }
}

pub struct MergeSet {
    inner: Mutex<MergeState>,
}

impl MergeSet {
    /// An empty set with no replay history.
    pub fn new() -> Self {
        Self::with_replay_history(0)
    }

    /// An empty set that remembers the last `limit` taken chunks and drops
    /// them if a lagging peer delivers them again.
    pub fn with_replay_history(limit: usize) -> Self {
        Self {
            inner: Mutex::new(MergeState {
                pending: HashSet::new(),
                history: ReplayHistory::new(limit),
                stats: MergeStats::default(),
            }),
        }
    }

    /// Add a chunk unless identical content is already present.
    /// Returns true if it was added.
    pub async fn insert(&self, chunk: Chunk) -> bool {
        let mut state = self.inner.lock().await;
        state.insert(chunk)
    }

    /// Add a batch under one lock. Returns how many were added.
    pub async fn insert_all(&self, chunks: impl IntoIterator<Item = Chunk>) -> usize {
        let mut state = self.inner.lock().await;
        chunks
            .into_iter()
            .map(|c| state.insert(c))
            .filter(|added| *added)
            .count()
    }

    /// Remove and return one chunk, or `None` if the set is empty.
    pub async fn try_take_one(&self) -> Option<Chunk> {
        let mut state = self.inner.lock().await;
        let chunk = state.pending.iter().next().cloned()?;
        state.pending.remove(&chunk);
        if state.history.is_enabled() {
            state.history.record(chunk.digest());
        }
        state.stats.taken += 1;
        Some(chunk)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.pending.is_empty()
    }

    pub async fn stats(&self) -> MergeStats {
        let state = self.inner.lock().await;
        MergeStats {
            pending: state.pending.len(),
            ..state.stats
        }
    }
}

impl Default for MergeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeState {
    fn insert(&mut self, chunk: Chunk) -> bool {
        if self.pending.contains(&chunk) {
            self.stats.duplicates += 1;
            return false;
        }
        if self.history.is_enabled() && self.history.contains(&chunk.digest()) {
            self.stats.late_duplicates += 1;
            return false;
        }
        self.pending.insert(chunk);
        self.stats.inserted += 1;
        true
    }
}
