//! One-shot stream alignment.
//!
//! Peers carry the same content but joined the broadcast at different
//! points. The aligner takes a needle from the reference stream (peer 0,
//! after discarding `start_offset` leading bytes) and searches each other
//! peer's buffer for it, growing the needle one byte at a time until two
//! consecutive lengths match at the same position. That position is where
//! the peer's stream lines up with the reference, and the peer's buffer is
//! trimmed to start there.
//!
//! A pass works on a locked snapshot of every buffer and commits nothing
//! unless it finishes: the reference drop, every trim, the flush of aligned
//! chunks into the merge set, and the gate opening all happen before the
//! locks are released. Passes that leave peers unaligned are retried a
//! bounded number of times; peers still failing after that are excluded.

use std::collections::BTreeMap;
use std::time::Duration;

use confluence_core::RelayConfig;

use crate::buffer::{ReadyError, SharedBuffer};
use crate::gate::AlignmentGate;
use crate::merge::MergeSet;

/// Index of the reference peer.
pub const REFERENCE: usize = 0;

#[derive(Debug, Clone)]
pub struct AlignmentParams {
    pub start_offset: usize,
    pub initial_needle: usize,
    pub ready_bytes: usize,
    pub ready_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl From<&RelayConfig> for AlignmentParams {
    fn from(config: &RelayConfig) -> Self {
        Self {
            start_offset: config.alignment.start_offset,
            initial_needle: config.alignment.initial_needle,
            ready_bytes: config.alignment.ready_bytes,
            ready_timeout: config.ready_timeout(),
            max_attempts: config.alignment.max_attempts,
            retry_delay: config.retry_delay(),
        }
    }
}

/// Why one peer could not be aligned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlignmentFailure {
    #[error("needle not found in peer stream")]
    NoMatch,
    #[error("match position still moving at needle length {0}")]
    Unstable(usize),
    #[error("reference holds {have} usable bytes, needle needs {want}")]
    ReferenceTooShort { have: usize, want: usize },
    #[error("buffer not ready: {0}")]
    NotReady(#[from] ReadyError),
}

#[derive(Debug, thiserror::Error)]
pub enum AlignmentError {
    #[error("reference peer unusable: {0}")]
    Reference(AlignmentFailure),
    #[error("only {survivors} peer(s) aligned, {required} required")]
    InsufficientPeers {
        survivors: usize,
        required: usize,
        failures: Vec<(usize, AlignmentFailure)>,
    },
    #[error("no peers to align")]
    NoPeers,
    #[error("alignment gate was already open")]
    AlreadyAligned,
}

/// Outcome of a successful alignment.
#[derive(Debug, Clone, Default)]
pub struct AlignmentReport {
    /// (peer index, bytes trimmed) for every aligned non-reference peer.
    pub offsets: Vec<(usize, usize)>,
    /// Peers left out of the merge and why.
    pub excluded: Vec<(usize, AlignmentFailure)>,
    /// Passes run, including the successful one.
    pub attempts: u32,
    /// Chunks moved into the merge set at commit.
    pub flushed: usize,
}

/// A settled match: where the peer lines up, and the needle length that
/// confirmed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableMatch {
    pub offset: usize,
    pub needle_len: usize,
}

/// Locate `haystack`'s alignment point against `reference`.
///
/// Starts with a needle of `needle_len` bytes from the head of `reference`
/// and grows it until the first match position stops changing. Matching is
/// exact byte equality.
///
/// The returned needle length is where the search settled. Within a pass
/// the next peer starts from it, so the needle never shrinks.
pub fn find_stable_offset(
    reference: &[u8],
    haystack: &[u8],
    needle_len: usize,
) -> Result<StableMatch, AlignmentFailure> {
    if needle_len == 0 || reference.len() < needle_len {
        return Err(AlignmentFailure::ReferenceTooShort {
            have: reference.len(),
            want: needle_len.max(1),
        });
    }

    let mut needle_len = needle_len;
    let mut previous: Option<usize> = None;
    loop {
        let found = find(haystack, &reference[..needle_len]).ok_or(AlignmentFailure::NoMatch)?;
        if previous == Some(found) {
            return Ok(StableMatch {
                offset: found,
                needle_len,
            });
        }
        previous = Some(found);
        needle_len += 1;
        if needle_len > reference.len() {
            return Err(AlignmentFailure::Unstable(reference.len()));
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub struct Aligner {
    params: AlignmentParams,
}

impl Aligner {
    pub fn new(params: AlignmentParams) -> Self {
        Self { params }
    }

    /// Align every buffer against `buffers[REFERENCE]`, flush the aligned
    /// chunks into `merge`, and open `gate`.
    pub async fn run(
        &self,
        buffers: &[SharedBuffer],
        merge: &MergeSet,
        gate: &AlignmentGate,
    ) -> Result<AlignmentReport, AlignmentError> {
        if gate.is_open() {
            return Err(AlignmentError::AlreadyAligned);
        }
        if buffers.is_empty() {
            return Err(AlignmentError::NoPeers);
        }
        let required = buffers.len().min(2);
        // Peers that can never align (retired). They do not force a retry.
        let mut excluded: BTreeMap<usize, AlignmentFailure> = BTreeMap::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::info!(attempt, peers = buffers.len(), "attempting to align peers");

            let mut failures = self.wait_ready(buffers, &mut excluded, attempt).await?;

            let mut guards = Vec::with_capacity(buffers.len());
            for buf in buffers {
                guards.push(buf.lock().await);
            }

            let start = self.params.start_offset;
            let reference = guards[REFERENCE].as_slice();
            let usable = reference.get(start..).unwrap_or(&[]);
            tracing::debug!(
                attempt,
                usable = usable.len(),
                needle = %hex::encode(&usable[..self.params.initial_needle.min(usable.len())]),
                "reference needle"
            );
            let mut offsets = Vec::new();
            let mut needle_len = self.params.initial_needle;

            for (peer, guard) in guards.iter().enumerate().skip(1) {
                if excluded.contains_key(&peer) || failures.contains_key(&peer) {
                    continue;
                }
                if guard.is_retired() {
                    excluded.insert(peer, ReadyError::Retired.into());
                    continue;
                }
                match find_stable_offset(usable, guard.as_slice(), needle_len) {
                    Ok(StableMatch { offset, needle_len: settled }) => {
                        tracing::info!(
                            peer,
                            offset,
                            needle = settled,
                            haystack = guard.len(),
                            "peer aligned with peer 0"
                        );
                        offsets.push((peer, offset));
                        needle_len = settled;
                    }
                    Err(AlignmentFailure::ReferenceTooShort { have, want }) => {
                        if attempt >= self.params.max_attempts {
                            return Err(AlignmentError::Reference(
                                AlignmentFailure::ReferenceTooShort { have, want },
                            ));
                        }
                        failures.insert(REFERENCE, AlignmentFailure::ReferenceTooShort { have, want });
                        break;
                    }
                    Err(failure) => {
                        tracing::warn!(peer, attempt, error = %failure, "alignment of peer with peer 0 failed");
                        failures.insert(peer, failure);
                    }
                }
            }

            if !failures.is_empty() && attempt < self.params.max_attempts {
                drop(guards);
                tracing::warn!(
                    attempt,
                    failed = failures.len(),
                    retry_in_ms = self.params.retry_delay.as_millis() as u64,
                    "alignment pass incomplete, retrying"
                );
                tokio::time::sleep(self.params.retry_delay).await;
                continue;
            }

            // Final pass or clean pass: remaining failures become exclusions.
            excluded.extend(failures);

            let survivors = 1 + offsets.len();
            if survivors < required {
                return Err(AlignmentError::InsufficientPeers {
                    survivors,
                    required,
                    failures: excluded.into_iter().collect(),
                });
            }

            guards[REFERENCE].trim_front(start);
            for &(peer, offset) in &offsets {
                guards[peer].trim_front(offset);
            }
            for &peer in excluded.keys() {
                guards[peer].retire();
            }

            let mut flushed = 0;
            for peer in std::iter::once(REFERENCE).chain(offsets.iter().map(|&(p, _)| p)) {
                let chunks = guards[peer].drain_chunks();
                flushed += merge.insert_all(chunks).await;
            }

            if !gate.open() {
                return Err(AlignmentError::AlreadyAligned);
            }
            drop(guards);
            for &peer in excluded.keys() {
                buffers[peer].notify();
            }

            let report = AlignmentReport {
                offsets,
                excluded: excluded.into_iter().collect(),
                attempts: attempt,
                flushed,
            };
            tracing::info!(
                aligned = report.offsets.len() + 1,
                excluded = report.excluded.len(),
                attempts = report.attempts,
                flushed = report.flushed,
                "peers synchronized"
            );
            return Ok(report);
        }
    }

    /// Wait for every live buffer to hold `ready_bytes`. Retired buffers go
    /// straight to `excluded`; other shortfalls are returned as this pass's
    /// failures.
    async fn wait_ready(
        &self,
        buffers: &[SharedBuffer],
        excluded: &mut BTreeMap<usize, AlignmentFailure>,
        attempt: u32,
    ) -> Result<BTreeMap<usize, AlignmentFailure>, AlignmentError> {
        let mut failures = BTreeMap::new();
        let want = self.params.ready_bytes;

        for (peer, buf) in buffers.iter().enumerate() {
            if excluded.contains_key(&peer) {
                continue;
            }
            match buf.wait_for_len(want, self.params.ready_timeout).await {
                Ok(_) => {}
                Err(ReadyError::Retired) if peer == REFERENCE => {
                    return Err(AlignmentError::Reference(ReadyError::Retired.into()));
                }
                Err(ReadyError::Retired) => {
                    tracing::warn!(peer, "peer unavailable, excluding from alignment");
                    excluded.insert(peer, ReadyError::Retired.into());
                }
                // A sealed buffer may still align on what it holds.
                Err(ReadyError::Sealed { have, .. }) if have > 0 => {
                    tracing::debug!(peer, have, "peer stream ended short of ready size");
                }
                Err(e) if peer == REFERENCE && attempt >= self.params.max_attempts => {
                    return Err(AlignmentError::Reference(e.into()));
                }
                Err(e) => {
                    tracing::warn!(peer, attempt, error = %e, "peer buffer not ready");
                    failures.insert(peer, e.into());
                }
            }
        }
        Ok(failures)
    }
}
