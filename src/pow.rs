//! Proof-of-work search
//!
//! A single search walks a nonce range until a digest meets the target, the
//! range runs out, or the cancellation token fires. Cancellation is checked
//! once per attempt; progress is reported on a wall-clock cadence.

use crate::chain::{Block, MiningTask};
use crate::crypto::PrefixHasher;
use crate::{Hash256, HashRate, Nonce, Target};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Attempts between clock reads
const CLOCK_CHECK_INTERVAL: u64 = 1024;

/// Inclusive nonce range `[start, last]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    pub start: u64,
    pub last: u64,
}

impl NonceRange {
    /// The whole 64-bit nonce space
    pub fn full() -> Self {
        Self {
            start: 0,
            last: u64::MAX,
        }
    }

    /// Split the nonce space into `parts` contiguous, non-overlapping ranges
    pub fn partition(parts: usize) -> Vec<NonceRange> {
        let parts = parts.max(1) as u64;
        let chunk = u64::MAX / parts;
        (0..parts)
            .map(|i| NonceRange {
                start: i * chunk,
                last: if i + 1 == parts {
                    u64::MAX
                } else {
                    (i + 1) * chunk - 1
                },
            })
            .collect()
    }
}

/// Periodic search observability
#[derive(Debug, Clone)]
pub struct Progress {
    /// Attempts since the search began
    pub total_hashes: u64,
    /// Attempts per second over the last report window
    pub hash_rate: HashRate,
    /// Lowest digest seen so far
    pub best_hash: Option<Hash256>,
}

/// How a search ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A digest met the target
    Found { nonce: Nonce, hash: Hash256, hashes: u64 },
    /// Every nonce in the range was tried
    Exhausted { hashes: u64 },
    /// The token fired before a solution was found
    Cancelled { hashes: u64 },
}

/// Search `range` for a nonce whose digest meets `target`
pub fn search<F>(
    hasher: &PrefixHasher,
    target: &Target,
    range: NonceRange,
    cancellation: &CancellationToken,
    report_interval: Duration,
    mut on_progress: F,
) -> SearchOutcome
where
    F: FnMut(&Progress),
{
    let mut nonce = range.start;
    let mut hashes: u64 = 0;
    let mut best: Option<Hash256> = None;
    let mut window_start = Instant::now();
    let mut window_hashes: u64 = 0;

    loop {
        if cancellation.is_cancelled() {
            return SearchOutcome::Cancelled { hashes };
        }

        let hash = hasher.hash_nonce(nonce);
        hashes += 1;
        window_hashes += 1;

        if best.map_or(true, |b| hash < b) {
            best = Some(hash);
        }

        if target.is_met_by(&hash) {
            return SearchOutcome::Found {
                nonce: Nonce::new(nonce),
                hash,
                hashes,
            };
        }

        if nonce == range.last {
            return SearchOutcome::Exhausted { hashes };
        }
        nonce += 1;

        if hashes % CLOCK_CHECK_INTERVAL == 0 {
            let elapsed = window_start.elapsed();
            if elapsed >= report_interval {
                on_progress(&Progress {
                    total_hashes: hashes,
                    hash_rate: HashRate::new(crate::worker::compute_hash_rate(window_hashes, elapsed)),
                    best_hash: best,
                });
                window_start = Instant::now();
                window_hashes = 0;
            }
        }
    }
}

/// Solve a task on the calling thread over the full nonce space
pub fn solve(task: &MiningTask, cancellation: &CancellationToken) -> Option<Block> {
    let hasher = task.prefix_hasher();
    match search(
        &hasher,
        &task.target(),
        NonceRange::full(),
        cancellation,
        Duration::from_secs(1),
        |_| {},
    ) {
        SearchOutcome::Found { nonce, hash, .. } => Some(task.seal(nonce, hash)),
        _ => None,
    }
}
