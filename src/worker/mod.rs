//! Mining workers and the pool that coordinates them
//!
//! Each worker is a blocking search thread driven by commands and reporting
//! through a shared event channel. The pool owns the job cycle and talks to
//! a [`WorkSource`], either the in-process node or a remote one over HTTP.

use crate::chain::{Block, MiningTask};
use crate::crypto::PrefixHasher;
use crate::node::Node;
use crate::pow::{NonceRange, Progress};
use crate::{Address, Hash256, HashRate, Nonce, Result, Target};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

pub mod cpu;
pub mod pool;

pub use cpu::CpuWorker;
pub use pool::{PoolConfig, PoolStatus, WorkerPool};

/// Where mining jobs come from and solved blocks go to
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &'static str;

    /// Template for the next block, rewarding `miner`
    async fn mining_task(&self, miner: &Address) -> Result<MiningTask>;

    /// Submit a solved block; returns the accepted height
    async fn submit(&self, block: Block, miner: &Address) -> Result<u64>;

    /// Hash of the current head, used to detect preemption
    async fn head(&self) -> Result<Hash256>;
}

#[async_trait]
impl WorkSource for Node {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn mining_task(&self, miner: &Address) -> Result<MiningTask> {
        self.get_mining_task(miner)
    }

    async fn submit(&self, block: Block, _miner: &Address) -> Result<u64> {
        self.append_block(block).await.map(|receipt| receipt.height)
    }

    async fn head(&self) -> Result<Hash256> {
        Ok(self.ledger().head().hash)
    }
}

/// One worker's share of a job
#[derive(Debug, Clone)]
pub struct Assignment {
    pub job_id: Uuid,
    pub hasher: Arc<PrefixHasher>,
    pub target: Target,
    pub range: NonceRange,
    pub cancel: CancellationToken,
}

/// Commands from the pool to a worker
#[derive(Debug)]
pub enum WorkerCommand {
    Mine(Assignment),
    Shutdown,
    #[cfg(test)]
    Panic,
}

/// Reports from a worker to the pool
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Progress {
        worker_id: usize,
        job_id: Uuid,
        progress: Progress,
    },
    Found {
        worker_id: usize,
        job_id: Uuid,
        nonce: Nonce,
        hash: Hash256,
        hashes: u64,
    },
    Exhausted {
        worker_id: usize,
        job_id: Uuid,
        hashes: u64,
    },
    /// The worker thread ended, by shutdown or by panic
    Exited { worker_id: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Mining,
    Exited,
}

/// Per-worker observability state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub worker_id: usize,
    pub state: WorkerState,
    pub hash_rate: HashRate,
    pub best_hash: Option<Hash256>,
    pub total_hashes: u64,
    pub solutions_found: u64,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip)]
    job_id: Option<Uuid>,
    #[serde(skip)]
    job_hashes: u64,
}

impl WorkerStats {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            state: WorkerState::Idle,
            hash_rate: HashRate::default(),
            best_hash: None,
            total_hashes: 0,
            solutions_found: 0,
            last_seen: None,
            job_id: None,
            job_hashes: 0,
        }
    }

    /// Fold a per-job cumulative hash count into the lifetime total
    pub fn record_hashes(&mut self, job_id: Uuid, job_total: u64) {
        if self.job_id != Some(job_id) {
            self.job_id = Some(job_id);
            self.job_hashes = 0;
        }
        self.total_hashes += job_total.saturating_sub(self.job_hashes);
        self.job_hashes = self.job_hashes.max(job_total);
        self.last_seen = Some(Utc::now());
    }

    pub fn record_progress(&mut self, job_id: Uuid, progress: &Progress) {
        self.record_hashes(job_id, progress.total_hashes);
        self.hash_rate = progress.hash_rate;
        self.state = WorkerState::Mining;
        if let Some(best) = progress.best_hash {
            if self.best_hash.map_or(true, |current| best < current) {
                self.best_hash = Some(best);
            }
        }
    }
}

/// Utility function to compute hash rate over a time period
pub fn compute_hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        hashes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

/// Create a tracing span for one worker's search
pub fn mining_span(worker_id: usize, job_id: Uuid) -> Span {
    tracing::debug_span!("mining", worker_id = worker_id, job_id = %job_id)
}
