//! Worker pool coordinator
//!
//! Builds one job per cycle, splits the nonce space across the live workers
//! and arbitrates the first solution. The coordinator is the only component
//! that submits blocks, so appends from the pool are serialized.
//!
//! A solution that cannot be stored pauses the pool: no new job is issued
//! and the submission is retried with exponential backoff until it lands,
//! turns out stale, or the pool is stopped.

use super::{Assignment, CpuWorker, WorkSource, WorkerEvent, WorkerState, WorkerStats};
use crate::chain::{Block, MiningTask};
use crate::client::BackoffConfig;
use crate::pow::NonceRange;
use crate::{Address, Difficulty, Error, Hash256, HashRate, Nonce, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Superseded jobs whose late solutions are still submitted
const RETIRED_JOBS: usize = 4;

/// Pool tuning
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of search threads
    pub workers: usize,
    /// Cadence of worker progress reports
    pub progress_interval: Duration,
    /// How often the work source is polled for a new head
    pub job_refresh_interval: Duration,
    /// Retry policy for submissions that fail to persist
    pub backoff: BackoffConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            progress_interval: Duration::from_secs(1),
            job_refresh_interval: Duration::from_secs(2),
            backoff: BackoffConfig::default(),
        }
    }
}

/// The job currently being searched
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub job_id: Uuid,
    pub index: u64,
    pub previous_hash: Hash256,
    pub difficulty: Difficulty,
    pub transactions: usize,
}

/// Aggregated pool state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub running: bool,
    pub paused: bool,
    pub source: &'static str,
    pub miner: Option<Address>,
    pub current_job: Option<JobInfo>,
    pub workers: Vec<WorkerStats>,
    pub total_hash_rate: HashRate,
    pub blocks_found: u64,
    pub blocks_accepted: u64,
    pub stale_results: u64,
    pub jobs_issued: u64,
}

#[derive(Debug, Default)]
struct PoolShared {
    running: AtomicBool,
    paused: AtomicBool,
    workers: DashMap<usize, WorkerStats>,
    current_job: RwLock<Option<JobInfo>>,
    miner: RwLock<Option<Address>>,
    blocks_found: AtomicU64,
    blocks_accepted: AtomicU64,
    stale_results: AtomicU64,
    jobs_issued: AtomicU64,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Parallel miner over a [`WorkSource`]
pub struct WorkerPool {
    source: Arc<dyn WorkSource>,
    config: PoolConfig,
    shared: Arc<PoolShared>,
    running: Mutex<Option<Running>>,
}

impl WorkerPool {
    pub fn new(source: Arc<dyn WorkSource>, config: PoolConfig) -> Self {
        Self {
            source,
            config,
            shared: Arc::new(PoolShared::default()),
            running: Mutex::new(None),
        }
    }

    /// Spawn the workers and start mining for `miner`
    pub async fn start(&self, miner: Address) -> Result<()> {
        if miner.is_system() {
            return Err(Error::invalid_transaction("SYSTEM cannot mine"));
        }

        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(Error::invalid_state("mining pool is already running"));
        }

        self.shared.workers.clear();
        self.shared.paused.store(false, Ordering::SeqCst);
        *self.shared.current_job.write() = None;
        *self.shared.miner.write() = Some(miner.clone());

        let token = CancellationToken::new();
        let coordinator = Coordinator::new(
            Arc::clone(&self.source),
            self.config.clone(),
            Arc::clone(&self.shared),
            miner.clone(),
            token.clone(),
        );
        self.shared.running.store(true, Ordering::SeqCst);

        info!(
            workers = coordinator.workers.len(),
            source = self.source.name(),
            miner = %miner,
            "Mining pool started"
        );
        let handle = tokio::spawn(coordinator.run());
        *running = Some(Running { token, handle });
        Ok(())
    }

    /// Cancel the current job and wait for every worker to exit.
    /// Returns false when the pool was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        running.token.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Coordinator task failed");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        let mut workers: Vec<WorkerStats> = self
            .shared
            .workers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        workers.sort_by_key(|w| w.worker_id);

        let total_hash_rate = live_hash_rate(workers.iter().cloned());

        PoolStatus {
            running: self.is_running(),
            paused: self.shared.paused.load(Ordering::SeqCst),
            source: self.source.name(),
            miner: self.shared.miner.read().clone(),
            current_job: self.shared.current_job.read().clone(),
            workers,
            total_hash_rate,
            blocks_found: self.shared.blocks_found.load(Ordering::Relaxed),
            blocks_accepted: self.shared.blocks_accepted.load(Ordering::Relaxed),
            stale_results: self.shared.stale_results.load(Ordering::Relaxed),
            jobs_issued: self.shared.jobs_issued.load(Ordering::Relaxed),
        }
    }
}

/// Sum of the hash rates of workers that have not exited
fn live_hash_rate(workers: impl Iterator<Item = WorkerStats>) -> HashRate {
    workers
        .filter(|w| w.state != WorkerState::Exited)
        .map(|w| w.hash_rate)
        .sum()
}

struct Job {
    id: Uuid,
    task: MiningTask,
    cancel: CancellationToken,
    exhausted: HashSet<usize>,
}

struct Coordinator {
    source: Arc<dyn WorkSource>,
    config: PoolConfig,
    shared: Arc<PoolShared>,
    miner: Address,
    workers: BTreeMap<usize, CpuWorker>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    token: CancellationToken,
    job: Option<Job>,
    retired: VecDeque<Job>,
}

impl Coordinator {
    fn new(
        source: Arc<dyn WorkSource>,
        config: PoolConfig,
        shared: Arc<PoolShared>,
        miner: Address,
        token: CancellationToken,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let workers = (0..config.workers.max(1))
            .map(|id| {
                shared.workers.insert(id, WorkerStats::new(id));
                (id, CpuWorker::spawn(id, events_tx.clone(), config.progress_interval))
            })
            .collect();

        Self {
            source,
            config,
            shared,
            miner,
            workers,
            events,
            token,
            job: None,
            retired: VecDeque::with_capacity(RETIRED_JOBS),
        }
    }

    async fn run(mut self) {
        self.issue_job().await;

        let period = self.config.job_refresh_interval.max(Duration::from_millis(10));
        let mut refresh = tokio::time::interval(period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh.tick().await;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = refresh.tick() => self.check_head().await,
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }

            if self.workers.is_empty() {
                warn!("All workers have exited, stopping the pool");
                break;
            }
        }

        self.shutdown().await;
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress {
                worker_id,
                job_id,
                progress,
            } => {
                if let Some(mut stats) = self.shared.workers.get_mut(&worker_id) {
                    stats.record_progress(job_id, &progress);
                }
            }
            WorkerEvent::Found {
                worker_id,
                job_id,
                nonce,
                hash,
                hashes,
            } => {
                if let Some(mut stats) = self.shared.workers.get_mut(&worker_id) {
                    stats.record_hashes(job_id, hashes);
                    stats.solutions_found += 1;
                    stats.state = WorkerState::Idle;
                }
                self.shared.blocks_found.fetch_add(1, Ordering::Relaxed);
                self.on_found(worker_id, job_id, nonce, hash).await;
            }
            WorkerEvent::Exhausted {
                worker_id,
                job_id,
                hashes,
            } => {
                if let Some(mut stats) = self.shared.workers.get_mut(&worker_id) {
                    stats.record_hashes(job_id, hashes);
                    stats.state = WorkerState::Idle;
                }
                self.on_exhausted(worker_id, job_id).await;
            }
            WorkerEvent::Exited { worker_id, reason } => {
                if let Some(mut stats) = self.shared.workers.get_mut(&worker_id) {
                    stats.state = WorkerState::Exited;
                    stats.hash_rate = HashRate::default();
                }
                if let Some(worker) = self.workers.remove(&worker_id) {
                    worker.join().await;
                }
                if reason == "shutdown" {
                    debug!(worker_id, "Worker exited");
                } else {
                    warn!(worker_id, reason = %reason, remaining = self.workers.len(), "Worker exited unexpectedly");
                }
            }
        }
    }

    async fn on_found(&mut self, worker_id: usize, job_id: Uuid, nonce: Nonce, hash: Hash256) {
        let (block, was_current) = match self.job.take() {
            Some(job) if job.id == job_id => {
                job.cancel.cancel();
                let block = job.task.seal(nonce, hash);
                self.retire(job);
                (block, true)
            }
            current => {
                self.job = current;
                match self.retired.iter().find(|job| job.id == job_id) {
                    Some(job) => (job.task.seal(nonce, hash), false),
                    None => {
                        debug!(worker_id, job_id = %job_id, "Dropped solution for an unknown job");
                        self.shared.stale_results.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }
        };

        info!(worker_id, index = block.index, hash = %block.hash, "Submitting solution");
        let advanced = self.submit(block).await;

        if self.token.is_cancelled() {
            return;
        }
        if was_current || advanced {
            self.issue_job().await;
        }
    }

    /// Submit until accepted, stale, rejected, or the pool stops.
    /// Returns true when the chain advanced.
    async fn submit(&mut self, block: Block) -> bool {
        let mut backoff = self.config.backoff.to_backoff();
        loop {
            match self.source.submit(block.clone(), &self.miner).await {
                Ok(height) => {
                    self.shared.blocks_accepted.fetch_add(1, Ordering::Relaxed);
                    self.resume();
                    info!(height, hash = %block.hash, hash_rate = %self.total_hash_rate(), "Block accepted");
                    return true;
                }
                Err(e) if e.is_stale() => {
                    self.shared.stale_results.fetch_add(1, Ordering::Relaxed);
                    self.resume();
                    debug!(index = block.index, reason = %e, "Dropped stale solution");
                    return false;
                }
                Err(e) if e.is_persistence_failure() || e.is_retryable() => {
                    if !self.shared.paused.swap(true, Ordering::SeqCst) {
                        warn!(index = block.index, error = %e, "Solution could not be stored, pausing new jobs");
                    }
                    let delay = Duration::from_millis(backoff.next_delay());
                    debug!(attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, "Retrying submission");
                    tokio::select! {
                        _ = self.token.cancelled() => {
                            warn!(index = block.index, "Pool stopped with an unsubmitted solution");
                            return false;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    self.resume();
                    warn!(index = block.index, reason = %e, "Solution rejected");
                    return false;
                }
            }
        }
    }

    fn total_hash_rate(&self) -> HashRate {
        live_hash_rate(self.shared.workers.iter().map(|entry| entry.value().clone()))
    }

    fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            info!("Store recovered, resuming");
        }
    }

    async fn on_exhausted(&mut self, worker_id: usize, job_id: Uuid) {
        let all_exhausted = match self.job.as_mut() {
            Some(job) if job.id == job_id => {
                job.exhausted.insert(worker_id);
                self.workers.keys().all(|id| job.exhausted.contains(id))
            }
            _ => false,
        };
        if all_exhausted {
            info!(job_id = %job_id, "Nonce space exhausted, rebuilding job");
            self.issue_job().await;
        }
    }

    async fn check_head(&mut self) {
        let Some(previous) = self.job.as_ref().map(|job| job.task.previous_hash) else {
            self.issue_job().await;
            return;
        };
        match self.source.head().await {
            Ok(head) if head != previous => {
                info!(head = %head, "Chain head moved, refreshing job");
                self.issue_job().await;
            }
            Ok(_) => {}
            Err(e) => warn!(source = self.source.name(), error = %e, "Failed to poll chain head"),
        }
    }

    /// Cancel the current job and hand a fresh one to every live worker
    async fn issue_job(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel.cancel();
            self.retire(job);
        }
        if self.workers.is_empty() {
            return;
        }

        let task = match self.source.mining_task(&self.miner).await {
            Ok(task) => task,
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "Failed to fetch mining task");
                *self.shared.current_job.write() = None;
                return;
            }
        };

        let job = Job {
            id: Uuid::new_v4(),
            cancel: self.token.child_token(),
            task,
            exhausted: HashSet::new(),
        };
        let hasher = Arc::new(job.task.prefix_hasher());
        let target = job.task.target();
        let ranges = NonceRange::partition(self.workers.len());

        for ((id, worker), range) in self.workers.iter().zip(ranges) {
            let assignment = Assignment {
                job_id: job.id,
                hasher: Arc::clone(&hasher),
                target,
                range,
                cancel: job.cancel.clone(),
            };
            match worker.assign(assignment) {
                Ok(()) => {
                    if let Some(mut stats) = self.shared.workers.get_mut(id) {
                        stats.state = WorkerState::Mining;
                    }
                }
                Err(e) => warn!(worker_id = id, error = %e, "Failed to assign job"),
            }
        }

        self.shared.jobs_issued.fetch_add(1, Ordering::Relaxed);
        *self.shared.current_job.write() = Some(JobInfo {
            job_id: job.id,
            index: job.task.index,
            previous_hash: job.task.previous_hash,
            difficulty: job.task.difficulty,
            transactions: job.task.transactions.len(),
        });
        debug!(
            job_id = %job.id,
            index = job.task.index,
            difficulty = %job.task.difficulty,
            workers = self.workers.len(),
            "Issued job"
        );
        self.job = Some(job);
    }

    fn retire(&mut self, job: Job) {
        self.retired.push_front(job);
        self.retired.truncate(RETIRED_JOBS);
    }

    async fn shutdown(mut self) {
        if let Some(job) = self.job.take() {
            job.cancel.cancel();
        }
        for worker in self.workers.values() {
            worker.shutdown();
        }
        let workers = std::mem::take(&mut self.workers);
        futures::future::join_all(workers.into_values().map(CpuWorker::join)).await;

        for mut entry in self.shared.workers.iter_mut() {
            entry.state = WorkerState::Exited;
            entry.hash_rate = HashRate::default();
        }
        *self.shared.current_job.write() = None;
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        info!(
            blocks_accepted = self.shared.blocks_accepted.load(Ordering::Relaxed),
            "Mining pool stopped"
        );
    }
}
