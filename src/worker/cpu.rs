//! CPU mining worker
//!
//! One blocking thread per worker running the nonce search over its assigned
//! range. A panic inside the search is caught and reported as an exit so the
//! rest of the pool keeps going.

use super::{mining_span, Assignment, WorkerCommand, WorkerEvent};
use crate::pow::{search, SearchOutcome};
use crate::{Error, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to a running CPU worker thread
pub struct CpuWorker {
    id: usize,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    handle: JoinHandle<()>,
}

impl CpuWorker {
    /// Start the worker thread; it idles until it receives an assignment
    pub fn spawn(
        id: usize,
        events: mpsc::UnboundedSender<WorkerEvent>,
        progress_interval: Duration,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking(move || {
            run(id, receiver, events, progress_interval);
        });
        debug!(worker_id = id, "Spawned CPU worker");
        Self {
            id,
            commands,
            handle,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Queue an assignment; fails once the worker has exited
    pub fn assign(&self, assignment: Assignment) -> Result<()> {
        self.commands
            .send(WorkerCommand::Mine(assignment))
            .map_err(|_| Error::worker(self.id, "worker has exited"))
    }

    /// Ask the worker to exit after its current search
    pub fn shutdown(&self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }

    #[cfg(test)]
    pub(crate) fn inject_panic(&self) {
        let _ = self.commands.send(WorkerCommand::Panic);
    }

    /// Wait for the thread to finish
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

fn run(
    id: usize,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    progress_interval: Duration,
) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        worker_loop(id, &mut commands, &events, progress_interval)
    }));

    let reason = match result {
        Ok(()) => "shutdown".to_string(),
        Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
    };
    // Close the command channel before announcing the exit
    drop(commands);
    let _ = events.send(WorkerEvent::Exited {
        worker_id: id,
        reason,
    });
}

fn worker_loop(
    id: usize,
    commands: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    events: &mpsc::UnboundedSender<WorkerEvent>,
    progress_interval: Duration,
) {
    while let Some(command) = commands.blocking_recv() {
        match command {
            WorkerCommand::Mine(assignment) => mine(id, assignment, events, progress_interval),
            WorkerCommand::Shutdown => break,
            #[cfg(test)]
            WorkerCommand::Panic => panic!("injected failure in worker {}", id),
        }
    }
}

fn mine(
    id: usize,
    assignment: Assignment,
    events: &mpsc::UnboundedSender<WorkerEvent>,
    progress_interval: Duration,
) {
    let span = mining_span(id, assignment.job_id);
    let _entered = span.enter();
    let job_id = assignment.job_id;

    // Superseded before the thread picked it up
    if assignment.cancel.is_cancelled() {
        return;
    }

    debug!(start = assignment.range.start, last = assignment.range.last, "Searching");
    let outcome = search(
        &assignment.hasher,
        &assignment.target,
        assignment.range,
        &assignment.cancel,
        progress_interval,
        |progress| {
            let _ = events.send(WorkerEvent::Progress {
                worker_id: id,
                job_id,
                progress: progress.clone(),
            });
        },
    );

    match outcome {
        SearchOutcome::Found {
            nonce,
            hash,
            hashes,
        } => {
            info!(nonce = %nonce, hash = %hash, hashes, "Solution found");
            let _ = events.send(WorkerEvent::Found {
                worker_id: id,
                job_id,
                nonce,
                hash,
                hashes,
            });
        }
        SearchOutcome::Exhausted { hashes } => {
            debug!(hashes, "Nonce range exhausted");
            let _ = events.send(WorkerEvent::Exhausted {
                worker_id: id,
                job_id,
                hashes,
            });
        }
        SearchOutcome::Cancelled { hashes } => {
            debug!(hashes, "Search cancelled");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MiningTask;
    use crate::pow::NonceRange;
    use crate::{Difficulty, Hash256};
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn assignment(difficulty: u8, range: NonceRange) -> Assignment {
        let task = MiningTask {
            index: 1,
            previous_hash: Hash256::from_bytes([4u8; 32]),
            transactions: Vec::new(),
            difficulty: Difficulty::new(difficulty).unwrap(),
            timestamp: 1_700_000_000_900,
        };
        Assignment {
            job_id: Uuid::new_v4(),
            hasher: Arc::new(task.prefix_hasher()),
            target: task.target(),
            range,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_worker_finds_solution() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = CpuWorker::spawn(0, tx, Duration::from_secs(1));
        let job = assignment(1, NonceRange::full());
        let job_id = job.job_id;
        worker.assign(job).unwrap();

        let event = rx.recv().await.unwrap();
        assert_matches!(event, WorkerEvent::Found { worker_id: 0, job_id: id, .. } if id == job_id);

        worker.shutdown();
        assert_matches!(rx.recv().await, Some(WorkerEvent::Exited { reason, .. }) if reason == "shutdown");
        worker.join().await;
    }

    #[tokio::test]
    async fn test_worker_reports_exhaustion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = CpuWorker::spawn(2, tx, Duration::from_secs(1));
        worker
            .assign(assignment(64, NonceRange { start: 0, last: 99 }))
            .unwrap();

        assert_matches!(
            rx.recv().await,
            Some(WorkerEvent::Exhausted { worker_id: 2, hashes: 100, .. })
        );
        worker.shutdown();
        worker.join().await;
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = CpuWorker::spawn(1, tx, Duration::from_secs(1));
        worker.inject_panic();

        assert_matches!(
            rx.recv().await,
            Some(WorkerEvent::Exited { worker_id: 1, reason }) if reason.contains("injected failure")
        );
        assert!(worker.assign(assignment(1, NonceRange::full())).is_err());
        worker.join().await;
    }
}
