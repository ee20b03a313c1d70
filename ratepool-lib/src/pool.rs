//! Worker pool and dispatcher.
//!
//! The pool launches a fixed number of workers, tracks their lifecycle and
//! turns "every worker has reported" into a single awaitable event.

use crate::cancel::{CancellationController, StopReason};
use crate::error::PoolError;
use crate::worker::{Worker, WorkerExit};
use serde::Serialize;
use std::fmt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a pool.
///
/// `Idle -> Running -> Completed`, or `Idle -> Running -> Draining ->
/// Stopped` when a stop is requested while workers are still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    /// No workers started yet
    Idle,
    /// Workers are processing jobs
    Running,
    /// A stop was requested and workers are winding down
    Draining,
    /// All workers finished after the queue was exhausted
    Completed,
    /// All workers finished after a stop was requested
    Stopped,
}

impl PoolState {
    /// Whether the pool has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoolState::Completed | PoolState::Stopped)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Idle => "idle",
            PoolState::Running => "running",
            PoolState::Draining => "draining",
            PoolState::Completed => "completed",
            PoolState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle of a single worker as seen by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    Finished(WorkerExit),
}

/// Fixed-size pool of workers sharing one queue and one stop flag.
pub struct WorkerPool {
    controller: CancellationController,
    handles: Vec<JoinHandle<WorkerExit>>,
    workers: Vec<WorkerState>,
    finished: bool,
}

impl WorkerPool {
    /// Create an idle pool controlled by `controller`.
    pub fn new(controller: CancellationController) -> Self {
        Self {
            controller,
            handles: Vec::new(),
            workers: Vec::new(),
            finished: false,
        }
    }

    /// Launch exactly `n` workers built by `make_worker(id)` for ids `1..=n`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` if `n` is zero or the pool was already started.
    pub fn start<F>(&mut self, n: usize, mut make_worker: F) -> Result<(), PoolError>
    where
        F: FnMut(usize) -> Worker,
    {
        if n == 0 {
            return Err(PoolError::invalid_config(
                "workers",
                "the pool needs at least one worker",
            ));
        }
        if self.state() != PoolState::Idle {
            return Err(PoolError::internal("worker pool already started"));
        }

        self.workers = vec![WorkerState::NotStarted; n];
        for id in 1..=n {
            let worker = make_worker(id);
            self.handles.push(tokio::spawn(worker.run()));
            self.workers[id - 1] = WorkerState::Running;
        }

        info!(workers = n, "worker pool started");
        Ok(())
    }

    /// Ask every worker to stop. Returns immediately.
    ///
    /// Returns `true` if this call set the stop flag.
    pub fn request_stop(&self) -> bool {
        self.controller.request_stop(StopReason::Requested)
    }

    /// Wait until every worker has reported exactly once.
    ///
    /// A worker that panicked or was aborted is reported as
    /// [`WorkerExit::Fatal`]. Returns the final pool state.
    pub async fn await_all(&mut self) -> PoolState {
        let handles = std::mem::take(&mut self.handles);

        for (index, handle) in handles.into_iter().enumerate() {
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(e) => {
                    warn!(worker = index + 1, "worker task failed: {}", e);
                    WorkerExit::Fatal(e.to_string())
                }
            };
            self.workers[index] = WorkerState::Finished(exit);
        }

        self.finished = true;
        let state = self.state();
        debug!(%state, "all workers finished");
        state
    }

    /// Current pool state.
    pub fn state(&self) -> PoolState {
        if self.workers.is_empty() {
            PoolState::Idle
        } else if self.finished {
            if self.controller.is_stopped() {
                PoolState::Stopped
            } else {
                PoolState::Completed
            }
        } else if self.controller.is_stopped() {
            PoolState::Draining
        } else {
            PoolState::Running
        }
    }

    /// Per-worker states, indexed by `id - 1`.
    pub fn workers(&self) -> &[WorkerState] {
        &self.workers
    }

    /// Number of workers launched.
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}
