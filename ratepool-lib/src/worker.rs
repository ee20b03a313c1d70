//! A single worker.
//!
//! Each worker loops: check the stop flag, take a job, wait for a permit,
//! run the action, send the result. Action failures become failed results;
//! the loop only ends when the queue is exhausted, a stop is requested, or
//! the result channel is gone.

use crate::action::JobAction;
use crate::cancel::StopSignal;
use crate::error::PoolError;
use crate::limiter::RateLimiter;
use crate::queue::JobReceiver;
use crate::types::{ActionOutput, InFlightPolicy, Job, JobResult};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue was closed and drained
    Exhausted,
    /// A stop was requested
    Cancelled,
    /// The worker could not continue
    Fatal(String),
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Exhausted => write!(f, "exhausted"),
            WorkerExit::Cancelled => write!(f, "cancelled"),
            WorkerExit::Fatal(detail) => write!(f, "fatal: {}", detail),
        }
    }
}

/// Everything the workers of one run share.
#[derive(Clone)]
pub struct WorkerContext {
    /// Consumer side of the job queue
    pub queue: JobReceiver,
    /// The action executed for every job
    pub action: Arc<dyn JobAction>,
    /// Where results go
    pub results: mpsc::UnboundedSender<JobResult>,
    /// Stop flag
    pub stop: StopSignal,
    /// Treatment of an action running when a stop arrives
    pub in_flight: InFlightPolicy,
    /// Upper bound on a single action
    pub timeout: Duration,
    /// Engine start, for result offsets
    pub started: Instant,
}

/// One worker of the pool.
pub struct Worker {
    id: usize,
    limiter: Arc<RateLimiter>,
    ctx: WorkerContext,
}

impl Worker {
    /// Create worker `id` (1-based) gated by `limiter`.
    pub fn new(id: usize, limiter: Arc<RateLimiter>, ctx: WorkerContext) -> Self {
        Self { id, limiter, ctx }
    }

    /// This worker's id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run until the queue is exhausted or a stop is requested.
    pub async fn run(self) -> WorkerExit {
        debug!(worker = self.id, "worker started");
        let exit = self.work_loop().await;
        debug!(worker = self.id, %exit, "worker finished");
        exit
    }

    async fn work_loop(&self) -> WorkerExit {
        let stop = &self.ctx.stop;

        loop {
            if stop.is_stopped() {
                return WorkerExit::Cancelled;
            }

            let job = tokio::select! {
                biased;
                _ = stop.stopped() => return WorkerExit::Cancelled,
                job = self.ctx.queue.dequeue() => match job {
                    Some(job) => job,
                    None => return WorkerExit::Exhausted,
                },
            };

            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    trace!(worker = self.id, job = %job.id, "stopped while waiting for permit");
                    self.ctx.queue.mark_abandoned(1);
                    return WorkerExit::Cancelled;
                }
                _ = self.limiter.next() => {}
            }

            let result = self.execute(job).await;
            if self.ctx.results.send(result).is_err() {
                warn!(worker = self.id, "result channel closed");
                self.ctx.queue.mark_abandoned(1);
                return WorkerExit::Fatal("result channel closed".to_string());
            }
        }
    }

    async fn execute(&self, job: Job) -> JobResult {
        let offset = self.ctx.started.elapsed();
        let begin = Instant::now();

        let outcome = match self.ctx.in_flight {
            InFlightPolicy::Finish => self.perform(&job).await,
            InFlightPolicy::Abort => {
                tokio::select! {
                    biased;
                    _ = self.ctx.stop.stopped() => Err(PoolError::aborted(&job.target)),
                    outcome = self.perform(&job) => outcome,
                }
            }
        };

        let duration = begin.elapsed();
        trace!(worker = self.id, job = %job.id, ?duration, ok = outcome.is_ok(), "job done");

        match outcome {
            Ok(output) => JobResult {
                job_id: job.id,
                target: job.target,
                worker_id: self.id,
                status_code: output.status_code,
                duration,
                offset,
                content_length: output.content_length,
                error_message: None,
                error_kind: None,
                retryable: false,
            },
            Err(err) => JobResult {
                job_id: job.id,
                target: job.target,
                worker_id: self.id,
                status_code: err.status_code(),
                duration,
                offset,
                content_length: None,
                error_message: Some(err.to_string()),
                error_kind: Some(err.category().to_string()),
                retryable: err.is_retryable(),
            },
        }
    }

    /// Run the action with the per-action timeout, turning a panic into an
    /// error so the job still produces a result.
    async fn perform(&self, job: &Job) -> Result<ActionOutput, PoolError> {
        let action = AssertUnwindSafe(self.ctx.action.execute(job)).catch_unwind();

        match tokio::time::timeout(self.ctx.timeout, action).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => Err(PoolError::internal(format!(
                "action panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(PoolError::timeout(
                format!("job {} ({})", job.id, job.target),
                self.ctx.timeout,
            )),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
