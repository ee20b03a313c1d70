//! The execution engine.
//!
//! [`Engine`] wires the pieces together for one run: a producer task feeds
//! the bounded queue, the worker pool drains it under the rate limiter, a
//! collector task folds results into a tally, and the cancellation
//! controller converges signals, the deadline and API calls into one stop
//! flag. When the pool reports that every worker has finished, leftover
//! jobs are drained and counted, and the report is finalized.

use crate::action::JobAction;
use crate::cancel::{CancellationController, StopSignal};
use crate::error::PoolError;
use crate::limiter::limiters_for;
use crate::pool::WorkerPool;
use crate::queue::{job_queue, JobSender, JobSource};
use crate::report::{Report, ResultCollector, ResultSink, RunOutcome, Tally};
use crate::types::{EngineConfig, Job, StopCondition};
use crate::worker::{Worker, WorkerContext};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bounded-concurrency, rate-limited job runner.
///
/// An engine performs exactly one run: [`Engine::run`] consumes it. The start
/// instant used for result offsets and the report's wall time is captured
/// when the engine is created.
///
/// # Example
///
/// ```rust,no_run
/// use ratepool_lib::{Engine, EngineConfig, HttpAction, JobSource};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = EngineConfig::default()
///         .with_workers(4)
///         .with_requests(100)
///         .with_qps(20.0);
///     let action = HttpAction::new(Duration::from_secs(5))?;
///
///     let engine = Engine::new(config, action)?;
///     let targets = vec!["http://localhost:8080/health".to_string()];
///     let report = engine.run(JobSource::cycle(targets)).await?;
///
///     println!("{} ok, {} failed", report.success, report.failure);
///     Ok(())
/// }
/// ```
pub struct Engine {
    config: EngineConfig,
    action: Arc<dyn JobAction>,
    sink: Option<Arc<dyn ResultSink>>,
    controller: CancellationController,
    started: Instant,
}

impl Engine {
    /// Create an engine that runs `action` for every job.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` if the configuration is invalid. Nothing is
    /// started in that case.
    pub fn new<A: JobAction + 'static>(config: EngineConfig, action: A) -> Result<Self, PoolError> {
        Self::with_shared_action(config, Arc::new(action))
    }

    /// Create an engine around an action that is already shared.
    pub fn with_shared_action(
        config: EngineConfig,
        action: Arc<dyn JobAction>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        Ok(Self {
            config,
            action,
            sink: None,
            controller: CancellationController::new(),
            started: Instant::now(),
        })
    }

    /// Forward every result to `sink` as it arrives.
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// A handle that can stop the run from anywhere.
    pub fn stop_handle(&self) -> CancellationController {
        self.controller.clone()
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// When this engine was created.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Run `targets` according to the configured stop condition.
    ///
    /// With a job count the targets are cycled until `requests` jobs were
    /// produced; with a duration they are cycled until the deadline fires.
    pub async fn run_targets(self, targets: Vec<String>) -> Result<Report, PoolError> {
        let source = match self.config.stop_condition() {
            StopCondition::Count(requests) => JobSource::repeat(targets, requests),
            StopCondition::Deadline(_) => JobSource::cycle(targets),
        };
        self.run(source).await
    }

    /// Run every job from `jobs` through the pool and return the report.
    ///
    /// Jobs are pulled lazily, so an endless source is fine when a duration
    /// is configured. With a job count at most `requests` jobs are taken.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` only for failures of the engine itself. Failed
    /// jobs are part of the report.
    pub async fn run<I>(self, jobs: I) -> Result<Report, PoolError>
    where
        I: IntoIterator<Item = Job>,
        I::IntoIter: Send + 'static,
    {
        let Engine {
            config,
            action,
            sink,
            controller,
            started,
        } = self;

        let mut background = Vec::new();
        if config.handle_signals {
            background.push(controller.spawn_signal_listener());
        }

        // In count mode the source is finite, so jobs it still holds after a
        // stop can be counted as abandoned.
        let (jobs, count_leftovers): (Box<dyn Iterator<Item = Job> + Send>, bool) =
            match config.stop_condition() {
                StopCondition::Count(requests) => (Box::new(jobs.into_iter().take(requests)), true),
                StopCondition::Deadline(duration) => {
                    background.push(controller.spawn_deadline(duration));
                    (Box::new(jobs.into_iter()), false)
                }
            };

        info!(
            workers = config.workers,
            qps = config.qps,
            scope = %config.limiter_scope,
            "starting run"
        );

        let (queue_tx, queue_rx) = job_queue(config.queue_capacity);
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let collector = tokio::spawn(ResultCollector::new(results_rx, sink).collect());
        let producer = tokio::spawn(produce(
            jobs,
            queue_tx,
            controller.signal(),
            count_leftovers,
        ));

        let ctx = WorkerContext {
            queue: queue_rx.clone(),
            action,
            results: results_tx,
            stop: controller.signal(),
            in_flight: config.in_flight,
            timeout: config.timeout,
            started,
        };
        let limiters = limiters_for(config.limiter_scope, config.qps, config.workers);

        let mut pool = WorkerPool::new(controller.clone());
        let launched = pool.start(config.workers, |id| {
            Worker::new(id, limiters[id - 1].clone(), ctx.clone())
        });
        // Workers hold the only remaining result senders.
        drop(ctx);

        if let Err(e) = launched {
            producer.abort();
            for task in &background {
                task.abort();
            }
            return Err(e);
        }

        let state = pool.await_all().await;

        let drained = queue_rx.close_and_drain().await;
        if drained > 0 {
            debug!(drained, "queued jobs abandoned");
        }

        let unsent = match producer.await {
            Ok(produced) => {
                debug!(enqueued = produced.enqueued, unsent = produced.unsent, "producer finished");
                produced.unsent
            }
            Err(e) => {
                warn!("producer task failed: {}", e);
                0
            }
        };

        let tally: Tally = collector
            .await
            .map_err(|e| PoolError::internal(format!("result collector failed: {}", e)))?;

        for task in background {
            task.abort();
        }

        let stats = queue_rx.stats();
        let report = tally.finalize(RunOutcome {
            elapsed: started.elapsed(),
            total: stats.enqueued + unsent,
            abandoned: stats.abandoned + unsent,
            state,
            stop_reason: controller.reason(),
        });

        info!(
            total = report.total,
            success = report.success,
            failure = report.failure,
            abandoned = report.abandoned,
            %state,
            "run finished"
        );
        Ok(report)
    }
}

/// What the producer did with the source.
#[derive(Debug, Clone, Copy, Default)]
struct Produced {
    /// Jobs that entered the queue
    enqueued: usize,
    /// Jobs taken from the source that never entered the queue
    unsent: usize,
}

/// Feed jobs into the queue until the source runs dry, a stop is requested
/// or the queue is closed.
///
/// With `count_leftovers` the rest of the source is drained and counted once
/// feeding ends early. Only pass it for a finite source.
async fn produce(
    mut jobs: Box<dyn Iterator<Item = Job> + Send>,
    queue: JobSender,
    stop: StopSignal,
    count_leftovers: bool,
) -> Produced {
    let mut produced = Produced::default();

    while let Some(job) = jobs.next() {
        let sent = tokio::select! {
            biased;
            _ = stop.stopped() => false,
            sent = queue.enqueue(job) => sent.is_ok(),
        };
        if !sent {
            // The job in hand was dropped with the enqueue future.
            if count_leftovers {
                produced.unsent = 1 + jobs.by_ref().count();
            }
            break;
        }
        produced.enqueued += 1;
    }

    produced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::action_fn;
    use crate::cancel::StopReason;
    use crate::pool::PoolState;
    use crate::types::ActionOutput;
    use std::time::Duration;

    fn ok_engine(config: EngineConfig) -> Engine {
        Engine::new(
            config.with_signal_handling(false),
            action_fn(|_job: Job| async { Ok::<_, PoolError>(ActionOutput::status(200)) }),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = Engine::new(
            EngineConfig::default().with_workers(0),
            action_fn(|_job: Job| async { Ok::<_, PoolError>(ActionOutput::default()) }),
        );
        assert!(matches!(result, Err(PoolError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_count_mode_takes_requests_jobs() {
        let engine = ok_engine(EngineConfig::default().with_workers(2).with_requests(7));
        let report = engine
            .run_targets(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(report.total, 7);
        assert_eq!(report.success, 7);
        assert_eq!(report.abandoned, 0);
        assert_eq!(report.state, PoolState::Completed);
        assert_eq!(report.stop_reason, None);
    }

    #[tokio::test]
    async fn test_stop_before_run_abandons_everything_queued() {
        let engine = ok_engine(EngineConfig::default().with_workers(2).with_requests(50));
        engine.stop_handle().request_stop(StopReason::Requested);

        let report = engine.run_targets(vec!["a".to_string()]).await.unwrap();
        assert_eq!(report.completed(), 0);
        assert_eq!(report.total, 50);
        assert_eq!(report.abandoned, 50);
        assert_eq!(report.state, PoolState::Stopped);
        assert_eq!(report.stop_reason, Some(StopReason::Requested));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_mode_stops_endless_source() {
        let engine = ok_engine(
            EngineConfig::default()
                .with_workers(2)
                .with_qps(10.0)
                .with_duration(Duration::from_secs(1)),
        );

        let report = engine.run_targets(vec!["a".to_string()]).await.unwrap();
        assert_eq!(report.stop_reason, Some(StopReason::Deadline));
        assert_eq!(report.state, PoolState::Stopped);
        assert!(report.completed() <= 11, "completed {}", report.completed());
        assert_eq!(
            report.success + report.failure + report.abandoned,
            report.total
        );
    }
}
