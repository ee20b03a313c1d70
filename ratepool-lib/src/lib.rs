//! # Ratepool Library
//!
//! A bounded-concurrency, rate-limited job execution engine.
//!
//! A fixed pool of async workers drains a bounded job queue, performs each
//! job's action under a shared (or per-worker) queries-per-second ceiling,
//! and shuts down cleanly when the jobs run out, a deadline passes, or a
//! stop is requested. Every run ends in a [`Report`] that accounts for each
//! job that entered the queue: it either produced a result or was abandoned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ratepool_lib::{Engine, EngineConfig, HttpAction};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default()
//!         .with_workers(10)
//!         .with_requests(500)
//!         .with_qps(100.0);
//!     let action = HttpAction::new(Duration::from_secs(5))?;
//!
//!     let report = Engine::new(config, action)?
//!         .run_targets(vec!["http://localhost:8080/".to_string()])
//!         .await?;
//!
//!     println!("{} ok / {} failed in {:?}", report.success, report.failure, report.elapsed);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Bounded Queue**: Backpressure between the job source and the workers
//! - **Rate Limiting**: Fixed-interval permits, pool-wide or per worker
//! - **Cooperative Cancellation**: Signals, deadlines and API calls share one stop flag
//! - **Pluggable Actions**: Any [`JobAction`]; HTTP is bundled
//! - **Streaming Results**: Observe each result through a [`ResultSink`]

pub use action::{action_fn, FnAction, HttpAction, JobAction};
pub use cancel::{CancellationController, StopReason, StopSignal};
pub use config::{
    load_env_config, load_env_config_from, ConfigManager, DefaultsConfig, EnvConfig, FileConfig,
    RequestConfig,
};
pub use engine::Engine;
pub use error::PoolError;
pub use limiter::{limiters_for, RateLimiter};
pub use pool::{PoolState, WorkerPool, WorkerState};
pub use queue::{job_queue, JobReceiver, JobSender, JobSource, QueueStats};
pub use report::{Report, ResultCollector, ResultSink, RunOutcome, Tally};
pub use types::{
    ActionOutput, EngineConfig, InFlightPolicy, Job, JobId, JobResult, LimiterScope,
    StopCondition, DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUESTS, MAX_WORKERS,
};
pub use utils::{default_workers, parse_duration_string, parse_header, parse_targets, validate_target};
pub use worker::{Worker, WorkerContext, WorkerExit};

mod action;
mod cancel;
mod config;
mod engine;
mod error;
mod limiter;
mod pool;
mod queue;
mod report;
mod types;
mod utils;
mod worker;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PoolError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
        default_workers: default_workers(),
    }
}

/// Information about the library build and the host it runs on
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
    pub default_workers: usize,
}
