//! Core data types for the execution engine.
//!
//! This module defines the main data structures shared by the queue, the
//! workers and the reporter: jobs, per-job results, and the engine
//! configuration.

use crate::error::PoolError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 1024;

/// Default number of jobs when no duration is configured.
pub const DEFAULT_REQUESTS: usize = 200;

/// Default job queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Sequence number assigned to a job by its producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of dispatchable work.
///
/// A job is created by a job source, consumed exactly once by exactly one
/// worker, and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Position of the job in its source
    pub id: JobId,

    /// Target the job's action is performed against (e.g. a URL)
    pub target: String,
}

impl Job {
    /// Create a new job.
    pub fn new<T: Into<String>>(id: u64, target: T) -> Self {
        Self {
            id: JobId(id),
            target: target.into(),
        }
    }
}

/// Result of executing a single job.
///
/// Produced once per executed job, whether the action succeeded or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// The job this result belongs to
    pub job_id: JobId,

    /// The job's target
    pub target: String,

    /// Worker that executed the job (1-based)
    pub worker_id: usize,

    /// Status code reported by the target, if it answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// How long the action took
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    #[serde(deserialize_with = "deserialize_millis")]
    pub duration: Duration,

    /// When the action started, relative to engine start
    #[serde(rename = "offset_ms", serialize_with = "serialize_millis")]
    #[serde(deserialize_with = "deserialize_millis")]
    pub offset: Duration,

    /// Size of the response body, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,

    /// Failure detail; `None` means the job succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Failure category (see [`PoolError::category`])
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Whether the failure might go away on resubmission
    #[serde(default)]
    pub retryable: bool,
}

impl JobResult {
    /// Whether the job's action succeeded.
    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

/// What an action reports back after a successful execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    /// Status code returned by the target
    pub status_code: Option<u16>,

    /// Size of the response body
    pub content_length: Option<u64>,
}

impl ActionOutput {
    /// Output carrying only a status code.
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            content_length: None,
        }
    }
}

/// Whether rate limiting applies to the whole pool or to each worker.
///
/// With `PerWorker` the achievable throughput is `workers * qps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimiterScope {
    /// One limiter shared by every worker (aggregate cap)
    #[default]
    Global,

    /// One limiter per worker (per-worker cap)
    PerWorker,
}

impl fmt::Display for LimiterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterScope::Global => write!(f, "global"),
            LimiterScope::PerWorker => write!(f, "per-worker"),
        }
    }
}

impl FromStr for LimiterScope {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "global" | "pool" => Ok(LimiterScope::Global),
            "per-worker" | "per_worker" | "worker" => Ok(LimiterScope::PerWorker),
            other => Err(PoolError::invalid_config(
                "limiter",
                format!("unknown limiter scope '{}', use 'global' or 'per-worker'", other),
            )),
        }
    }
}

/// What happens to an action that is running when a stop is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InFlightPolicy {
    /// Let the action run to completion; only new work is prevented
    #[default]
    Finish,

    /// Race the action against the stop signal and record it as aborted
    Abort,
}

impl fmt::Display for InFlightPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InFlightPolicy::Finish => write!(f, "finish"),
            InFlightPolicy::Abort => write!(f, "abort"),
        }
    }
}

impl FromStr for InFlightPolicy {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "finish" | "cooperative" => Ok(InFlightPolicy::Finish),
            "abort" => Ok(InFlightPolicy::Abort),
            other => Err(PoolError::invalid_config(
                "in_flight",
                format!("unknown in-flight policy '{}', use 'finish' or 'abort'", other),
            )),
        }
    }
}

/// How a run decides it has produced enough jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Stop after this many jobs have been produced
    Count(usize),

    /// Keep producing until the deadline fires
    Deadline(Duration),
}

/// Configuration options for an engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent workers
    /// Default: available hardware parallelism
    pub workers: usize,

    /// Total number of jobs to run (ignored when `duration` is set)
    /// Default: 200
    pub requests: usize,

    /// Run for this long instead of a fixed job count
    pub duration: Option<Duration>,

    /// Rate limit in queries per second; zero or negative disables it
    pub qps: f64,

    /// Whether `qps` caps the pool or each worker
    pub limiter_scope: LimiterScope,

    /// Capacity of the bounded job queue
    /// Default: 10
    pub queue_capacity: usize,

    /// Treatment of in-flight actions on stop
    pub in_flight: InFlightPolicy,

    /// Timeout for each individual action
    /// Default: 20 seconds
    pub timeout: Duration,

    /// Map SIGINT/SIGTERM to a stop request while running
    pub handle_signals: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: crate::utils::default_workers(),
            requests: DEFAULT_REQUESTS,
            duration: None,
            qps: 0.0,
            limiter_scope: LimiterScope::Global,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            in_flight: InFlightPolicy::Finish,
            timeout: Duration::from_secs(20),
            handle_signals: true,
        }
    }
}

impl EngineConfig {
    /// Set the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the total job count.
    pub fn with_requests(mut self, requests: usize) -> Self {
        self.requests = requests;
        self
    }

    /// Run for a fixed duration; overrides the job count.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the rate limit in queries per second.
    pub fn with_qps(mut self, qps: f64) -> Self {
        self.qps = qps;
        self
    }

    /// Choose whether the rate limit is shared or per worker.
    pub fn with_limiter_scope(mut self, scope: LimiterScope) -> Self {
        self.limiter_scope = scope;
        self
    }

    /// Set the job queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the in-flight policy.
    pub fn with_in_flight(mut self, policy: InFlightPolicy) -> Self {
        self.in_flight = policy;
        self
    }

    /// Set the per-action timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable process signal handling.
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// The effective stop condition; a duration overrides the job count.
    pub fn stop_condition(&self) -> StopCondition {
        match self.duration {
            Some(duration) => StopCondition::Deadline(duration),
            None => StopCondition::Count(self.requests),
        }
    }

    /// Whether any rate limit is configured.
    pub fn is_throttled(&self) -> bool {
        self.qps > 0.0
    }

    /// Check the configuration before anything is started.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::invalid_config(
                "workers",
                "the pool needs at least one worker",
            ));
        }
        if self.workers > MAX_WORKERS {
            return Err(PoolError::invalid_config(
                "workers",
                format!("at most {} workers are supported", MAX_WORKERS),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PoolError::invalid_config(
                "queue_capacity",
                "the job queue needs a capacity of at least 1",
            ));
        }
        if !self.qps.is_finite() {
            return Err(PoolError::invalid_config("qps", "must be a finite number"));
        }
        if self.duration == Some(Duration::ZERO) {
            return Err(PoolError::invalid_config("duration", "must be greater than zero"));
        }
        if self.timeout.is_zero() {
            return Err(PoolError::invalid_config("timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

pub(crate) fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_nanos() as f64 / 1_000_000.0)
}

pub(crate) fn serialize_opt_millis<S: Serializer>(
    d: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => serialize_millis(d, s),
        None => s.serialize_none(),
    }
}

fn deserialize_millis<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let millis = f64::deserialize(d)?;
    if !millis.is_finite() || millis < 0.0 {
        return Err(serde::de::Error::custom("duration must be a non-negative number"));
    }
    Ok(Duration::from_secs_f64(millis / 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_overrides_count() {
        let config = EngineConfig::default().with_requests(50);
        assert_eq!(config.stop_condition(), StopCondition::Count(50));

        let config = config.with_duration(Duration::from_secs(3));
        assert_eq!(
            config.stop_condition(),
            StopCondition::Deadline(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = EngineConfig::default().with_workers(0).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig { ref field, .. } if field == "workers"));
    }

    #[test]
    fn test_validate_rejects_zero_queue_capacity() {
        let result = EngineConfig::default().with_queue_capacity(0).validate();
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_accepts_negative_qps_as_unthrottled() {
        let config = EngineConfig::default().with_qps(-1.0);
        assert!(config.validate().is_ok());
        assert!(!config.is_throttled());
    }

    #[test]
    fn test_validate_rejects_nan_qps() {
        assert!(EngineConfig::default().with_qps(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_default_workers_positive() {
        assert!(EngineConfig::default().workers >= 1);
    }

    #[test]
    fn test_limiter_scope_parsing() {
        assert_eq!("global".parse::<LimiterScope>().unwrap(), LimiterScope::Global);
        assert_eq!(
            "Per-Worker".parse::<LimiterScope>().unwrap(),
            LimiterScope::PerWorker
        );
        assert!("sometimes".parse::<LimiterScope>().is_err());
    }

    #[test]
    fn test_in_flight_parsing() {
        assert_eq!("abort".parse::<InFlightPolicy>().unwrap(), InFlightPolicy::Abort);
        assert_eq!("finish".parse::<InFlightPolicy>().unwrap(), InFlightPolicy::Finish);
        assert!("kill".parse::<InFlightPolicy>().is_err());
    }

    #[test]
    fn test_job_result_serializes_millis() {
        let result = JobResult {
            job_id: JobId(3),
            target: "http://localhost".to_string(),
            worker_id: 1,
            status_code: Some(200),
            duration: Duration::from_millis(15),
            offset: Duration::from_millis(2),
            content_length: None,
            error_message: None,
            error_kind: None,
            retryable: false,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["job_id"], 3);
        assert_eq!(json["duration_ms"], 15.0);
        assert!(json.get("error_message").is_none());
    }
}
