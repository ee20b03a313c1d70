//! Result collection and the final report.
//!
//! A single collector task drains the result channel until every worker has
//! dropped its sender, forwarding each result to an optional [`ResultSink`]
//! and folding it into a [`Tally`]. Once the run is over the tally is
//! finalized into an immutable [`Report`].

use crate::cancel::StopReason;
use crate::pool::PoolState;
use crate::types::{serialize_millis, serialize_opt_millis, JobResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives every result as it arrives.
///
/// Called from the collector task, one result at a time, in arrival order.
/// Implementations should return quickly.
pub trait ResultSink: Send + Sync {
    /// Handle one result.
    fn record(&self, result: &JobResult);
}

impl ResultSink for mpsc::UnboundedSender<JobResult> {
    fn record(&self, result: &JobResult) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(result.clone());
    }
}

/// Drains the result channel into a [`Tally`].
pub struct ResultCollector {
    results: mpsc::UnboundedReceiver<JobResult>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl ResultCollector {
    /// Create a collector over `results`, forwarding to `sink` if given.
    pub fn new(
        results: mpsc::UnboundedReceiver<JobResult>,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> Self {
        Self { results, sink }
    }

    /// Consume results until the channel closes.
    pub async fn collect(mut self) -> Tally {
        let mut tally = Tally::default();
        while let Some(result) = self.results.recv().await {
            if let Some(sink) = &self.sink {
                sink.record(&result);
            }
            tally.record(&result);
        }
        debug!(observed = tally.observed(), "result channel closed");
        tally
    }
}

/// Running aggregate of results.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    success: usize,
    failure: usize,
    retryable: usize,
    status_codes: BTreeMap<u16, usize>,
    errors: BTreeMap<String, usize>,
    fastest: Option<Duration>,
    slowest: Option<Duration>,
    total_latency: Duration,
}

impl Tally {
    /// Fold one result into the tally.
    pub fn record(&mut self, result: &JobResult) {
        if result.is_success() {
            self.success += 1;
        } else {
            self.failure += 1;
            if result.retryable {
                self.retryable += 1;
            }
        }

        if let Some(code) = result.status_code {
            *self.status_codes.entry(code).or_default() += 1;
        }
        if let Some(message) = &result.error_message {
            *self.errors.entry(message.clone()).or_default() += 1;
        }

        self.fastest = Some(self.fastest.map_or(result.duration, |d| d.min(result.duration)));
        self.slowest = Some(self.slowest.map_or(result.duration, |d| d.max(result.duration)));
        self.total_latency += result.duration;
    }

    /// Results seen so far.
    pub fn observed(&self) -> usize {
        self.success + self.failure
    }

    /// Build the final report. Consumes the tally, so it happens once.
    pub fn finalize(self, outcome: RunOutcome) -> Report {
        let average = average_latency(self.total_latency, self.observed());

        Report {
            total: outcome.total,
            success: self.success,
            failure: self.failure,
            retryable: self.retryable,
            abandoned: outcome.abandoned,
            elapsed: outcome.elapsed,
            state: outcome.state,
            stop_reason: outcome.stop_reason,
            status_codes: self.status_codes,
            errors: self.errors,
            fastest: self.fastest,
            slowest: self.slowest,
            average,
        }
    }
}

fn average_latency(total: Duration, observed: usize) -> Option<Duration> {
    if observed == 0 {
        return None;
    }
    let nanos = total.as_nanos() / observed as u128;
    Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
}

/// Facts about the run that the collector cannot see.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Wall time since engine start
    pub elapsed: Duration,
    /// Jobs that entered the queue, plus those a stop kept out of it
    pub total: usize,
    /// Jobs that never ran
    pub abandoned: usize,
    /// Terminal pool state
    pub state: PoolState,
    /// Why the run stopped early, if it did
    pub stop_reason: Option<StopReason>,
}

/// Final summary of a run.
///
/// `success + failure + abandoned == total` for every run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Jobs the run was asked to perform
    pub total: usize,
    /// Jobs whose action succeeded
    pub success: usize,
    /// Jobs whose action failed
    pub failure: usize,
    /// Failures that might succeed on resubmission (timeouts, network
    /// errors, 429 and 5xx)
    pub retryable: usize,
    /// Jobs that never ran because the run was stopped
    pub abandoned: usize,
    /// Total wall time
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Terminal pool state
    pub state: PoolState,
    /// Why the run was stopped, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Number of results per status code
    pub status_codes: BTreeMap<u16, usize>,
    /// Number of failures per error message
    pub errors: BTreeMap<String, usize>,
    #[serde(rename = "fastest_ms", serialize_with = "serialize_opt_millis")]
    pub fastest: Option<Duration>,
    #[serde(rename = "slowest_ms", serialize_with = "serialize_opt_millis")]
    pub slowest: Option<Duration>,
    #[serde(rename = "average_ms", serialize_with = "serialize_opt_millis")]
    pub average: Option<Duration>,
}

impl Report {
    /// Jobs that actually ran.
    pub fn completed(&self) -> usize {
        self.success + self.failure
    }

    /// Completed jobs per second of wall time.
    pub fn requests_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed() as f64 / secs
        } else {
            0.0
        }
    }

    /// Whether the run ended because of a stop request.
    pub fn was_stopped(&self) -> bool {
        self.state == PoolState::Stopped
    }

    /// Whether any job failed.
    pub fn has_failures(&self) -> bool {
        self.failure > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobId;

    fn result(id: u64, status: Option<u16>, error: Option<&str>, millis: u64) -> JobResult {
        JobResult {
            job_id: JobId(id),
            target: "http://localhost/".to_string(),
            worker_id: 1,
            status_code: status,
            duration: Duration::from_millis(millis),
            offset: Duration::ZERO,
            content_length: None,
            error_message: error.map(str::to_string),
            error_kind: error.map(|_| "network".to_string()),
            retryable: error.is_some(),
        }
    }

    fn outcome(total: usize, abandoned: usize) -> RunOutcome {
        RunOutcome {
            elapsed: Duration::from_secs(2),
            total,
            abandoned,
            state: PoolState::Completed,
            stop_reason: None,
        }
    }

    #[test]
    fn test_tally_counts_and_latency() {
        let mut tally = Tally::default();
        tally.record(&result(1, Some(200), None, 10));
        tally.record(&result(2, Some(200), None, 30));
        tally.record(&result(3, Some(503), Some("HTTP 503"), 20));
        tally.record(&result(4, None, Some("refused"), 40));

        let report = tally.finalize(outcome(4, 0));
        assert_eq!(report.success, 2);
        assert_eq!(report.failure, 2);
        assert_eq!(report.retryable, 2);
        assert_eq!(report.status_codes.get(&200), Some(&2));
        assert_eq!(report.status_codes.get(&503), Some(&1));
        assert_eq!(report.errors.get("refused"), Some(&1));
        assert_eq!(report.fastest, Some(Duration::from_millis(10)));
        assert_eq!(report.slowest, Some(Duration::from_millis(40)));
        assert_eq!(report.average, Some(Duration::from_millis(25)));
        assert!((report.requests_per_second() - 2.0).abs() < f64::EPSILON);
        assert!(report.has_failures());
    }

    #[test]
    fn test_only_retryable_failures_are_counted() {
        let mut tally = Tally::default();
        tally.record(&result(1, Some(503), Some("HTTP 503"), 10));
        tally.record(&JobResult {
            status_code: Some(404),
            retryable: false,
            ..result(2, Some(404), Some("HTTP 404"), 10)
        });

        let report = tally.finalize(outcome(2, 0));
        assert_eq!(report.failure, 2);
        assert_eq!(report.retryable, 1);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_average_latency_survives_huge_counts() {
        let observed = 1usize << 32;
        let total = Duration::from_millis(3) * (1u32 << 16) * (1u32 << 16);
        assert_eq!(
            average_latency(total, observed),
            Some(Duration::from_millis(3))
        );
        assert_eq!(
            average_latency(Duration::from_secs(9), 4),
            Some(Duration::from_millis(2250))
        );
        assert_eq!(average_latency(Duration::from_secs(1), 0), None);
    }

    #[test]
    fn test_empty_tally_finalizes() {
        let report = Tally::default().finalize(outcome(0, 0));
        assert_eq!(report.completed(), 0);
        assert_eq!(report.average, None);
        assert!(!report.was_stopped());
    }

    #[tokio::test]
    async fn test_collector_forwards_to_sink() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let collector = ResultCollector::new(rx, Some(Arc::new(sink_tx)));

        tx.send(result(1, Some(200), None, 5)).unwrap();
        tx.send(result(2, None, Some("refused"), 5)).unwrap();
        drop(tx);

        let tally = collector.collect().await;
        assert_eq!(tally.observed(), 2);
        assert_eq!(sink_rx.recv().await.unwrap().job_id, JobId(1));
        assert_eq!(sink_rx.recv().await.unwrap().job_id, JobId(2));
    }

    #[test]
    fn test_report_json_shape() {
        let mut tally = Tally::default();
        tally.record(&result(1, Some(200), None, 12));
        let mut run = outcome(3, 2);
        run.state = PoolState::Stopped;
        run.stop_reason = Some(StopReason::Interrupt);

        let json = serde_json::to_value(tally.finalize(run)).unwrap();
        assert_eq!(json["total"], 3);
        assert_eq!(json["abandoned"], 2);
        assert_eq!(json["retryable"], 0);
        assert_eq!(json["state"], "stopped");
        assert_eq!(json["stop_reason"], "interrupt");
        assert_eq!(json["elapsed_ms"], 2000.0);
        assert_eq!(json["status_codes"]["200"], 1);
    }
}
