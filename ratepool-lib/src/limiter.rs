//! Fixed-interval rate limiter.
//!
//! Permits are ticks of a [`tokio::time::Interval`] spaced `1 / qps` apart.
//! The interval uses [`MissedTickBehavior::Delay`], so a consumer that falls
//! behind gets one permit immediately and the schedule restarts from there:
//! permits never accumulate into a catch-up burst.

use crate::types::LimiterScope;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

/// Gate that hands out one permit per interval.
#[derive(Debug)]
pub struct RateLimiter {
    period: Option<Duration>,
    ticker: Mutex<Option<Interval>>,
}

impl RateLimiter {
    /// Create a limiter for `qps` queries per second.
    ///
    /// A non-positive rate yields a limiter that never waits.
    pub fn new(qps: f64) -> Self {
        let period = if qps > 0.0 && qps.is_finite() {
            Some(Duration::from_secs_f64(1.0 / qps)).filter(|p| !p.is_zero())
        } else {
            None
        };

        Self {
            period,
            ticker: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    pub fn unthrottled() -> Self {
        Self::new(0.0)
    }

    /// Interval between permits, `None` when unthrottled.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Wait for the next permit.
    ///
    /// The first permit is immediate. Concurrent callers queue fairly on the
    /// limiter and each receives a distinct tick. Cancel safe.
    pub async fn next(&self) {
        let Some(period) = self.period else {
            return;
        };

        let mut ticker = self.ticker.lock().await;
        // Created lazily so construction does not need a runtime.
        let ticker = ticker.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        ticker.tick().await;
    }
}

/// Build one limiter handle per worker according to `scope`.
///
/// With [`LimiterScope::Global`] every handle points at the same limiter;
/// with [`LimiterScope::PerWorker`] each worker gets its own.
pub fn limiters_for(scope: LimiterScope, qps: f64, workers: usize) -> Vec<Arc<RateLimiter>> {
    debug!(%scope, qps, workers, "building rate limiters");
    match scope {
        LimiterScope::Global => {
            let shared = Arc::new(RateLimiter::new(qps));
            vec![shared; workers]
        }
        LimiterScope::PerWorker => (0..workers).map(|_| Arc::new(RateLimiter::new(qps))).collect(),
    }
}
