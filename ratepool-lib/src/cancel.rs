//! Cancellation controller.
//!
//! Every source of "stop now" (process signals, a run deadline, an explicit
//! API call) converges on one [`CancellationToken`]. The first request wins:
//! it records its [`StopReason`] and cancels the token. Later requests change
//! nothing.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// SIGINT or SIGTERM
    Interrupt,
    /// The run duration elapsed
    Deadline,
    /// An explicit `request_stop` call
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupt => write!(f, "interrupted"),
            StopReason::Deadline => write!(f, "deadline reached"),
            StopReason::Requested => write!(f, "stop requested"),
        }
    }
}

/// Read side of the stop flag.
///
/// Cloned into every worker. Once set it stays set.
#[derive(Debug, Clone)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Owner of the stop flag and of the reason it was set.
///
/// Cheap to clone; all clones control the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl CancellationController {
    /// Create a controller with the flag unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// A read-only view of the flag for workers.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            token: self.token.clone(),
        }
    }

    /// Set the stop flag.
    ///
    /// Returns `true` if this call set it, `false` if it was already set.
    /// Never blocks.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        if self.reason.set(reason).is_err() {
            debug!(%reason, "stop already requested, ignoring");
            return false;
        }
        info!(%reason, "shutdown requested");
        self.token.cancel();
        true
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason recorded by the first stop request.
    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Request a stop once `after` has elapsed.
    ///
    /// The task exits early if the flag is set by something else first.
    pub fn spawn_deadline(&self, after: Duration) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = controller.token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    controller.request_stop(StopReason::Deadline);
                }
            }
        })
    }

    /// Map SIGINT (and SIGTERM on unix) to a stop request.
    ///
    /// The listener exits after the first signal or once the flag is set.
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = controller.token.cancelled() => {}
                _ = wait_for_signal() => {
                    controller.request_stop(StopReason::Interrupt);
                }
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = wait_for_ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("failed to install SIGTERM handler: {}", e);
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        // Without a handler the only way out is another stop source.
        std::future::pending::<()>().await;
    }
}
