//! Periodic join rounds against the static addresses.
//!
//! ```text
//!   tick ──▶ need_join() ──None──▶ skip (round in flight)
//!                │
//!              Some(addrs)
//!                │ non-empty
//!                ▼
//!        JoinTransport::join(addrs)
//!                │
//!                ▼
//!         join_completed()
//! ```

use crate::cluster::join_manager::NodeJoinManager;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Membership transport used to contact static addresses.
///
/// Nodes reached this way are expected to be reported back through
/// [`NodeJoinManager::notify_join`] by the membership layer.
#[async_trait]
pub trait JoinTransport: Send + Sync + 'static {
    /// Try to join through `addrs`. Returns how many were reached.
    async fn join(&self, addrs: &[String]) -> Result<usize>;
}

/// Result of a single join round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Another round was already in flight.
    InFlight { version: u64 },
    /// Every static address is already known.
    NothingToJoin { version: u64 },
    /// The transport reached `reached` of `requested` addresses.
    Joined {
        version: u64,
        requested: usize,
        reached: usize,
    },
    /// The transport failed; the round will be retried on the next tick.
    Failed { version: u64, requested: usize },
}

/// Ends the round when dropped, so a cancelled round does not leave the
/// manager stuck in `joining`.
struct RoundGuard<'a> {
    manager: &'a NodeJoinManager,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.manager.join_completed();
    }
}

/// Drives join rounds on a fixed interval until shut down.
pub struct JoinLoop {
    manager: Arc<NodeJoinManager>,
    transport: Arc<dyn JoinTransport>,
    interval: Duration,
}

impl JoinLoop {
    /// Create a join loop.
    pub fn new(
        manager: Arc<NodeJoinManager>,
        transport: Arc<dyn JoinTransport>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            transport,
            interval,
        }
    }

    /// Get the retry interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single join round.
    ///
    /// The round is completed even if the returned future is dropped while
    /// the transport is still joining.
    pub async fn run_once(&self) -> JoinOutcome {
        let (addrs, version) = self.manager.need_join();
        let Some(addrs) = addrs else {
            trace!(version, "Join round already in flight");
            return JoinOutcome::InFlight { version };
        };
        let _round = RoundGuard {
            manager: &self.manager,
        };

        if addrs.is_empty() {
            JoinOutcome::NothingToJoin { version }
        } else {
            let requested = addrs.len();
            match self.transport.join(&addrs).await {
                Ok(reached) => {
                    info!(version, requested, reached, "Joined static addresses");
                    JoinOutcome::Joined {
                        version,
                        requested,
                        reached,
                    }
                }
                Err(e) => {
                    warn!(version, requested, error = %e, "Join attempt failed");
                    JoinOutcome::Failed { version, requested }
                }
            }
        }
    }

    /// Run join rounds every interval until `shutdown_rx` fires or closes.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Join loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.run_once().await;
                }
            }
        }
    }
}
