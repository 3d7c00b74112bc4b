use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::types::StopReason;

/// The time of the last received event, readable from any task without locking.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_activity_nanos: AtomicU64,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    /// A clock whose last activity is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_activity_nanos: AtomicU64::new(0),
        }
    }

    /// Record activity now
    pub fn touch(&self) {
        self.last_activity_nanos
            .store(self.origin.elapsed().as_nanos() as u64, Ordering::Release);
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_nanos(self.last_activity_nanos.load(Ordering::Acquire));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Shared control over one drain: request a stop, see why it stopped, record activity.
///
/// Stopping is idempotent. The first reason recorded wins and later calls are no-ops.
#[derive(Debug, Clone, Default)]
pub struct DrainHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
    activity: Arc<ActivityClock>,
}

impl DrainHandle {
    /// A fresh, running handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the drain to stop taking events and finish. Returns true if this
    /// call was the one that stopped it.
    pub fn close(&self) -> bool {
        self.stop(StopReason::Closed)
    }

    pub(crate) fn stop(&self, reason: StopReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    /// True once any stop was requested
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why the drain was stopped, if it was
    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Resolves once a stop is requested
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The last-activity clock shared with the watchdog
    pub fn activity(&self) -> &ActivityClock {
        &self.activity
    }
}
