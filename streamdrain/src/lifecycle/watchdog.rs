use std::time::Duration;

use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::types::StopReason;

use super::DrainHandle;

/// Stops a drain once no event has arrived for `threshold`.
///
/// Checks every `poll_interval`, so it fires no earlier than `threshold` after
/// the last event and no later than `threshold + poll_interval`.
#[derive(Debug, Clone, Copy)]
pub struct InactivityWatchdog {
    threshold: Duration,
    poll_interval: Duration,
}

impl InactivityWatchdog {
    /// Watch for `threshold` of silence, checking every `poll_interval`
    pub fn new(threshold: Duration, poll_interval: Duration) -> Self {
        Self {
            threshold,
            poll_interval,
        }
    }

    /// The configured silence threshold
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Run the watchdog as a background task
    pub fn spawn(self, handle: DrainHandle) -> JoinHandle<bool> {
        tokio::spawn(self.watch(handle))
    }

    /// Poll until the drain goes quiet or someone else stops it.
    /// Returns true if the watchdog was the one to stop the drain.
    pub async fn watch(self, handle: DrainHandle) -> bool {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = handle.closed() => {
                    log::debug!("watchdog exiting: drain already stopping");
                    return false;
                }
                _ = interval.tick() => {}
            }
            let idle = handle.activity().idle_for();
            if self.threshold <= idle {
                log::info!(
                    "no events for {}s, stopping receive",
                    self.threshold.as_secs_f64()
                );
                return handle.stop(StopReason::Inactive);
            }
            log::trace!("idle for {idle:?}");
        }
    }
}
