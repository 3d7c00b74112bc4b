//! Running a drain: intake, inactivity detection and orderly shutdown.

mod controller;
mod handle;
mod trigger;
mod watchdog;

pub use controller::{DrainReport, LifecycleController};
pub use handle::{ActivityClock, DrainHandle};
pub use trigger::TriggerHandler;
pub use watchdog::InactivityWatchdog;

/// How often the controller reports progress, in processed events
pub const PROGRESS_INTERVAL: u64 = 100;
