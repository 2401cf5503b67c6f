//! Screen activity classification
//!
//! An [`ActivityTracker`] ingests timestamped change regions and decides
//! whether recent damage is sustained motion (stream it) or a sparse set of
//! redraws (grab stills).

pub mod windowed;

pub use windowed::{ActivityStats, WindowedActivityTracker};

use crate::types::{ActivityVerdict, TimestampedChange};

/// Contract between the orchestrator and an activity classifier.
///
/// Accessed from a single thread; the orchestrator is the only writer.
pub trait ActivityTracker {
    /// Ingest one change and recompute the verdict
    fn record_change(&mut self, change: TimestampedChange);

    /// Periodic timeout hook so stale activity expires without new damage
    fn tick(&mut self, now_millis: u64);

    /// Current verdict: sustained stream or idle
    fn is_streaming(&self) -> bool;

    /// Forget all history, back to idle (surface reconfiguration)
    fn reset(&mut self);

    fn verdict(&self) -> ActivityVerdict {
        ActivityVerdict::from_streaming(self.is_streaming())
    }
}
