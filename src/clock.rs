//! Millisecond monotonic time source

use once_cell::sync::Lazy;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic millisecond clock used to stamp change events and ticks
pub trait Clock {
    fn now_millis(&self) -> u64;
}

/// Milliseconds since the first time any `MonotonicClock` was read in this process
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        EPOCH.elapsed().as_millis() as u64
    }
}
