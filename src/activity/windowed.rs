//! Sliding-window activity tracker with start/stop hysteresis

use super::ActivityTracker;
use crate::types::{ActivityConfig, TimestampedChange};
use std::collections::VecDeque;

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Default)]
pub struct ActivityStats {
    pub changes_recorded: u64,
    pub streams_started: u64,
    pub streams_stopped: u64,
    pub resets: u64,
}

/// Classifies damage by rate, duration and covered area over a time window.
///
/// Streaming starts when the window holds at least `start_min_events`
/// changes spread over `start_min_span_ms` and covering `start_min_area`
/// pixels. It stops on `idle_timeout_ms` of silence or when the window
/// thins out below `stop_below_events`.
pub struct WindowedActivityTracker {
    config: ActivityConfig,
    window: VecDeque<TimestampedChange>,
    window_area: u64,
    last_change_at: Option<u64>,
    streaming: bool,
    stats: ActivityStats,
}

impl WindowedActivityTracker {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            window_area: 0,
            last_change_at: None,
            streaming: false,
            stats: ActivityStats::default(),
        }
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    pub fn stats(&self) -> &ActivityStats {
        &self.stats
    }

    /// Changes currently remembered
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Sum of the areas of the remembered changes
    pub fn window_area(&self) -> u64 {
        self.window_area
    }

    fn window_span(&self) -> u64 {
        match (self.window.front(), self.window.back()) {
            (Some(first), Some(last)) => last
                .observed_at_millis
                .saturating_sub(first.observed_at_millis),
            _ => 0,
        }
    }

    fn evict(&mut self, now_millis: u64) {
        while let Some(front) = self.window.front() {
            if now_millis.saturating_sub(front.observed_at_millis) < self.config.window_ms {
                break;
            }
            self.window_area = self.window_area.saturating_sub(front.region.area());
            self.window.pop_front();
        }
    }

    fn reevaluate(&mut self, now_millis: u64) {
        if self.streaming {
            let silent_for = self
                .last_change_at
                .map(|t| now_millis.saturating_sub(t));
            let expired = silent_for.map_or(true, |s| s >= self.config.idle_timeout_ms);
            if expired || self.window.len() < self.config.stop_below_events {
                self.streaming = false;
                self.stats.streams_stopped += 1;
                log::debug!(
                    "Activity stopped: silent for {:?}ms, {} changes in window",
                    silent_for,
                    self.window.len()
                );
            }
        } else if self.window.len() >= self.config.start_min_events
            && self.window_span() >= self.config.start_min_span_ms
            && self.window_area >= self.config.start_min_area
        {
            self.streaming = true;
            self.stats.streams_started += 1;
            log::debug!(
                "Activity started: {} changes over {}ms covering {} px",
                self.window.len(),
                self.window_span(),
                self.window_area
            );
        }
    }
}

impl Default for WindowedActivityTracker {
    fn default() -> Self {
        Self::new(ActivityConfig::default())
    }
}

impl ActivityTracker for WindowedActivityTracker {
    fn record_change(&mut self, change: TimestampedChange) {
        // Late stamps are clamped so the window stays ordered
        let observed_at = self
            .last_change_at
            .map_or(change.observed_at_millis, |last| {
                last.max(change.observed_at_millis)
            });
        let change = TimestampedChange::new(change.region, observed_at);

        self.stats.changes_recorded += 1;
        self.window.push_back(change);
        self.window_area += change.region.area();
        self.last_change_at = Some(observed_at);

        self.evict(observed_at);
        self.reevaluate(observed_at);
    }

    fn tick(&mut self, now_millis: u64) {
        self.evict(now_millis);
        self.reevaluate(now_millis);
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn reset(&mut self) {
        self.window.clear();
        self.window_area = 0;
        self.last_change_at = None;
        self.streaming = false;
        self.stats.resets += 1;
    }
}
