//! Delivery speed meter.
//!
//! Bucketed sliding window: the window is split into fixed slots so memory
//! stays bounded regardless of throughput. The figure is approximate by
//! design of the diagnostics that read it.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

const SLOTS: u32 = 60;
const ONE_MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub(crate) struct SpeedMeter {
    window: Duration,
    slot: Duration,
    buckets: VecDeque<(Instant, u64)>,
}

impl SpeedMeter {
    pub(crate) fn new(window: Duration) -> Self {
        let window = window.max(Duration::from_millis(SLOTS as u64));
        Self {
            window,
            slot: window / SLOTS,
            buckets: VecDeque::with_capacity(SLOTS as usize + 1),
        }
    }

    /// Count one delivered message.
    pub(crate) fn record(&mut self, now: Instant) {
        self.evict(now);
        match self.buckets.back_mut() {
            Some((start, count)) if now.duration_since(*start) < self.slot => *count += 1,
            _ => self.buckets.push_back((now, 1)),
        }
    }

    /// Deliveries per minute over the trailing window.
    pub(crate) fn per_minute(&mut self, now: Instant) -> u64 {
        self.evict(now);
        let total: u64 = self.buckets.iter().map(|(_, count)| count).sum();
        if self.window == ONE_MINUTE {
            total
        } else {
            (total as f64 * ONE_MINUTE.as_secs_f64() / self.window.as_secs_f64()).round() as u64
        }
    }

    pub(crate) fn reset(&mut self) {
        self.buckets.clear();
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(start, _)) = self.buckets.front() {
            if now.duration_since(start) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}
