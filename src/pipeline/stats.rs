//! Lock-free counters for the frame stream

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;

/// Counters updated by the producer thread and the control surface
#[derive(Default)]
pub struct StreamStats {
    counters: CachePadded<Counters>,
}

#[derive(Default)]
struct Counters {
    frames_delivered: AtomicU64,
    frames_skipped: AtomicU64,
    delivery_failures: AtomicU64,
    frames_returned: AtomicU64,
    invalid_returns: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_delivered: u64,
    pub frames_skipped: u64,
    pub delivery_failures: u64,
    pub frames_returned: u64,
    pub invalid_returns: u64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_delivered(&self, fill_time: Duration) {
        self.counters.frames_delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("evs_frames_delivered_total").increment(1);
        metrics::histogram!("evs_frame_fill_us").record(fill_time.as_micros() as f64);
    }

    pub fn frame_skipped(&self) {
        self.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("evs_frames_skipped_total").increment(1);
    }

    pub fn delivery_failed(&self) {
        self.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("evs_delivery_failures_total").increment(1);
    }

    pub fn frame_returned(&self) {
        self.counters.frames_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_return(&self) {
        self.counters.invalid_returns.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("evs_invalid_returns_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_delivered: self.counters.frames_delivered.load(Ordering::Relaxed),
            frames_skipped: self.counters.frames_skipped.load(Ordering::Relaxed),
            delivery_failures: self.counters.delivery_failures.load(Ordering::Relaxed),
            frames_returned: self.counters.frames_returned.load(Ordering::Relaxed),
            invalid_returns: self.counters.invalid_returns.load(Ordering::Relaxed),
        }
    }
}
