//! Rolling-window maximum of concurrent streams.
//!
//! Samples are kept in a monotonic deque: values strictly decrease from front
//! to back, so the front is always the window maximum. A sample that can never
//! become the maximum again (an older one that is not larger than a newer one)
//! is dropped on insert; samples that leave the window are dropped lazily on
//! the next read or write.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Default window of the peak tracker.
pub const PEAK_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    value: u64,
}

#[derive(Debug, Clone)]
pub struct PeakTracker {
    window: Duration,
    samples: VecDeque<Sample>,
    latest: Option<DateTime<Utc>>,
}

impl Default for PeakTracker {
    fn default() -> Self {
        Self::new(Duration::hours(PEAK_WINDOW_HOURS))
    }
}

impl PeakTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            latest: None,
        }
    }

    /// Inserts a concurrency sample.
    ///
    /// Timestamps are expected in order; a timestamp older than the newest one
    /// seen is recorded as if taken at the newest time.
    pub fn record(&mut self, at: DateTime<Utc>, value: u64) {
        let at = match self.latest {
            Some(latest) if at < latest => latest,
            _ => at,
        };
        self.latest = Some(at);
        self.evict(at);

        while self.samples.back().is_some_and(|s| s.value <= value) {
            self.samples.pop_back();
        }
        self.samples.push_back(Sample { at, value });
    }

    /// Maximum sample inside the window ending at `now`, 0 when empty.
    pub fn current_peak_at(&mut self, now: DateTime<Utc>) -> u64 {
        self.evict(now);
        self.samples.front().map(|s| s.value).unwrap_or(0)
    }

    pub fn current_peak(&mut self) -> u64 {
        self.current_peak_at(Utc::now())
    }

    /// Number of samples still retained.
    pub fn retained(&self) -> usize {
        self.samples.len()
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while self.samples.front().is_some_and(|s| s.at <= cutoff) {
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_tracker_reports_zero() {
        let mut tracker = PeakTracker::default();
        assert_eq!(tracker.current_peak_at(t0()), 0);
    }

    #[test]
    fn test_peak_is_window_maximum() {
        let mut tracker = PeakTracker::default();
        let values = [3, 7, 2, 5, 7, 1];
        for (i, v) in values.iter().enumerate() {
            tracker.record(t0() + Duration::minutes(i as i64), *v);
        }
        assert_eq!(tracker.current_peak_at(t0() + Duration::minutes(10)), 7);
        // 3 and the first 7 are dominated by the second 7.
        assert_eq!(tracker.retained(), 2);
    }

    #[test]
    fn test_peak_expires_after_window() {
        let mut tracker = PeakTracker::default();
        tracker.record(t0(), 10);
        tracker.record(t0() + Duration::hours(1), 4);
        tracker.record(t0() + Duration::hours(12), 6);

        assert_eq!(tracker.current_peak_at(t0() + Duration::hours(23)), 10);
        // Exactly 24h after the 10-sample it leaves the window.
        assert_eq!(tracker.current_peak_at(t0() + Duration::hours(24)), 6);
        assert_eq!(tracker.current_peak_at(t0() + Duration::hours(37)), 0);
    }

    #[test]
    fn test_peak_non_decreasing_inside_window() {
        let mut tracker = PeakTracker::default();
        let mut last = 0;
        for i in 0..200u64 {
            let value = (i * 37) % 11;
            let at = t0() + Duration::minutes(i as i64);
            tracker.record(at, value);
            let peak = tracker.current_peak_at(at);
            assert!(peak >= last, "peak decreased inside the window");
            assert!(peak >= value);
            last = peak;
        }
    }

    #[test]
    fn test_out_of_order_sample_is_clamped() {
        let mut tracker = PeakTracker::default();
        tracker.record(t0() + Duration::hours(2), 1);
        tracker.record(t0(), 9);
        // Treated as recorded at +2h, so still inside the window at +25h.
        assert_eq!(tracker.current_peak_at(t0() + Duration::hours(25)), 9);
    }
}
