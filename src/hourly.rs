//! Hour-of-day activity histogram.
//!
//! 24 buckets, reused every day. Each bucket keeps a weighted running mean of
//! the activity measured while that hour was current. When the clock enters an
//! hour again (a later day, even after a gap in observations) the bucket's
//! previous weight is multiplied by [`DEFAULT_DECAY`], so recent days dominate
//! without ever resetting a bucket to zero.

use chrono::{NaiveDate, Timelike};

/// Weight retained by a bucket's history each time its hour comes around again.
pub const DEFAULT_DECAY: f64 = 0.5;

/// An hour of the day, guaranteed to be in `0..=23`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourOfDay(u8);

impl HourOfDay {
    pub fn new(hour: u32) -> Option<Self> {
        (hour < 24).then_some(HourOfDay(hour as u8))
    }

    pub fn of<T: Timelike>(time: &T) -> Self {
        HourOfDay(time.hour() as u8)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    sum: f64,
    weight: f64,
}

impl Bucket {
    fn mean(&self) -> f64 {
        if self.weight > 0.0 {
            self.sum / self.weight
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct HourlyActivity {
    buckets: [Bucket; 24],
    /// Day and hour of the last observation.
    current: Option<(NaiveDate, HourOfDay)>,
    decay: f64,
}

impl Default for HourlyActivity {
    fn default() -> Self {
        Self::with_decay(DEFAULT_DECAY)
    }
}

impl HourlyActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// `decay` is clamped to `[0, 1]`; 1 keeps every day at equal weight.
    pub fn with_decay(decay: f64) -> Self {
        Self {
            buckets: [Bucket::default(); 24],
            current: None,
            decay: decay.clamp(0.0, 1.0),
        }
    }

    /// Adds one activity observation to the bucket of `hour` on `day`.
    pub fn record(&mut self, day: NaiveDate, hour: HourOfDay, measure: f64) {
        let bucket = &mut self.buckets[hour.index()];
        if self.current != Some((day, hour)) {
            bucket.sum *= self.decay;
            bucket.weight *= self.decay;
            self.current = Some((day, hour));
        }
        bucket.sum += measure.max(0.0);
        bucket.weight += 1.0;
    }

    /// Typical activity for every hour, indexed by hour of day.
    pub fn snapshot(&self) -> [f64; 24] {
        let mut out = [0.0; 24];
        for (slot, bucket) in out.iter_mut().zip(self.buckets.iter()) {
            *slot = bucket.mean();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn hour(h: u32) -> HourOfDay {
        HourOfDay::new(h).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_hour_of_day_bounds() {
        assert!(HourOfDay::new(0).is_some());
        assert!(HourOfDay::new(23).is_some());
        assert!(HourOfDay::new(24).is_none());

        let t = NaiveTime::from_hms_opt(21, 15, 0).unwrap();
        assert_eq!(HourOfDay::of(&t).index(), 21);
    }

    #[test]
    fn test_snapshot_has_24_buckets() {
        let mut activity = HourlyActivity::new();
        activity.record(day(1), hour(20), 4.0);
        activity.record(day(1), hour(20), 6.0);

        let snap = activity.snapshot();
        assert_eq!(snap.len(), 24);
        assert_eq!(snap[20], 5.0);
        assert_eq!(snap[19], 0.0);
    }

    #[test]
    fn test_revisited_hour_decays_history() {
        let mut activity = HourlyActivity::new();
        for _ in 0..3 {
            activity.record(day(1), hour(5), 10.0);
        }
        activity.record(day(1), hour(6), 1.0);
        // Next day, hour 5 again: old sum 30 / weight 3 halve to 15 / 1.5.
        activity.record(day(2), hour(5), 2.0);

        let snap = activity.snapshot();
        assert!((snap[5] - 17.0 / 2.5).abs() < 1e-9);
        assert_eq!(snap[6], 1.0);
    }

    #[test]
    fn test_no_decay_keeps_plain_mean() {
        let mut activity = HourlyActivity::with_decay(1.0);
        activity.record(day(1), hour(1), 2.0);
        activity.record(day(1), hour(2), 0.0);
        activity.record(day(2), hour(1), 4.0);
        assert_eq!(activity.snapshot()[1], 3.0);
    }

    #[test]
    fn test_same_hour_next_day_decays_after_gap() {
        let mut activity = HourlyActivity::new();
        activity.record(day(1), hour(9), 8.0);
        // No observations for a whole day, then hour 9 again.
        activity.record(day(2), hour(9), 2.0);

        // 8 / 1 halves to 4 / 0.5, then (4 + 2) / 1.5.
        assert!((activity.snapshot()[9] - 4.0).abs() < 1e-9);
    }
}
