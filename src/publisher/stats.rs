//! Per-track cadence statistics

use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::media::MediaKind;
use crate::source::ByteCounter;

/// Running aggregates over the intervals between delivered frames
///
/// The first recorded frame only sets the start timestamp; every later one
/// contributes one interval.
#[derive(Debug, Clone)]
pub struct TimingStats {
    kind: MediaKind,
    report_every: u64,
    started_at: Option<Instant>,
    last_at: Option<Instant>,
    frames: u64,
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
    bytes: u64,
}

impl TimingStats {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            report_every: kind.report_every(),
            started_at: None,
            last_at: None,
            frames: 0,
            count: 0,
            total: Duration::ZERO,
            min: None,
            max: Duration::ZERO,
            bytes: 0,
        }
    }

    /// Report cadence every `n` intervals (0 disables periodic reports)
    pub fn with_report_every(mut self, n: u64) -> Self {
        self.report_every = n;
        self
    }

    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    /// Record one delivered frame at `now`
    pub fn record_at(&mut self, now: Instant) {
        self.frames += 1;

        let Some(last) = self.last_at.replace(now) else {
            self.started_at = Some(now);
            info!(
                "[{}] First frame delivered ({} bytes read)",
                self.kind.label(),
                self.bytes
            );
            return;
        };

        let interval = now.saturating_duration_since(last);
        self.count += 1;
        self.total += interval;
        self.max = self.max.max(interval);
        self.min = Some(self.min.map_or(interval, |min| min.min(interval)));

        if self.report_every > 0 && self.count % self.report_every == 0 {
            info!(
                "[{}] Frame {} - interval avg: {:?}, min: {:?}, max: {:?}, total bytes: {}",
                self.kind.label(),
                self.count,
                self.average().unwrap_or_default(),
                self.min.unwrap_or_default(),
                self.max,
                self.bytes
            );
        }
    }

    pub fn set_bytes(&mut self, bytes: u64) {
        self.bytes = bytes;
    }

    /// Frames handed to the sink
    pub fn frames_delivered(&self) -> u64 {
        self.frames
    }

    /// Intervals measured (one less than frames once started)
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn average(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Some(Duration::from_nanos(nanos as u64))
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Emit the shutdown summary line
    pub fn log_summary(&self) {
        info!(
            "[Final Stats] {} - frames: {}, intervals: {}, avg: {:?}, min: {:?}, max: {:?}, bytes: {}",
            self.kind.label(),
            self.frames,
            self.count,
            self.average().unwrap_or_default(),
            self.min.unwrap_or_default(),
            self.max,
            self.bytes
        );
    }
}

/// Frame-completion callback state: timing stats plus the stream's byte count
pub struct CadenceTracker {
    stats: TimingStats,
    bytes: ByteCounter,
}

impl CadenceTracker {
    pub fn new(kind: MediaKind, bytes: ByteCounter) -> Self {
        Self {
            stats: TimingStats::new(kind),
            bytes,
        }
    }

    pub fn record(&mut self) {
        self.stats.set_bytes(self.bytes.get());
        self.stats.record();
    }

    pub fn stats(&self) -> &TimingStats {
        &self.stats
    }

    pub fn into_stats(mut self) -> TimingStats {
        self.stats.set_bytes(self.bytes.get());
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_record_sets_start_only() {
        let mut stats = TimingStats::new(MediaKind::Video);
        let start = Instant::now();
        stats.record_at(start);

        assert_eq!(stats.started_at(), Some(start));
        assert_eq!(stats.frames_delivered(), 1);
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.average(), None);
        assert_eq!(stats.min(), None);
    }

    #[test]
    fn test_intervals() {
        let mut stats = TimingStats::new(MediaKind::Audio);
        let start = Instant::now();
        stats.record_at(start);
        stats.record_at(start + Duration::from_millis(20));
        stats.record_at(start + Duration::from_millis(50));

        assert_eq!(stats.count(), 2);
        assert_eq!(stats.min(), Some(Duration::from_millis(20)));
        assert_eq!(stats.max(), Duration::from_millis(30));
        assert_eq!(stats.total(), Duration::from_millis(50));
        assert_eq!(stats.average(), Some(Duration::from_millis(25)));
    }

    #[test]
    fn test_cadence_tracker_picks_up_bytes() {
        let counter = ByteCounter::new();
        let mut tracker = CadenceTracker::new(MediaKind::Video, counter.clone());
        counter.add(1024);
        tracker.record();
        counter.add(512);

        assert_eq!(tracker.stats().bytes(), 1024);
        assert_eq!(tracker.into_stats().bytes(), 1536);
    }

    proptest! {
        #[test]
        fn prop_stats_invariants(gaps in prop::collection::vec(0u64..500, 1..64)) {
            let mut stats = TimingStats::new(MediaKind::Video).with_report_every(7);
            let start = Instant::now();
            let mut at = start;
            stats.record_at(at);
            for gap in &gaps {
                at += Duration::from_millis(*gap);
                stats.record_at(at);
            }

            let count = gaps.len() as u64;
            prop_assert_eq!(stats.frames_delivered(), count + 1);
            prop_assert_eq!(stats.count(), count);

            let avg = stats.average().unwrap();
            let min = stats.min().unwrap();
            prop_assert!(min <= avg);
            prop_assert!(avg <= stats.max());
            prop_assert_eq!(stats.total(), at - start);

            // integer division loses less than one nanosecond per interval
            let rebuilt = avg.as_nanos() * u128::from(count);
            let total = stats.total().as_nanos();
            prop_assert!(rebuilt <= total && total - rebuilt < u128::from(count));
        }
    }
}
