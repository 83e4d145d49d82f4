use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

/// Trailing span the pulse rate is averaged over.
pub const AVERAGING_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseSample {
    pub at: Instant,
    pub pulses: u64,
    pub elapsed: Duration,
}

/// Rolling state for pulse-count differencing: the previous counter reading
/// and the samples derived from it that still fall inside the window.
#[derive(Debug, Clone)]
pub struct PulseWindow {
    span: Duration,
    previous: Option<(u64, Instant)>,
    samples: VecDeque<PulseSample>,
}

impl Default for PulseWindow {
    fn default() -> Self {
        Self::new(AVERAGING_WINDOW)
    }
}

impl PulseWindow {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            previous: None,
            samples: VecDeque::new(),
        }
    }

    pub fn previous(&self) -> Option<(u64, Instant)> {
        self.previous
    }

    pub fn samples(&self) -> impl Iterator<Item = &PulseSample> {
        self.samples.iter()
    }

    /// Record a lifetime counter reading taken at `now` and return the
    /// averaged counts per second, if the reading produced a usable sample.
    ///
    /// Readings that go backwards in count or time are dropped, but still
    /// become the reference for the next reading.
    pub fn record(&mut self, count: u64, now: Instant) -> Option<f64> {
        let previous = self.previous.replace((count, now));
        let (prev_count, prev_at) = previous?;

        let elapsed = now.checked_duration_since(prev_at).unwrap_or_default();
        if elapsed.is_zero() || count < prev_count {
            debug!(count, prev_count, ?elapsed, "dropping anomalous pulse sample");
            return None;
        }
        let pulses = count - prev_count;

        self.samples.push_back(PulseSample {
            at: now,
            pulses,
            elapsed,
        });
        if let Some(cutoff) = now.checked_sub(self.span) {
            while self.samples.front().is_some_and(|s| s.at < cutoff) {
                self.samples.pop_front();
            }
        }

        let total_pulses: u64 = self.samples.iter().map(|s| s.pulses).sum();
        let total_time: Duration = self.samples.iter().map(|s| s.elapsed).sum();
        if total_time.is_zero() {
            return None;
        }
        let cps = total_pulses as f64 / total_time.as_secs_f64();
        debug!(
            dp = pulses,
            dt = elapsed.as_secs_f64(),
            total_pulses,
            total_time = total_time.as_secs_f64(),
            cps,
            "pulse window updated"
        );
        Some(cps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn first_reading_only_sets_reference() {
        let t0 = Instant::now();
        let mut window = PulseWindow::default();

        assert_eq!(window.record(1000, t0), None);

        assert_eq!(window.previous(), Some((1000, t0)));
        assert_eq!(window.samples().count(), 0);
    }

    #[test]
    fn averages_over_consecutive_readings() {
        let t0 = Instant::now();
        let mut window = PulseWindow::default();

        window.record(1000, t0);
        let cps = window.record(1010, t0 + secs(2.0));

        assert_eq!(cps, Some(5.0));
    }

    #[test]
    fn counter_reset_is_dropped_but_becomes_reference() {
        let t0 = Instant::now();
        let mut window = PulseWindow::default();
        window.record(1000, t0);
        window.record(1010, t0 + secs(2.0));

        let cps = window.record(3, t0 + secs(4.0));

        assert_eq!(cps, None);
        assert_eq!(window.previous(), Some((3, t0 + secs(4.0))));
        assert_eq!(window.samples().count(), 1);

        let cps = window.record(13, t0 + secs(6.0));
        assert_eq!(cps, Some(5.0));
    }

    #[test]
    fn zero_elapsed_time_is_dropped() {
        let t0 = Instant::now();
        let mut window = PulseWindow::default();
        window.record(1000, t0);

        assert_eq!(window.record(1005, t0), None);
        assert_eq!(window.samples().count(), 0);
        assert_eq!(window.previous(), Some((1005, t0)));
    }

    #[test]
    fn admitted_samples_are_positive_and_ordered() {
        let t0 = Instant::now();
        let mut window = PulseWindow::default();
        let readings = [(100, 0.0), (110, 1.0), (90, 2.0), (95, 2.0), (120, 3.5), (121, 4.0)];

        for (count, at) in readings {
            window.record(count, t0 + secs(at));
        }

        let samples: Vec<_> = window.samples().copied().collect();
        assert!(samples.iter().all(|s| !s.elapsed.is_zero()));
        assert!(samples.windows(2).all(|pair| pair[0].at < pair[1].at));
        assert_eq!(samples.iter().map(|s| s.pulses).sum::<u64>(), 10 + 25 + 1);
    }

    #[test]
    fn evicts_samples_older_than_span() {
        let t0 = Instant::now();
        let mut window = PulseWindow::default();
        window.record(0, t0);
        for step in 1..=10_u64 {
            window.record(step * 10, t0 + secs(step as f64));
        }

        let newest = t0 + secs(10.0);
        assert!(window
            .samples()
            .all(|s| s.at >= newest - AVERAGING_WINDOW));
        assert_eq!(window.samples().count(), 6);
        assert_eq!(window.record(110, t0 + secs(11.0)), Some(10.0));
    }

    #[test]
    fn long_gap_flushes_everything_but_newest() {
        let t0 = Instant::now();
        let mut window = PulseWindow::default();
        window.record(0, t0);
        window.record(50, t0 + secs(1.0));

        let cps = window.record(80, t0 + secs(31.0));

        assert_eq!(window.samples().count(), 1);
        assert_eq!(cps, Some(1.0));
    }
}
