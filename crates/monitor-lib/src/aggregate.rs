//! Rolling-window accumulation of samples
//!
//! A [`RollingAggregate`] collects the samples of one target between window
//! resets. Windows are driven by wall-clock elapsed time, not by sample count,
//! so a window may run up to one sampling interval past its nominal length.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

use crate::models::Sample;

/// Result of closing a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub mean_cpu: f64,
    pub mean_mem: f64,
    pub sample_count: usize,
}

impl WindowSummary {
    const EMPTY: WindowSummary = WindowSummary {
        mean_cpu: 0.0,
        mean_mem: 0.0,
        sample_count: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

/// Samples for one target accumulated since the last window reset
#[derive(Debug, Clone)]
pub struct RollingAggregate {
    samples: Vec<Sample>,
    window_start: DateTime<Utc>,
}

impl RollingAggregate {
    /// Open a new, empty window starting at `window_start`
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            samples: Vec::new(),
            window_start,
        }
    }

    /// Append a sample to the open window.
    ///
    /// Samples observed before the window start, or before the last sample,
    /// are rejected and `false` is returned, so `observed_at` stays
    /// non-decreasing and never precedes `window_start`.
    pub fn append(&mut self, sample: Sample) -> bool {
        let floor = self
            .samples
            .last()
            .map_or(self.window_start, |last| last.observed_at);
        if sample.observed_at < floor {
            return false;
        }

        if sample.cpu_percent < 0.0 || sample.memory_percent < 0.0 {
            warn!(
                cpu_percent = sample.cpu_percent,
                memory_percent = sample.memory_percent,
                "Negative utilization reading"
            );
        }

        self.samples.push(sample);
        true
    }

    /// Samples of the open window, oldest first
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Time elapsed since the window opened.
    ///
    /// Returns `None` if `now` lies before the window start (clock moved
    /// backwards).
    pub fn elapsed_since_window_start(&self, now: DateTime<Utc>) -> Option<Duration> {
        (now - self.window_start).to_std().ok()
    }

    /// Whether the window has run for at least `window_length`
    pub fn should_close(&self, now: DateTime<Utc>, window_length: Duration) -> bool {
        self.elapsed_since_window_start(now)
            .map(|elapsed| elapsed >= window_length)
            .unwrap_or(false)
    }

    /// Mean CPU and memory over the open window, without closing it
    pub fn mean(&self) -> WindowSummary {
        if self.samples.is_empty() {
            return WindowSummary::EMPTY;
        }

        let count = self.samples.len() as f64;
        let cpu: f64 = self.samples.iter().map(|s| s.cpu_percent).sum();
        let mem: f64 = self.samples.iter().map(|s| s.memory_percent).sum();

        WindowSummary {
            mean_cpu: cpu / count,
            mean_mem: mem / count,
            sample_count: self.samples.len(),
        }
    }

    /// Close the window: compute the means, drop the samples and restart the
    /// window clock at `now`. An empty window yields an empty summary but the
    /// clock is still reset.
    pub fn close(&mut self, now: DateTime<Utc>) -> WindowSummary {
        let summary = self.mean();
        self.samples.clear();
        self.window_start = now;
        summary
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(cpu: f64, mem: f64, secs: i64) -> Sample {
        Sample::new(cpu, mem, at(secs))
    }

    #[test]
    fn test_close_returns_exact_mean() {
        let mut agg = RollingAggregate::new(at(0));
        agg.append(sample(10.0, 20.0, 0));
        agg.append(sample(20.0, 40.0, 1));
        agg.append(sample(60.0, 30.0, 2));

        let summary = agg.close(at(3));
        assert!((summary.mean_cpu - 30.0).abs() < 1e-9);
        assert!((summary.mean_mem - 30.0).abs() < 1e-9);
        assert_eq!(summary.sample_count, 3);
    }

    #[test]
    fn test_close_resets_samples_and_clock() {
        let mut agg = RollingAggregate::new(at(0));
        agg.append(sample(50.0, 50.0, 0));

        agg.close(at(60));

        assert!(agg.is_empty());
        assert_eq!(agg.window_start(), at(60));
    }

    #[test]
    fn test_no_sample_counted_twice() {
        let mut agg = RollingAggregate::new(at(0));
        agg.append(sample(90.0, 90.0, 0));
        agg.close(at(1));

        agg.append(sample(10.0, 5.0, 1));
        let summary = agg.close(at(1));

        assert_eq!(summary.sample_count, 1);
        assert!((summary.mean_cpu - 10.0).abs() < 1e-9);
        assert!((summary.mean_mem - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_empty_window() {
        let mut agg = RollingAggregate::new(at(0));

        let summary = agg.close(at(120));

        assert!(summary.is_empty());
        assert_eq!(summary.mean_cpu, 0.0);
        assert_eq!(summary.mean_mem, 0.0);
        // Clock still advances so the window doesn't stay expired forever
        assert_eq!(agg.window_start(), at(120));
        assert!(!agg.should_close(at(150), Duration::from_secs(60)));
    }

    #[test]
    fn test_should_close_at_boundary() {
        let agg = RollingAggregate::new(at(0));
        let window = Duration::from_secs(60);

        assert!(!agg.should_close(at(59), window));
        assert!(agg.should_close(at(60), window));
        assert!(agg.should_close(at(61), window));
    }

    #[test]
    fn test_clock_going_backwards() {
        let agg = RollingAggregate::new(at(100));

        assert_eq!(agg.elapsed_since_window_start(at(50)), None);
        assert!(!agg.should_close(at(50), Duration::from_secs(0)));
    }

    #[test]
    fn test_append_rejects_samples_before_window_start() {
        let mut agg = RollingAggregate::new(at(10));

        assert!(!agg.append(sample(50.0, 50.0, 5)));
        assert!(agg.is_empty());

        assert!(agg.append(sample(50.0, 50.0, 10)));
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn test_append_keeps_observed_at_non_decreasing() {
        let mut agg = RollingAggregate::new(at(0));
        assert!(agg.append(sample(10.0, 10.0, 3)));
        assert!(agg.append(sample(20.0, 20.0, 3)));

        assert!(!agg.append(sample(30.0, 30.0, 2)));

        let observed: Vec<_> = agg.samples().iter().map(|s| s.observed_at).collect();
        assert_eq!(observed, vec![at(3), at(3)]);
    }

    #[test]
    fn test_negative_reading_is_still_recorded() {
        let mut agg = RollingAggregate::new(at(0));

        assert!(agg.append(sample(-1.0, 20.0, 0)));
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn test_mean_does_not_mutate() {
        let mut agg = RollingAggregate::new(at(0));
        agg.append(sample(40.0, 10.0, 0));
        agg.append(sample(60.0, 30.0, 1));

        let open = agg.mean();
        assert!((open.mean_cpu - 50.0).abs() < 1e-9);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.window_start(), at(0));
    }
}
