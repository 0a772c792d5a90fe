//! Transfer speed measurement and time estimates.

use std::time::Duration;

use tokio::time::Instant;

/// Estimated seconds to move `remaining` bytes at `bytes_per_second`.
///
/// Nothing left is zero; something left at no known speed is infinite.
pub fn seconds_remaining(remaining: u64, bytes_per_second: f64) -> f64 {
    if remaining == 0 {
        return 0.0;
    }
    if bytes_per_second <= 0.0 || !bytes_per_second.is_finite() {
        return f64::INFINITY;
    }
    (remaining as f64 / bytes_per_second).floor()
}

/// Exponentially smoothed speed of one file.
///
/// The same timestamp throttles progress reports: a measurement only
/// happens when a report is emitted, and the time since the previous
/// report is the sample span.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    current: f64,
    average: f64,
    previous_bytes: u64,
    last_report: Instant,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self {
            current: 0.0,
            average: 0.0,
            previous_bytes: 0,
            last_report: Instant::now(),
        }
    }

    /// Bytes per second over the last sample.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Smoothed bytes per second.
    pub fn average(&self) -> f64 {
        self.average
    }

    /// Whether `interval` has passed since the previous report.
    pub fn report_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_report) >= interval
    }

    /// Takes a sample at `completed` bytes and marks `now` as the latest
    /// report. A zero-length span only updates the timestamp.
    pub fn sample(&mut self, completed: u64, now: Instant, smoothing: f64) {
        let span = now.saturating_duration_since(self.last_report);
        if !span.is_zero() {
            let delta = completed as f64 - self.previous_bytes as f64;
            self.current = (delta / span.as_secs_f64()).max(0.0);
            self.average = smoothing * self.current + (1.0 - smoothing) * self.average;
            self.previous_bytes = completed;
        }
        self.last_report = now;
    }

    /// Zeroes both speeds. The byte baseline is kept so a resumed
    /// transfer does not count already-sent bytes as new.
    pub fn stop(&mut self) {
        self.current = 0.0;
        self.average = 0.0;
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}
