//! Frame-rate estimation over a fixed wall-clock window.
//!
//! `FrameRateEstimator` publishes a rate each time a measurement window
//! closes. `CycleHistory` keeps the last per-cycle work durations for the
//! overlay and the status endpoint.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default measurement window length.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_millis(250);

/// Ring buffer capacity for cycle samples (about 5 seconds at 25 FPS).
pub const CYCLE_HISTORY_CAPACITY: usize = 120;

/// Frame counter and wall-clock span of the window being measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    /// Frames counted since the window opened.
    pub frames: u64,
    /// Start of the current window.
    pub window_start: Instant,
}

/// Tracks achieved throughput over a sliding measurement window.
#[derive(Debug)]
pub struct FrameRateEstimator {
    window: Duration,
    sample: RateSample,
    /// Last published rate, `None` until the first window closes.
    rate: Option<f64>,
    frames_total: u64,
}

impl FrameRateEstimator {
    /// Create an estimator whose window starts now.
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    /// Create an estimator whose first window opens at `start`.
    pub fn starting_at(window: Duration, start: Instant) -> Self {
        Self {
            window,
            sample: RateSample {
                frames: 0,
                window_start: start,
            },
            rate: None,
            frames_total: 0,
        }
    }

    /// Account one processed frame.
    pub fn record_frame(&mut self) {
        self.record_frame_at(Instant::now());
    }

    /// Account one processed frame at the given time.
    ///
    /// Closes the window when it has been open for at least the configured
    /// length; the newly published rate is returned in that case.
    pub fn record_frame_at(&mut self, now: Instant) -> Option<f64> {
        self.sample.frames += 1;
        self.frames_total += 1;

        let elapsed = now.saturating_duration_since(self.sample.window_start);
        if elapsed < self.window || elapsed.is_zero() {
            return None;
        }

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let rate = self.sample.frames as f64 * 1000.0 / elapsed_ms;
        debug!(
            frames = self.sample.frames,
            elapsed_ms = elapsed_ms,
            "Processing @ FPS = {:.2}",
            rate
        );

        self.rate = Some(rate);
        self.sample = RateSample {
            frames: 0,
            window_start: now,
        };
        Some(rate)
    }

    /// Last published rate in frames per second.
    pub fn current_rate(&self) -> Option<f64> {
        self.rate
    }

    /// Drop the in-progress window, keeping the published rate.
    pub fn reset_window(&mut self) {
        self.reset_window_at(Instant::now());
    }

    /// Drop the in-progress window and reopen it at `now`.
    pub fn reset_window_at(&mut self, now: Instant) {
        self.sample = RateSample {
            frames: 0,
            window_start: now,
        };
    }

    /// The window currently being measured.
    pub fn sample(&self) -> RateSample {
        self.sample
    }

    /// Frames processed since creation, across all windows.
    pub fn frames_total(&self) -> u64 {
        self.frames_total
    }
}

impl Default for FrameRateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

/// Fixed-capacity history of per-cycle work durations.
#[derive(Debug)]
pub struct CycleHistory {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl CycleHistory {
    pub fn new() -> Self {
        Self::with_capacity(CYCLE_HISTORY_CAPACITY)
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Push a sample, evicting the oldest one when full.
    pub fn push(&mut self, work: Duration) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(work);
    }

    /// Mean work duration in milliseconds, 0.0 when empty.
    pub fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        total.as_secs_f64() * 1000.0 / self.samples.len() as f64
    }

    /// Work duration percentile in milliseconds (`p` in 0.0..=1.0).
    pub fn percentile_ms(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 - 1.0) * p.clamp(0.0, 1.0)).round() as usize;
        sorted[index].as_secs_f64() * 1000.0
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for CycleHistory {
    fn default() -> Self {
        Self::new()
    }
}
