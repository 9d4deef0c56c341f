//! Metrics collection module for vidpace.
//!
//! Counts controller decisions and processed frames. The control loop
//! writes, the IPC server reads.

use crate::core_logic::ControlAction;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics data exposed via IPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// Uptime in seconds
    pub uptime_sec: u64,
    /// Frames processed since start
    pub frames_total: u64,
    /// Resolution step-downs, timeout fallbacks included
    pub step_downs: u64,
    pub step_ups: u64,
    /// Resource requests submitted
    pub requests: u64,
    /// Requests that ended in a fallback
    pub timeouts: u64,
    /// Requests resolved by a recovered deviation
    pub recoveries: u64,
    /// Magnitude of the last request, 0 if none was made
    pub last_magnitude: u64,
    /// Average frames per second over the whole run
    pub avg_fps: f64,
}

/// Metrics collector for the control loop
pub struct ControlMetrics {
    start_time: Instant,
    frames: AtomicU64,
    step_downs: AtomicU64,
    step_ups: AtomicU64,
    requests: AtomicU64,
    timeouts: AtomicU64,
    recoveries: AtomicU64,
    last_magnitude: AtomicU64,
}

impl ControlMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames: AtomicU64::new(0),
            step_downs: AtomicU64::new(0),
            step_ups: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            last_magnitude: AtomicU64::new(0),
        }
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a controller decision
    pub fn record(&self, action: ControlAction) {
        match action {
            ControlAction::SteppedDown => {
                self.step_downs.fetch_add(1, Ordering::SeqCst);
            }
            ControlAction::SteppedUp => {
                self.step_ups.fetch_add(1, Ordering::SeqCst);
            }
            ControlAction::Requested { magnitude } => {
                self.requests.fetch_add(1, Ordering::SeqCst);
                self.last_magnitude
                    .store(u64::from(magnitude), Ordering::SeqCst);
            }
            ControlAction::TimedOut { stepped_down } => {
                self.timeouts.fetch_add(1, Ordering::SeqCst);
                if stepped_down {
                    self.step_downs.fetch_add(1, Ordering::SeqCst);
                }
            }
            ControlAction::Recovered => {
                self.recoveries.fetch_add(1, Ordering::SeqCst);
            }
            ControlAction::Throttled
            | ControlAction::Hold
            | ControlAction::AtFloor
            | ControlAction::AtCeiling => {}
        }
    }

    /// Get current metrics
    pub fn snapshot(&self) -> MetricsResponse {
        let uptime = self.start_time.elapsed();
        let frames_total = self.frames.load(Ordering::Relaxed);
        let avg_fps = if uptime.is_zero() {
            0.0
        } else {
            frames_total as f64 / uptime.as_secs_f64()
        };

        MetricsResponse {
            uptime_sec: uptime.as_secs(),
            frames_total,
            step_downs: self.step_downs.load(Ordering::SeqCst),
            step_ups: self.step_ups.load(Ordering::SeqCst),
            requests: self.requests.load(Ordering::SeqCst),
            timeouts: self.timeouts.load(Ordering::SeqCst),
            recoveries: self.recoveries.load(Ordering::SeqCst),
            last_magnitude: self.last_magnitude.load(Ordering::SeqCst),
            avg_fps,
        }
    }
}

impl Default for ControlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_are_counted() {
        let metrics = ControlMetrics::new();
        metrics.record(ControlAction::Hold);
        metrics.record(ControlAction::SteppedDown);
        metrics.record(ControlAction::Requested { magnitude: 42 });
        metrics.record(ControlAction::TimedOut { stepped_down: true });
        metrics.record(ControlAction::Requested { magnitude: 15 });
        metrics.record(ControlAction::Recovered);
        metrics.record(ControlAction::TimedOut { stepped_down: false });
        for _ in 0..10 {
            metrics.record_frame();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.step_downs, 2);
        assert_eq!(snapshot.step_ups, 0);
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.timeouts, 2);
        assert_eq!(snapshot.recoveries, 1);
        assert_eq!(snapshot.last_magnitude, 15);
        assert_eq!(snapshot.frames_total, 10);
    }

    #[test]
    fn test_metrics_serialize() {
        let json = serde_json::to_string(&ControlMetrics::new().snapshot()).unwrap();
        assert!(json.contains("\"step_downs\":0"));
        assert!(json.contains("\"uptime_sec\""));
    }
}
