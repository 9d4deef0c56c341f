//! Cycle pacing for the processing loop.
//!
//! The pacer caps the loop at the configured maximum rate by sleeping
//! out the remainder of each cycle, and reports how far the cycle's work
//! was from the ideal cycle time.

use std::time::{Duration, Instant};

/// Floor used for the measured duration when computing the ratio.
const MIN_ACTUAL: Duration = Duration::from_micros(1);

/// Result of closing one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    /// idealCycle / actualCycle; 1.0 is on target, below 1.0 is late.
    pub deviation: f64,
    /// Time spent between `begin_cycle` and `end_cycle`.
    pub work: Duration,
    /// Time the pacer waits before the next cycle may start.
    pub sleep: Duration,
}

impl CycleOutcome {
    fn on_target() -> Self {
        Self {
            deviation: 1.0,
            work: Duration::ZERO,
            sleep: Duration::ZERO,
        }
    }
}

/// Timing of the current cycle, owned by the pacer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleTiming {
    /// Start of the cycle in progress.
    pub cycle_start: Option<Instant>,
    /// Ideal cycle duration, `None` when pacing is disabled.
    pub ideal: Option<Duration>,
    /// Ratio reported by the last `end_cycle`.
    pub deviation: f64,
    /// Full period between the last two cycle starts, sleep included.
    pub last_period: Option<Duration>,
    /// Work time measured by the last `end_cycle`.
    pub last_work: Option<Duration>,
}

/// Enforces a per-iteration sleep so the loop does not exceed `fps_max`.
#[derive(Debug)]
pub struct CyclePacer {
    timing: CycleTiming,
}

impl CyclePacer {
    /// Create a pacer for `fps_max` frames per second; 0 disables pacing.
    pub fn new(fps_max: u16) -> Self {
        let ideal = if fps_max == 0 {
            None
        } else {
            Some(Duration::from_nanos(1_000_000_000 / u64::from(fps_max)))
        };
        Self {
            timing: CycleTiming {
                cycle_start: None,
                ideal,
                deviation: 1.0,
                last_period: None,
                last_work: None,
            },
        }
    }

    /// Ideal cycle duration, `None` when pacing is disabled.
    pub fn ideal_cycle(&self) -> Option<Duration> {
        self.timing.ideal
    }

    pub fn is_enabled(&self) -> bool {
        self.timing.ideal.is_some()
    }

    pub fn timing(&self) -> CycleTiming {
        self.timing
    }

    /// Mark the start of a cycle.
    pub fn begin_cycle(&mut self) {
        self.begin_cycle_at(Instant::now());
    }

    /// Mark the start of a cycle at `now`.
    ///
    /// The first call only records the timestamp; later calls also record
    /// the full period since the previous start.
    pub fn begin_cycle_at(&mut self, now: Instant) {
        if let Some(previous) = self.timing.cycle_start {
            self.timing.last_period = Some(now.saturating_duration_since(previous));
        }
        self.timing.cycle_start = Some(now);
    }

    /// Close the cycle, sleeping out the remainder of the ideal duration.
    ///
    /// Returns the deviation ratio for the cycle.
    pub fn end_cycle(&mut self) -> f64 {
        let outcome = self.end_cycle_at(Instant::now());
        if !outcome.sleep.is_zero() {
            std::thread::sleep(outcome.sleep);
        }
        outcome.deviation
    }

    /// Close the cycle at `now` without sleeping.
    pub fn end_cycle_at(&mut self, now: Instant) -> CycleOutcome {
        let (Some(ideal), Some(start)) = (self.timing.ideal, self.timing.cycle_start) else {
            let mut outcome = CycleOutcome::on_target();
            if let Some(start) = self.timing.cycle_start {
                outcome.work = now.saturating_duration_since(start);
                self.timing.last_work = Some(outcome.work);
            }
            self.timing.deviation = outcome.deviation;
            return outcome;
        };

        let work = now.saturating_duration_since(start);
        let deviation = ideal.as_secs_f64() / work.max(MIN_ACTUAL).as_secs_f64();
        let sleep = ideal.saturating_sub(work);

        self.timing.deviation = deviation;
        self.timing.last_work = Some(work);
        CycleOutcome {
            deviation,
            work,
            sleep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ideal_cycle_from_fps_max() {
        let pacer = CyclePacer::new(25);
        assert_eq!(pacer.ideal_cycle(), Some(Duration::from_millis(40)));
        assert!(pacer.is_enabled());
    }

    #[test]
    fn test_deviation_for_late_cycle() {
        let mut pacer = CyclePacer::new(25);
        let start = Instant::now();
        pacer.begin_cycle_at(start);

        let outcome = pacer.end_cycle_at(start + Duration::from_millis(50));
        assert!((outcome.deviation - 0.8).abs() < 1e-9);
        assert_eq!(outcome.sleep, Duration::ZERO);
        assert_eq!(outcome.work, Duration::from_millis(50));
        assert_eq!(pacer.timing().last_work, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_early_cycle_sleeps_remainder() {
        let mut pacer = CyclePacer::new(25);
        let start = Instant::now();
        pacer.begin_cycle_at(start);

        let outcome = pacer.end_cycle_at(start + Duration::from_millis(10));
        assert_eq!(outcome.sleep, Duration::from_millis(30));
        assert!((outcome.deviation - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_pacing_is_on_target() {
        let mut pacer = CyclePacer::new(0);
        assert!(!pacer.is_enabled());
        let start = Instant::now();
        pacer.begin_cycle_at(start);

        let outcome = pacer.end_cycle_at(start + Duration::from_millis(500));
        assert_eq!(outcome.deviation, 1.0);
        assert_eq!(outcome.sleep, Duration::ZERO);
        assert_eq!(outcome.work, Duration::from_millis(500));
    }

    #[test]
    fn test_end_without_begin_is_on_target() {
        let mut pacer = CyclePacer::new(25);
        let outcome = pacer.end_cycle_at(Instant::now());
        assert_eq!(outcome, CycleOutcome::on_target());
    }

    #[test]
    fn test_first_begin_only_records_timestamp() {
        let mut pacer = CyclePacer::new(25);
        let start = Instant::now();
        pacer.begin_cycle_at(start);
        assert_eq!(pacer.timing().cycle_start, Some(start));
        assert!(pacer.timing().last_period.is_none());

        pacer.begin_cycle_at(start + Duration::from_millis(40));
        assert_eq!(pacer.timing().last_period, Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_end_cycle_blocks_for_remainder() {
        let mut pacer = CyclePacer::new(50);
        let start = Instant::now();
        pacer.begin_cycle();
        let deviation = pacer.end_cycle();
        assert!(deviation > 1.0);
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    proptest! {
        #[test]
        fn prop_sleep_never_negative_and_late_cycles_do_not_sleep(
            fps_max in 1u16..=240u16,
            work_us in 0u64..200_000u64,
        ) {
            let mut pacer = CyclePacer::new(fps_max);
            let ideal = pacer.ideal_cycle().unwrap();
            let start = Instant::now();
            pacer.begin_cycle_at(start);

            let work = Duration::from_micros(work_us);
            let outcome = pacer.end_cycle_at(start + work);

            prop_assert!(outcome.sleep <= ideal);
            if work >= ideal {
                prop_assert_eq!(outcome.sleep, Duration::ZERO);
            }
            if work > ideal {
                prop_assert!(outcome.deviation < 1.0);
            } else {
                prop_assert_eq!(outcome.work + outcome.sleep, ideal);
                prop_assert!(outcome.deviation >= 1.0);
            }
        }
    }
}
