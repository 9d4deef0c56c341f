//! Resolution ladder.
//!
//! An immutable table of capture presets ordered from lowest to highest,
//! plus the index of the operating point. The index only ever moves one
//! level at a time.

use crate::capture::Capture;
use crate::error::{DemoError, LadderError};
use crate::fps_monitor::FrameRateEstimator;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// A capture preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// LOW, MID and HIGH presets.
pub fn default_table() -> Vec<Resolution> {
    vec![
        Resolution::new(320, 240),
        Resolution::new(640, 480),
        Resolution::new(1280, 1024),
    ]
}

/// Ordered presets with the current operating point.
#[derive(Debug, Clone)]
pub struct ResolutionLadder {
    table: Vec<Resolution>,
    index: usize,
    /// Index last pushed to the capture source.
    applied: Option<usize>,
}

impl ResolutionLadder {
    pub fn new(table: Vec<Resolution>, initial: usize) -> Result<Self, LadderError> {
        if table.is_empty() {
            return Err(LadderError::Empty);
        }
        if initial >= table.len() {
            return Err(LadderError::OutOfRange {
                index: initial,
                len: table.len(),
            });
        }
        Ok(Self {
            table,
            index: initial,
            applied: None,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Resolution {
        self.table[self.index]
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn is_top(&self) -> bool {
        self.index + 1 == self.table.len()
    }

    pub fn is_bottom(&self) -> bool {
        self.index == 0
    }

    /// Bounds-checked access to a preset.
    pub fn get(&self, index: usize) -> Result<Resolution, LadderError> {
        self.table
            .get(index)
            .copied()
            .ok_or(LadderError::OutOfRange {
                index,
                len: self.table.len(),
            })
    }

    /// Move one level up. Returns false at the top.
    pub fn step_up(&mut self) -> bool {
        if self.is_top() {
            return false;
        }
        self.index += 1;
        true
    }

    /// Move one level down. Returns false at the bottom.
    pub fn step_down(&mut self) -> bool {
        if self.is_bottom() {
            return false;
        }
        self.index -= 1;
        true
    }

    /// True when the operating point differs from what the source runs at.
    pub fn pending(&self) -> bool {
        self.applied != Some(self.index)
    }

    /// Push the current preset to the capture source.
    ///
    /// Returns `Ok(false)` without touching either collaborator when the
    /// current index is already applied. Otherwise the estimator's
    /// in-progress window is discarded since the cost profile changed.
    pub fn apply<C>(
        &mut self,
        capture: &mut C,
        estimator: &mut FrameRateEstimator,
    ) -> Result<bool, DemoError>
    where
        C: Capture + ?Sized,
    {
        if !self.pending() {
            return Ok(false);
        }
        let target = self.current();
        capture.set_resolution(target.width, target.height)?;
        estimator.reset_window();
        self.applied = Some(self.index);
        info!(
            index = self.index,
            "Capture resolution set to {} on {}",
            target,
            capture.name()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, Grab};
    use crate::error::CaptureError;
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct RecordingCapture {
        calls: Vec<(u32, u32)>,
        reject: bool,
    }

    impl Capture for RecordingCapture {
        fn open(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
            if self.reject {
                return Err(CaptureError::ResolutionRejected {
                    source_name: "rec".to_string(),
                    width,
                    height,
                });
            }
            self.calls.push((width, height));
            Ok(())
        }

        fn grab(&mut self) -> Result<Grab, CaptureError> {
            Ok(Grab::EndOfStream)
        }

        fn retrieve(&mut self) -> Result<Frame, CaptureError> {
            Err(CaptureError::RetrieveFailed("rec".to_string()))
        }

        fn name(&self) -> &str {
            "rec"
        }
    }

    #[test]
    fn test_new_rejects_bad_tables() {
        assert_eq!(
            ResolutionLadder::new(Vec::new(), 0).unwrap_err(),
            LadderError::Empty
        );
        assert_eq!(
            ResolutionLadder::new(default_table(), 3).unwrap_err(),
            LadderError::OutOfRange { index: 3, len: 3 }
        );
    }

    #[test]
    fn test_get_is_bounds_checked() {
        let ladder = ResolutionLadder::new(default_table(), 1).unwrap();
        assert_eq!(ladder.get(2).unwrap(), Resolution::new(1280, 1024));
        assert!(matches!(
            ladder.get(9),
            Err(LadderError::OutOfRange { index: 9, len: 3 })
        ));
        assert_eq!(ladder.current().to_string(), "640x480");
    }

    #[test]
    fn test_edges_of_ladder() {
        let mut ladder = ResolutionLadder::new(default_table(), 2).unwrap();
        assert!(ladder.is_top());
        assert!(!ladder.step_up());
        assert_eq!(ladder.index(), 2);

        assert!(ladder.step_down());
        assert!(ladder.step_down());
        assert!(ladder.is_bottom());
        assert!(!ladder.step_down());
        assert_eq!(ladder.index(), 0);
    }

    #[test]
    fn test_apply_is_idempotent_per_index() {
        let mut ladder = ResolutionLadder::new(default_table(), 1).unwrap();
        let mut capture = RecordingCapture::default();
        let mut estimator = FrameRateEstimator::new(Duration::from_millis(250));

        assert!(ladder.pending());
        assert!(ladder.apply(&mut capture, &mut estimator).unwrap());
        assert!(!ladder.pending());
        assert!(!ladder.apply(&mut capture, &mut estimator).unwrap());
        assert_eq!(capture.calls, vec![(640, 480)]);

        ladder.step_down();
        assert!(ladder.apply(&mut capture, &mut estimator).unwrap());
        assert_eq!(capture.calls, vec![(640, 480), (320, 240)]);
    }

    #[test]
    fn test_apply_resets_rate_window_but_keeps_rate() {
        let start = Instant::now();
        let mut estimator = FrameRateEstimator::starting_at(Duration::from_millis(100), start);
        estimator.record_frame_at(start + Duration::from_millis(100));
        estimator.record_frame_at(start + Duration::from_millis(110));
        let published = estimator.current_rate();
        assert!(published.is_some());
        assert_eq!(estimator.sample().frames, 1);

        let mut ladder = ResolutionLadder::new(default_table(), 0).unwrap();
        let mut capture = RecordingCapture::default();
        ladder.apply(&mut capture, &mut estimator).unwrap();

        assert_eq!(estimator.sample().frames, 0);
        assert_eq!(estimator.current_rate(), published);
    }

    #[test]
    fn test_rejected_apply_stays_pending() {
        let mut ladder = ResolutionLadder::new(default_table(), 0).unwrap();
        let mut capture = RecordingCapture {
            reject: true,
            ..Default::default()
        };
        let mut estimator = FrameRateEstimator::default();
        assert!(matches!(
            ladder.apply(&mut capture, &mut estimator),
            Err(DemoError::Capture(CaptureError::ResolutionRejected { .. }))
        ));
        assert!(ladder.pending());
    }

    proptest! {
        #[test]
        fn prop_step_up_then_down_returns_to_start(
            len in 1usize..8usize,
            start in 0usize..8usize,
        ) {
            let start = start % len;
            let table = (1..=len as u32).map(|i| Resolution::new(i * 160, i * 120)).collect();
            let mut ladder = ResolutionLadder::new(table, start).unwrap();

            if ladder.step_up() {
                prop_assert_eq!(ladder.index(), start + 1);
                prop_assert!(ladder.step_down());
            } else {
                prop_assert_eq!(start, len - 1);
            }
            prop_assert_eq!(ladder.index(), start);
        }

        #[test]
        fn prop_index_stays_in_range(
            len in 1usize..8usize,
            moves in prop::collection::vec(any::<bool>(), 0..64),
        ) {
            let table = (1..=len as u32).map(|i| Resolution::new(i, i)).collect();
            let mut ladder = ResolutionLadder::new(table, 0).unwrap();
            for up in moves {
                let before = ladder.index();
                let moved = if up { ladder.step_up() } else { ladder.step_down() };
                prop_assert!(ladder.index() < len);
                let distance = before.abs_diff(ladder.index());
                prop_assert_eq!(distance, usize::from(moved));
            }
        }
    }
}
