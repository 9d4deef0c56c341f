//! Core Logic module implementing the adaptive frame-rate controller.
//!
//! This module contains the state machine that decides, on a throttled
//! schedule, whether to leave the operating point alone, move the
//! resolution ladder one step, or ask the resource manager for more.

use crate::effects::EffectKind;
use crate::resolution::ResolutionLadder;
use crate::scheduler::ResourceGateway;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    /// No outstanding resource request.
    #[default]
    Stable,
    /// A resource request was submitted and has not been resolved yet.
    RequestPending { since: Instant },
}

impl ControllerState {
    pub fn label(&self) -> &'static str {
        match self {
            ControllerState::Stable => "STABLE",
            ControllerState::RequestPending { .. } => "REQUEST_PENDING",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one call to `AdaptiveController::tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// The re-check interval has not elapsed; nothing was evaluated.
    Throttled,
    /// On target, nothing changed.
    Hold,
    /// Baseline workload was late; the ladder moved down.
    SteppedDown,
    /// Comfortably above target; the ladder moved up.
    SteppedUp,
    /// Baseline workload was late but the ladder is already at the bottom.
    AtFloor,
    /// A resource request was submitted.
    Requested { magnitude: u8 },
    /// An effect is enabled and the granted level is already the maximum.
    AtCeiling,
    /// The deviation recovered while a request was pending.
    Recovered,
    /// The pending request did not help; fell back to the ladder.
    TimedOut { stepped_down: bool },
}

impl ControlAction {
    /// True when the ladder index changed.
    pub fn moved_ladder(&self) -> bool {
        matches!(
            self,
            ControlAction::SteppedDown
                | ControlAction::SteppedUp
                | ControlAction::TimedOut { stepped_down: true }
        )
    }
}

/// What the current cycle is doing, as far as the controller cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Workload {
    /// An optional, resource-intensive effect is selected.
    pub effect_enabled: bool,
}

impl From<EffectKind> for Workload {
    fn from(effect: EffectKind) -> Self {
        Self {
            effect_enabled: !effect.is_baseline(),
        }
    }
}

/// Tuning for `AdaptiveController`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Deviation at or above which the loop counts as on target.
    pub stability_threshold: f64,
    /// Minimum time between two evaluations.
    pub check_interval: Duration,
    /// Minimum time between evaluations while a request is pending.
    pub pending_check_interval: Duration,
    /// Deviation at or above which the ladder steps up, if set.
    pub upscale_threshold: Option<f64>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            stability_threshold: 0.85,
            check_interval: Duration::from_millis(1000),
            pending_check_interval: Duration::from_millis(1000),
            upscale_threshold: None,
        }
    }
}

/// Resource request magnitude for a deviation ratio.
///
/// `round((1 - deviation) * 100) % 100`, with shortfalls below zero clamped
/// to 0. Deviations near 0 wrap around to small magnitudes; this matches the
/// behavior the resource manager has always been sent and looks like an
/// artifact of an unsigned modulo rather than intent.
pub fn request_magnitude(deviation: f64) -> u8 {
    let shortfall = ((1.0 - deviation) * 100.0).round();
    if !shortfall.is_finite() || shortfall <= 0.0 {
        return 0;
    }
    (shortfall as u64 % 100) as u8
}

/// Feedback controller driving the resolution ladder and the gateway.
pub struct AdaptiveController {
    settings: ControllerSettings,
    state: ControllerState,
    /// Time of the last evaluation that was not throttled.
    last_tick: Option<Instant>,
    /// Current minimum re-check interval.
    interval: Duration,
}

impl AdaptiveController {
    pub fn new(settings: ControllerSettings) -> Self {
        Self {
            settings,
            state: ControllerState::Stable,
            last_tick: None,
            interval: settings.check_interval,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Current minimum re-check interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start throttling from `now` so the first evaluation happens one
    /// interval later.
    pub fn arm(&mut self, now: Instant) {
        self.last_tick = Some(now);
    }

    fn due(&self, now: Instant) -> bool {
        match self.last_tick {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    fn settle(&mut self) {
        self.state = ControllerState::Stable;
        self.interval = self.settings.check_interval;
    }

    /// Run one policy tick.
    ///
    /// `deviation` is `None` while the rate is still unknown, which counts
    /// as on target. Never blocks on the gateway.
    pub fn tick<G>(
        &mut self,
        now: Instant,
        deviation: Option<f64>,
        workload: Workload,
        ladder: &mut ResolutionLadder,
        gateway: &mut G,
    ) -> ControlAction
    where
        G: ResourceGateway + ?Sized,
    {
        if !self.due(now) {
            return ControlAction::Throttled;
        }
        self.last_tick = Some(now);

        let deviation = deviation.unwrap_or(1.0);
        let on_target = deviation >= self.settings.stability_threshold;

        match self.state {
            ControllerState::Stable if on_target => {
                self.interval = self.settings.check_interval;
                match self.settings.upscale_threshold {
                    Some(upscale) if deviation >= upscale && ladder.step_up() => {
                        info!(
                            deviation = deviation,
                            "Headroom available, resolution up to {}",
                            ladder.current()
                        );
                        ControlAction::SteppedUp
                    }
                    _ => ControlAction::Hold,
                }
            }

            ControllerState::Stable if !workload.effect_enabled => {
                if ladder.step_down() {
                    info!(
                        deviation = deviation,
                        "Below target, resolution down to {}",
                        ladder.current()
                    );
                    ControlAction::SteppedDown
                } else {
                    ControlAction::AtFloor
                }
            }

            ControllerState::Stable => {
                if gateway.current_granted_level() >= gateway.max_level() {
                    return ControlAction::AtCeiling;
                }
                let magnitude = request_magnitude(deviation);
                gateway.request_more_resources(magnitude);
                self.state = ControllerState::RequestPending { since: now };
                self.interval = self.settings.pending_check_interval;
                info!(
                    deviation = deviation,
                    magnitude = magnitude,
                    granted = gateway.current_granted_level(),
                    "Requested more resources"
                );
                ControlAction::Requested { magnitude }
            }

            ControllerState::RequestPending { since } => {
                let waited_ms = now.saturating_duration_since(since).as_millis() as u64;
                self.settle();
                if on_target {
                    info!(
                        deviation = deviation,
                        waited_ms = waited_ms,
                        "Deviation recovered"
                    );
                    return ControlAction::Recovered;
                }
                let stepped_down = ladder.step_down();
                info!(
                    deviation = deviation,
                    waited_ms = waited_ms,
                    stepped_down = stepped_down,
                    "Resource request timed out, resolution now {}",
                    ladder.current()
                );
                ControlAction::TimedOut { stepped_down }
            }
        }
    }
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self::new(ControllerSettings::default())
    }
}
