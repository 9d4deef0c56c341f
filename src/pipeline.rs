//! The demo loop.
//!
//! One thread owns every piece of control state: the ladder, the pacer,
//! the estimator and the controller. UI events arrive over a channel that
//! is drained at the top of each cycle, so a reconfiguration is never in
//! flight while a frame is being processed.

use crate::capture::{Capture, Grab};
use crate::config::Config;
use crate::core_logic::{AdaptiveController, ControlAction, Workload};
use crate::effects::EffectKind;
use crate::error::DemoError;
use crate::fps_monitor::{CycleHistory, FrameRateEstimator};
use crate::ipc_server::{StatusResponse, UiEvent};
use crate::metrics::ControlMetrics;
use crate::pacer::CyclePacer;
use crate::render::{Overlay, Renderer};
use crate::resolution::ResolutionLadder;
use crate::scheduler::ResourceGateway;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// An exit event was received.
    Stopped,
    /// The configured number of frames was processed.
    FrameBudget,
    /// A finite source ran out of frames.
    EndOfStream,
    /// Every event sender was dropped.
    ChannelClosed,
}

/// Channels connecting the loop to the async side.
pub struct LoopChannels {
    pub events: mpsc::UnboundedReceiver<UiEvent>,
    pub status: watch::Sender<StatusResponse>,
    pub metrics: Arc<ControlMetrics>,
}

pub struct DemoLoop<C: Capture, R: Renderer, G: ResourceGateway> {
    capture: C,
    renderer: R,
    gateway: G,
    ladder: ResolutionLadder,
    pacer: CyclePacer,
    estimator: FrameRateEstimator,
    history: CycleHistory,
    controller: AdaptiveController,
    effect: EffectKind,
    fps_max: u16,
    num_frames: u64,
    awm_upper: u8,
    channels: LoopChannels,
}

impl<C: Capture, R: Renderer, G: ResourceGateway> DemoLoop<C, R, G> {
    /// Build a loop from a validated configuration.
    pub fn new(
        config: &Config,
        capture: C,
        renderer: R,
        gateway: G,
        channels: LoopChannels,
    ) -> Result<Self, DemoError> {
        let ladder = ResolutionLadder::new(config.resolutions.clone(), config.initial_resolution)?;
        Ok(Self {
            capture,
            renderer,
            gateway,
            ladder,
            pacer: CyclePacer::new(config.fps_max),
            estimator: FrameRateEstimator::new(config.rate_window()),
            history: CycleHistory::new(),
            controller: AdaptiveController::new(config.controller_settings()),
            effect: config.effect,
            fps_max: config.fps_max,
            num_frames: config.num_frames,
            awm_upper: config.awm_upper,
            channels,
        })
    }

    pub fn ladder(&self) -> &ResolutionLadder {
        &self.ladder
    }

    pub fn effect(&self) -> EffectKind {
        self.effect
    }

    pub fn frames(&self) -> u64 {
        self.estimator.frames_total()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Run until a stop condition, publishing a final status either way.
    pub fn run(&mut self) -> Result<ExitReason, DemoError> {
        let result = self.run_cycles();
        self.publish_status(false);
        match &result {
            Ok(reason) => info!(
                frames = self.frames(),
                "Processing loop finished: {:?}",
                reason
            ),
            Err(e) => warn!(frames = self.frames(), "Processing loop failed: {}", e),
        }
        result
    }

    fn run_cycles(&mut self) -> Result<ExitReason, DemoError> {
        self.capture.open()?;
        if let Err(e) = self.gateway.set_constraint(self.awm_upper) {
            warn!("Could not set resource constraint: {}", e);
        }
        self.ladder.apply(&mut self.capture, &mut self.estimator)?;
        self.controller.arm(Instant::now());
        info!(
            source = self.capture.name(),
            scheduler = self.gateway.name(),
            fps_max = self.fps_max,
            effect = %self.effect,
            "Processing loop started"
        );

        loop {
            if let Some(reason) = self.drain_events() {
                return Ok(reason);
            }
            if self.num_frames > 0 && self.frames() >= self.num_frames {
                return Ok(ExitReason::FrameBudget);
            }
            if self.ladder.pending() {
                self.ladder.apply(&mut self.capture, &mut self.estimator)?;
            }

            self.pacer.begin_cycle();
            if self.capture.grab()? == Grab::EndOfStream {
                return Ok(ExitReason::EndOfStream);
            }
            let frame = self.effect.apply(self.capture.retrieve()?);

            self.estimator.record_frame();
            self.channels.metrics.record_frame();
            let overlay = self.overlay();
            self.renderer.render(frame, &overlay);

            let deviation = self.pacer.end_cycle();
            if let Some(work) = self.pacer.timing().last_work {
                self.history.push(work);
            }

            // An unknown rate carries no deviation penalty.
            let observed = self.estimator.current_rate().map(|_| deviation);
            let action = self.controller.tick(
                Instant::now(),
                observed,
                Workload::from(self.effect),
                &mut self.ladder,
                &mut self.gateway,
            );
            if action != ControlAction::Throttled {
                debug!(deviation = deviation, "Policy tick: {:?}", action);
            }
            self.channels.metrics.record(action);
            self.publish_status(true);
        }
    }

    /// Handle every queued event. Returns an exit reason if the loop must stop.
    fn drain_events(&mut self) -> Option<ExitReason> {
        loop {
            let event = match self.channels.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(ExitReason::ChannelClosed),
            };
            match event {
                UiEvent::Exit => return Some(ExitReason::Stopped),
                UiEvent::SetEffect(effect) => {
                    info!("Effect set to {}", effect);
                    self.effect = effect;
                }
                UiEvent::Snapshot => {
                    if let Err(e) = self.renderer.snapshot() {
                        warn!("Snapshot failed: {}", e);
                    }
                }
                UiEvent::RaiseConstraint => match self.gateway.raise_constraint() {
                    Ok(Some(upper)) => info!("Constraint raised to [0-{}]", upper),
                    Ok(None) => debug!("Constraint already at its limit"),
                    Err(e) => warn!("Could not raise constraint: {}", e),
                },
                UiEvent::LowerConstraint => match self.gateway.lower_constraint() {
                    Ok(Some(upper)) => info!("Constraint lowered to [0-{}]", upper),
                    Ok(None) => debug!("Constraint already at 0"),
                    Err(e) => warn!("Could not lower constraint: {}", e),
                },
            }
        }
    }

    fn overlay(&self) -> Overlay {
        Overlay {
            rate: self.estimator.current_rate(),
            target_fps: self.fps_max,
            resolution: self.ladder.current(),
            resolution_index: self.ladder.index(),
            granted_level: self.gateway.current_granted_level(),
            max_level: self.gateway.max_level(),
            effect: self.effect,
            controller_state: self.controller.state().label(),
        }
    }

    fn publish_status(&self, running: bool) {
        let status = StatusResponse {
            running,
            current_fps: self.estimator.current_rate(),
            target_fps: self.fps_max,
            resolution: self.ladder.current().to_string(),
            resolution_index: self.ladder.index(),
            granted_level: self.gateway.current_granted_level(),
            max_level: self.gateway.max_level(),
            controller_state: self.controller.state().label().to_string(),
            effect: self.effect,
            frames_total: self.frames(),
            avg_cycle_ms: self.history.average_ms(),
            p99_cycle_ms: self.history.percentile_ms(0.99),
        };
        // Nobody listening is fine.
        let _ = self.channels.status.send(status);
    }
}
