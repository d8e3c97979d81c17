//! Touchpad pointer, pan/pinch discrimination and scroll momentum
//!
//! Single-finger movement drives the pointer through an exponential moving
//! average. Two-finger samples are classified as pan or pinch; pan scrolls
//! and can hand over to momentum when the fingers lift, pinch either
//! magnifies or fires zoom keys.

use super::{whole_pixels, AnalogOutput};
use crate::controller::TwoFingerSample;
use crate::mapping::{PinchMode, TouchpadSettings};
use crate::output::{MagnifyPhase, MomentumPhase, ScrollPhase};
use std::time::{Duration, Instant};
use tracing::debug;

/// Weight of the previous pan velocity in the velocity average
const PAN_VELOCITY_SMOOTHING: f64 = 0.5;
/// Accumulated opposite pinch needed before the magnify direction flips
const MAGNIFY_REVERSAL_HYSTERESIS: f64 = 0.01;
const MAX_MOMENTUM_TICK_SECONDS: f64 = 0.1;

#[derive(Debug, Clone, Default)]
struct PanState {
    last_at: Option<Instant>,
    velocity: (f64, f64),
    residual: (f64, f64),
    fast_samples: u32,
    fast_since: Option<Instant>,
    candidate: Option<(f64, f64)>,
    scrolling: bool,
}

#[derive(Debug, Clone, Default)]
struct MagnifyState {
    active: bool,
    direction: f64,
    reversal: f64,
    zoom_accumulator: f64,
}

#[derive(Debug, Clone)]
struct Momentum {
    velocity: (f64, f64),
    last_tick: Instant,
    residual: (f64, f64),
    started: bool,
}

#[derive(Debug, Clone)]
pub struct TouchpadProcessor {
    settings: TouchpadSettings,
    pointer_average: (f64, f64),
    pointer_residual: (f64, f64),
    last_move_at: Option<Instant>,
    pan: PanState,
    magnify: MagnifyState,
    momentum: Option<Momentum>,
}

impl TouchpadProcessor {
    pub fn new(settings: TouchpadSettings) -> Self {
        Self {
            settings,
            pointer_average: (0.0, 0.0),
            pointer_residual: (0.0, 0.0),
            last_move_at: None,
            pan: PanState::default(),
            magnify: MagnifyState::default(),
            momentum: None,
        }
    }

    pub fn momentum_active(&self) -> bool {
        self.momentum.is_some()
    }

    fn reset_gap(&self) -> Duration {
        Duration::from_millis(self.settings.reset_gap_ms)
    }

    /// Single-finger movement
    pub fn on_move(&mut self, dx: f64, dy: f64, at: Instant) -> Vec<AnalogOutput> {
        let mut outputs = self.cancel_momentum();

        let fresh = self
            .last_move_at
            .map(|last| at.saturating_duration_since(last) > self.reset_gap())
            .unwrap_or(true);
        self.last_move_at = Some(at);
        if fresh {
            self.pointer_average = (dx, dy);
            self.pointer_residual = (0.0, 0.0);
        } else {
            let keep = self.settings.smoothing;
            self.pointer_average = (
                self.pointer_average.0 * keep + dx * (1.0 - keep),
                self.pointer_average.1 * keep + dy * (1.0 - keep),
            );
        }

        let px = whole_pixels(
            self.pointer_average.0 * self.settings.sensitivity,
            &mut self.pointer_residual.0,
        );
        let py = whole_pixels(
            self.pointer_average.1 * self.settings.sensitivity,
            &mut self.pointer_residual.1,
        );
        if px != 0.0 || py != 0.0 {
            outputs.push(AnalogOutput::MovePointer { dx: px, dy: py });
        }
        outputs
    }

    /// Two-finger sample
    pub fn on_gesture(&mut self, sample: TwoFingerSample, at: Instant) -> Vec<AnalogOutput> {
        if !sample.both_touching() {
            return self.lift(at);
        }

        let mut outputs = self.cancel_momentum();
        let pan = sample.center_dx.hypot(sample.center_dy);
        let pinch = sample.distance_delta.abs();

        if pinch >= self.settings.pinch_deadzone && pinch > pan * self.settings.pinch_ratio {
            outputs.extend(self.pinch(sample.distance_delta));
        } else if pan >= self.settings.pan_deadzone {
            outputs.extend(self.pan(sample.center_dx, sample.center_dy, at));
        }
        outputs
    }

    fn pinch(&mut self, distance_delta: f64) -> Vec<AnalogOutput> {
        match self.settings.pinch_mode {
            PinchMode::ZoomKeys => {
                let step = self.settings.zoom_step;
                self.magnify.zoom_accumulator += distance_delta;
                let mut outputs = Vec::new();
                while self.magnify.zoom_accumulator >= step {
                    self.magnify.zoom_accumulator -= step;
                    outputs.push(AnalogOutput::KeyTap(self.settings.zoom_in.clone()));
                }
                while self.magnify.zoom_accumulator <= -step {
                    self.magnify.zoom_accumulator += step;
                    outputs.push(AnalogOutput::KeyTap(self.settings.zoom_out.clone()));
                }
                outputs
            }
            PinchMode::Magnify => {
                let sign = distance_delta.signum();
                if self.magnify.active && sign != self.magnify.direction {
                    self.magnify.reversal += distance_delta.abs();
                    if self.magnify.reversal < MAGNIFY_REVERSAL_HYSTERESIS {
                        return Vec::new();
                    }
                    debug!("Magnify direction reversed");
                }
                self.magnify.reversal = 0.0;
                self.magnify.direction = sign;

                let phase = if self.magnify.active {
                    MagnifyPhase::Changed
                } else {
                    self.magnify.active = true;
                    MagnifyPhase::Began
                };
                vec![AnalogOutput::Magnify {
                    amount: distance_delta * self.settings.magnify_sensitivity,
                    phase,
                }]
            }
        }
    }

    fn pan(&mut self, dx: f64, dy: f64, at: Instant) -> Vec<AnalogOutput> {
        let gap = self
            .pan
            .last_at
            .map(|last| at.saturating_duration_since(last));
        let continuing = matches!(gap, Some(gap) if gap <= self.reset_gap() && !gap.is_zero());
        self.pan.last_at = Some(at);

        let scaled = (
            dx * self.settings.scroll_sensitivity,
            dy * self.settings.scroll_sensitivity,
        );
        match gap {
            Some(gap) if continuing => {
                let seconds = gap.as_secs_f64();
                let instant = (scaled.0 / seconds, scaled.1 / seconds);
                let keep = PAN_VELOCITY_SMOOTHING;
                self.pan.velocity = (
                    self.pan.velocity.0 * keep + instant.0 * (1.0 - keep),
                    self.pan.velocity.1 * keep + instant.1 * (1.0 - keep),
                );
                self.track_momentum_candidate(at);
            }
            _ => {
                self.pan.velocity = (0.0, 0.0);
                self.pan.fast_samples = 0;
                self.pan.fast_since = None;
                self.pan.candidate = None;
            }
        }

        let px = whole_pixels(scaled.0, &mut self.pan.residual.0);
        let py = whole_pixels(scaled.1, &mut self.pan.residual.1);
        let phase = if self.pan.scrolling {
            ScrollPhase::Changed
        } else {
            ScrollPhase::Began
        };
        if px == 0.0 && py == 0.0 && phase == ScrollPhase::Changed {
            return Vec::new();
        }
        self.pan.scrolling = true;
        vec![AnalogOutput::Scroll {
            dx: px,
            dy: py,
            phase,
            momentum: MomentumPhase::None,
        }]
    }

    /// Momentum arms after two consecutive fast samples spanning the minimum duration
    fn track_momentum_candidate(&mut self, at: Instant) {
        let speed = self.pan.velocity.0.hypot(self.pan.velocity.1);
        if speed < self.settings.momentum_start_velocity {
            self.pan.fast_samples = 0;
            self.pan.fast_since = None;
            self.pan.candidate = None;
            return;
        }
        self.pan.fast_samples += 1;
        let since = *self.pan.fast_since.get_or_insert(at);
        let sustained = at.saturating_duration_since(since)
            >= Duration::from_millis(self.settings.momentum_min_duration_ms);
        if self.pan.fast_samples >= 2 && sustained {
            self.pan.candidate = Some(self.pan.velocity);
        }
    }

    fn lift(&mut self, at: Instant) -> Vec<AnalogOutput> {
        let mut outputs = Vec::new();
        if self.magnify.active {
            outputs.push(AnalogOutput::Magnify {
                amount: 0.0,
                phase: MagnifyPhase::Ended,
            });
        }
        self.magnify = MagnifyState::default();

        if self.pan.scrolling {
            outputs.push(AnalogOutput::Scroll {
                dx: 0.0,
                dy: 0.0,
                phase: ScrollPhase::Ended,
                momentum: MomentumPhase::None,
            });
        }
        if let (true, Some(velocity)) = (self.settings.momentum, self.pan.candidate) {
            debug!("Momentum armed at {:.0} px/s", velocity.0.hypot(velocity.1));
            self.momentum = Some(Momentum {
                velocity,
                last_tick: at,
                residual: (0.0, 0.0),
                started: false,
            });
        }
        self.pan = PanState::default();
        outputs
    }

    fn cancel_momentum(&mut self) -> Vec<AnalogOutput> {
        match self.momentum.take() {
            Some(momentum) if momentum.started => vec![AnalogOutput::Scroll {
                dx: 0.0,
                dy: 0.0,
                phase: ScrollPhase::None,
                momentum: MomentumPhase::Ended,
            }],
            _ => Vec::new(),
        }
    }

    /// Advances momentum decay; silent when there is no momentum
    pub fn tick(&mut self, now: Instant) -> Vec<AnalogOutput> {
        let Some(momentum) = self.momentum.as_mut() else {
            return Vec::new();
        };

        let dt = now
            .saturating_duration_since(momentum.last_tick)
            .as_secs_f64()
            .min(MAX_MOMENTUM_TICK_SECONDS);
        if dt <= 0.0 {
            return Vec::new();
        }
        momentum.last_tick = now;

        let decay = (-self.settings.momentum_decay * dt).exp();
        momentum.velocity = (momentum.velocity.0 * decay, momentum.velocity.1 * decay);
        let speed = momentum.velocity.0.hypot(momentum.velocity.1);
        if speed < self.settings.momentum_stop_velocity {
            let started = momentum.started;
            self.momentum = None;
            if !started {
                return Vec::new();
            }
            return vec![AnalogOutput::Scroll {
                dx: 0.0,
                dy: 0.0,
                phase: ScrollPhase::None,
                momentum: MomentumPhase::Ended,
            }];
        }

        let px = whole_pixels(momentum.velocity.0 * dt, &mut momentum.residual.0);
        let py = whole_pixels(momentum.velocity.1 * dt, &mut momentum.residual.1);
        let phase = if momentum.started {
            MomentumPhase::Changed
        } else {
            momentum.started = true;
            MomentumPhase::Began
        };
        vec![AnalogOutput::Scroll {
            dx: px,
            dy: py,
            phase: ScrollPhase::None,
            momentum: phase,
        }]
    }

    /// Ends every open gesture and drops momentum
    pub fn reset(&mut self) -> Vec<AnalogOutput> {
        let mut outputs = self.cancel_momentum();
        if self.magnify.active {
            outputs.push(AnalogOutput::Magnify {
                amount: 0.0,
                phase: MagnifyPhase::Ended,
            });
        }
        if self.pan.scrolling {
            outputs.push(AnalogOutput::Scroll {
                dx: 0.0,
                dy: 0.0,
                phase: ScrollPhase::Ended,
                momentum: MomentumPhase::None,
            });
        }
        self.magnify = MagnifyState::default();
        self.pan = PanState::default();
        self.pointer_average = (0.0, 0.0);
        self.pointer_residual = (0.0, 0.0);
        self.last_move_at = None;
        outputs
    }
}
