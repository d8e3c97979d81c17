//! Peak-velocity gesture detection on rotational axes
//!
//! ```text
//!          |v| >= activation && cooldown over
//!   Idle ───────────────────────────────────► Tracking
//!    ▲  ◄─────── tracking too long ──────────────┤
//!    │                                           │ |v| < peak * completion_ratio
//!    │   |v| < settle && cooldown over           ▼ (emit if peak >= min_peak)
//!    └──────────────────────────────────── Settling
//! ```

use super::GestureDetector;
use crate::controller::MotionAxis;
use crate::mapping::{GestureDirection, MotionSettings};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisPhase {
    Idle,
    Tracking {
        started: Instant,
        peak: f64,
        direction: GestureDirection,
    },
    Settling,
}

#[derive(Debug, Clone)]
pub struct MotionAxisDetector {
    settings: MotionSettings,
    phase: AxisPhase,
    last_gesture: Option<(Instant, GestureDirection)>,
}

impl MotionAxisDetector {
    pub fn new(settings: MotionSettings) -> Self {
        Self {
            settings,
            phase: AxisPhase::Idle,
            last_gesture: None,
        }
    }

    pub fn phase(&self) -> AxisPhase {
        self.phase
    }

    fn cooldown_over(&self, at: Instant, direction: Option<GestureDirection>) -> bool {
        let Some((last_at, last_direction)) = self.last_gesture else {
            return true;
        };
        let cooldown = match direction {
            Some(direction) if direction != last_direction => {
                Duration::from_millis(self.settings.opposite_cooldown_ms)
            }
            _ => Duration::from_millis(self.settings.cooldown_ms),
        };
        at.saturating_duration_since(last_at) >= cooldown
    }
}

impl GestureDetector for MotionAxisDetector {
    type Input = f64;
    type Output = GestureDirection;

    fn process(&mut self, velocity: f64, at: Instant) -> Option<GestureDirection> {
        let magnitude = velocity.abs();
        match self.phase {
            AxisPhase::Idle => {
                let direction = GestureDirection::of(velocity);
                if magnitude >= self.settings.activation_threshold
                    && self.cooldown_over(at, Some(direction))
                {
                    self.phase = AxisPhase::Tracking {
                        started: at,
                        peak: magnitude,
                        direction,
                    };
                }
                None
            }
            AxisPhase::Tracking {
                started,
                peak,
                direction,
            } => {
                if at.saturating_duration_since(started)
                    > Duration::from_millis(self.settings.max_tracking_ms)
                {
                    debug!("Motion excursion took too long, aborting");
                    self.phase = AxisPhase::Idle;
                    return None;
                }
                if magnitude > peak {
                    self.phase = AxisPhase::Tracking {
                        started,
                        peak: magnitude,
                        direction: GestureDirection::of(velocity),
                    };
                    return None;
                }
                if magnitude >= peak * self.settings.completion_ratio {
                    return None;
                }
                self.phase = AxisPhase::Settling;
                if peak < self.settings.min_peak {
                    debug!("Motion excursion peaked at {:.2}, below minimum", peak);
                    return None;
                }
                self.last_gesture = Some((at, direction));
                Some(direction)
            }
            AxisPhase::Settling => {
                if magnitude < self.settings.settle_threshold && self.cooldown_over(at, None) {
                    self.phase = AxisPhase::Idle;
                }
                None
            }
        }
    }

    fn reset(&mut self) {
        self.phase = AxisPhase::Idle;
        self.last_gesture = None;
    }
}

/// One [`MotionAxisDetector`] per axis
#[derive(Debug, Clone)]
pub struct MotionGestureDetector {
    axes: BTreeMap<MotionAxis, MotionAxisDetector>,
}

impl MotionGestureDetector {
    pub fn new(settings: &MotionSettings) -> Self {
        Self {
            axes: MotionAxis::ALL
                .iter()
                .map(|axis| (*axis, MotionAxisDetector::new(settings.clone())))
                .collect(),
        }
    }

    pub fn phase(&self, axis: MotionAxis) -> Option<AxisPhase> {
        self.axes.get(&axis).map(MotionAxisDetector::phase)
    }
}

impl GestureDetector for MotionGestureDetector {
    type Input = (MotionAxis, f64);
    type Output = (MotionAxis, GestureDirection);

    fn process(
        &mut self,
        (axis, velocity): (MotionAxis, f64),
        at: Instant,
    ) -> Option<(MotionAxis, GestureDirection)> {
        self.axes
            .get_mut(&axis)?
            .process(velocity, at)
            .map(|direction| (axis, direction))
    }

    fn reset(&mut self) {
        self.axes.values_mut().for_each(GestureDetector::reset);
    }
}
