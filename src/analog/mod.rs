//! Continuous input processing
//!
//! Stick, touchpad and motion samples are folded into processor state as
//! they arrive; the analog tick then turns that state into pointer, scroll
//! and key output. Processors never touch the output sink themselves, they
//! return [`AnalogOutput`]s that the engine applies once its lock is
//! released.

pub mod joystick;
pub mod touchpad;

use crate::mapping::KeyBinding;
use crate::output::{MagnifyPhase, MomentumPhase, ScrollPhase};
use egui::Key;

pub use joystick::{FocusRamp, JoystickProcessor, StickProcessor};
pub use touchpad::TouchpadProcessor;

#[derive(Debug, Clone, PartialEq)]
pub enum AnalogOutput {
    MovePointer {
        dx: f64,
        dy: f64,
    },
    Scroll {
        dx: f64,
        dy: f64,
        phase: ScrollPhase,
        momentum: MomentumPhase,
    },
    Magnify {
        amount: f64,
        phase: MagnifyPhase,
    },
    KeyDown(Key),
    KeyUp(Key),
    KeyTap(KeyBinding),
}

/// Splits a fractional delta into whole pixels and the carried remainder
pub(crate) fn whole_pixels(value: f64, residual: &mut f64) -> f64 {
    let total = value + *residual;
    let whole = total.trunc();
    *residual = total - whole;
    whole
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_carries_fractions_between_ticks() {
        let mut residual = 0.0;
        let emitted: f64 = (0..10).map(|_| whole_pixels(0.25, &mut residual)).sum();
        assert_eq!(emitted, 2.0);
        assert_eq!(residual, 0.5);
    }

    #[test]
    fn negative_deltas_truncate_toward_zero() {
        let mut residual = 0.0;
        assert_eq!(whole_pixels(-1.6, &mut residual), -1.0);
        assert!((residual + 0.6).abs() < 1e-9);
    }
}
