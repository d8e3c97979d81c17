//! Controller subsystem: the hardware-agnostic input vocabulary
//!
//! Everything downstream of this module speaks in [`InputEvent`]s. The
//! concrete controller (Xbox-class, DualSense-class, or anything gilrs
//! normalizes through its mapping database) is resolved here and never
//! leaks into the engine.
//!
//! # Architecture
//!
//! ```text
//! Gamepad ──► EventCollector ──┬──► discrete channel (buttons)
//!             (gilrs)          └──► analog channel (sticks, touchpad, motion)
//! ```
//!
//! 1. [`event_collector`] - gilrs polling and event conversion
//! 2. [`controller_handle`] - input thread lifecycle and channel split

pub mod controller_handle;
pub mod event_collector;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::time::{Duration, Instant};

pub use controller_handle::{ControllerError, ControllerHandle, ControllerSettings};
pub use event_collector::{CollectorError, EventCollector};

/// Canonical logical inputs, independent of the physical controller brand.
///
/// The declaration order is the canonical ordering used wherever the engine
/// needs a reproducible iteration order (e.g. chord fallback).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ButtonId {
    A,
    B,
    X,
    Y,
    LeftBumper,
    RightBumper,
    LeftTrigger,
    RightTrigger,
    LeftThumbstick,
    RightThumbstick,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    Menu,
    View,
    Xbox,
    Share,
    TouchpadButton,
    TouchpadTwoFingerButton,
    TouchpadTap,
    TouchpadTwoFingerTap,
    Mic,
    LeftPaddle,
    RightPaddle,
    LeftFunction,
    RightFunction,
}

impl ButtonId {
    pub fn is_dpad(self) -> bool {
        matches!(
            self,
            ButtonId::DpadUp | ButtonId::DpadDown | ButtonId::DpadLeft | ButtonId::DpadRight
        )
    }
}

impl Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StickId {
    Left,
    Right,
}

/// Independent rotational axis tracked for motion gestures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MotionAxis {
    Pitch,
    Roll,
    Yaw,
}

impl MotionAxis {
    pub const ALL: [MotionAxis; 3] = [MotionAxis::Pitch, MotionAxis::Roll, MotionAxis::Yaw];
}

/// One sample of a two-finger touchpad gesture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoFingerSample {
    /// Movement of the midpoint between both fingers since the last sample
    pub center_dx: f64,
    pub center_dy: f64,
    /// Change of the distance between both fingers since the last sample
    pub distance_delta: f64,
    pub first_touching: bool,
    pub second_touching: bool,
}

impl TwoFingerSample {
    pub fn both_touching(&self) -> bool {
        self.first_touching && self.second_touching
    }
}

/// Normalized controller input.
///
/// Button edges go to the discrete queue, everything else is sampled by the
/// analog queue.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    ButtonDown {
        button: ButtonId,
        at: Instant,
    },
    ButtonUp {
        button: ButtonId,
        at: Instant,
        /// Hold duration as measured by the source, if it tracks one
        held: Option<Duration>,
    },
    Stick {
        stick: StickId,
        x: f64,
        y: f64,
        at: Instant,
    },
    TouchpadMove {
        dx: f64,
        dy: f64,
        at: Instant,
    },
    TouchpadGesture {
        sample: TwoFingerSample,
        at: Instant,
    },
    Motion {
        axis: MotionAxis,
        velocity: f64,
        at: Instant,
    },
}

impl InputEvent {
    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            InputEvent::ButtonDown { .. } | InputEvent::ButtonUp { .. }
        )
    }

    pub fn timestamp(&self) -> Instant {
        match self {
            InputEvent::ButtonDown { at, .. }
            | InputEvent::ButtonUp { at, .. }
            | InputEvent::Stick { at, .. }
            | InputEvent::TouchpadMove { at, .. }
            | InputEvent::TouchpadGesture { at, .. }
            | InputEvent::Motion { at, .. } => *at,
        }
    }
}

/// Producer of normalized input events.
///
/// Implementations are polled from a dedicated input thread; `Ok(None)`
/// means nothing is pending right now.
pub trait InputSource {
    fn poll_event(&mut self) -> Result<Option<InputEvent>, CollectorError>;

    fn name(&self) -> &str;
}
