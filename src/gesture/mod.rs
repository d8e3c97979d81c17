//! Temporal pattern detectors
//!
//! Chords, sequences and motion gestures are independent state machines
//! behind one interface. None of them owns a timer: time comes in with every
//! input, and expiry is just another input the engine feeds in when its
//! scheduled task fires.

pub mod chord;
pub mod motion;
pub mod sequence;

use std::time::Instant;

pub use chord::{ChordDetector, ChordInput, ChordOutcome};
pub use motion::{AxisPhase, MotionAxisDetector, MotionGestureDetector};
pub use sequence::SequenceDetector;

pub trait GestureDetector {
    type Input;
    type Output;

    /// Feeds one input; returns a result once a pattern completes
    fn process(&mut self, input: Self::Input, at: Instant) -> Option<Self::Output>;

    /// Forgets everything in flight
    fn reset(&mut self);
}
