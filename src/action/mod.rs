//! Action resolution and execution
//!
//! ```text
//! ExecutableAction ──► ActionResolver (strategy chain) ──► ResolvedAction
//!                                                            │
//!                      feedback text ◄── ActionExecutor ◄────┘
//! ```

pub mod executor;
pub mod strategy;

pub use executor::{ActionExecutor, Execution, FollowUp, ModifierTracker, SCRIPT_ERROR_FEEDBACK};
pub use strategy::{ActionResolver, ActionStrategy, ResolveContext, ResolvedAction};

/// Why an action fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Tap,
    DoubleTap,
    LongHold,
    Repeat,
    Hold,
    Chord,
    Sequence,
    Motion,
}

impl Trigger {
    /// Suggested haptic strength; rarer, deliberate gestures feel stronger
    pub fn haptic_intensity(self) -> f32 {
        match self {
            Trigger::Repeat => 0.1,
            Trigger::Hold => 0.2,
            Trigger::Tap => 0.3,
            Trigger::DoubleTap => 0.5,
            Trigger::Motion => 0.5,
            Trigger::Chord => 0.6,
            Trigger::LongHold => 0.7,
            Trigger::Sequence => 0.8,
        }
    }
}
