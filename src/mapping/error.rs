//! Error definitions for the profile model

use crate::controller::ButtonId;
use thiserror::Error;

/// Reasons a profile is rejected before the engine accepts it
#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("Chord needs at least two buttons, got {0}")]
    ChordTooSmall(usize),

    #[error("Chord {0} is defined more than once")]
    DuplicateChord(String),

    #[error("Sequence {0} has no steps")]
    EmptySequence(usize),

    #[error("Zero timeout in {0}")]
    ZeroTimeout(String),

    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    #[error("Layer {0} is defined more than once")]
    DuplicateLayer(String),

    #[error("Button {0} activates more than one layer")]
    ConflictingActivator(ButtonId),

    #[error("Deadzone {0} is outside [0, 1)")]
    InvalidDeadzone(f64),

    #[error("Invalid analog setting: {0}")]
    InvalidAnalogSetting(String),

    #[error("Repeat interval of {0} must be greater than zero")]
    ZeroRepeatInterval(ButtonId),

    #[error("Profile not found: {0}")]
    UnknownProfile(String),
}
