//! Profile model: the mapping tables the engine resolves input against.
//!
//! A [`Profile`] is plain data. It is validated once when it is loaded or
//! switched to and is read-only afterwards; all runtime state lives in the
//! engine.

pub mod action;
pub mod analog_settings;
pub mod error;
pub mod profile;

pub use action::{
    combine_modifiers, ExecutableAction, KeyBinding, ModifierKey, OutputKey, SystemCommand,
    SystemCommandKind,
};
pub use analog_settings::{
    DirectionLayout, JoystickSettings, MotionSettings, PinchMode, StickMode, StickSettings,
    TouchpadSettings,
};
pub use error::MappingError;
pub use profile::{
    ButtonBinding, ButtonMapping, ChordMapping, GestureDirection, Layer, MacroDefinition,
    MacroStep, MotionBinding, Profile, RepeatMapping, ScriptDefinition, SequenceMapping,
    TimedAction,
};
