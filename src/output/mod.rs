//! Everything the engine talks to on its way out.
//!
//! The engine never emits keys or pointer motion itself. It calls an
//! [`OutputSink`] and reports what it did to [`FeedbackListener`]s. Overlays,
//! on-screen keyboards and script engines are injected the same way, so each
//! collaborator can be replaced by a recording fake in tests.

pub mod logging;
pub mod queued;
pub mod recording;

use crate::action::Trigger;
use crate::controller::ButtonId;
use crate::mapping::{MacroDefinition, ModifierKey, OutputKey, ScriptDefinition, SystemCommand};
use chrono::{DateTime, Local};
use egui::Modifiers;

pub use logging::{LoggingFeedback, LoggingSink};
pub use queued::{OutputQueues, QueuedSink};
pub use recording::{RecordingFeedback, RecordingSink};

/// Phase of a finger-driven scroll gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    None,
    Began,
    Changed,
    Ended,
}

/// Phase of the inertial continuation after the fingers lift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentumPhase {
    None,
    Began,
    Changed,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagnifyPhase {
    Began,
    Changed,
    Ended,
}

/// Keyboard, pointer and command output
pub trait OutputSink: Send + Sync {
    fn key_down(&self, key: OutputKey, modifiers: Modifiers);

    fn key_up(&self, key: OutputKey, modifiers: Modifiers);

    fn tap(&self, key: OutputKey, modifiers: Modifiers) {
        self.key_down(key, modifiers);
        self.key_up(key, modifiers);
    }

    fn hold_modifier(&self, modifier: ModifierKey);

    fn release_modifier(&self, modifier: ModifierKey);

    fn move_pointer(&self, dx: f64, dy: f64);

    fn scroll(&self, dx: f64, dy: f64, phase: ScrollPhase, momentum: MomentumPhase);

    fn magnify(&self, amount: f64, phase: MagnifyPhase);

    fn run_macro(&self, definition: &MacroDefinition);

    fn run_system_command(&self, command: &SystemCommand);
}

/// One recorded or queued call on an [`OutputSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCommand {
    KeyDown(OutputKey, Modifiers),
    KeyUp(OutputKey, Modifiers),
    HoldModifier(ModifierKey),
    ReleaseModifier(ModifierKey),
    MovePointer { dx: f64, dy: f64 },
    Scroll {
        dx: f64,
        dy: f64,
        phase: ScrollPhase,
        momentum: MomentumPhase,
    },
    Magnify { amount: f64, phase: MagnifyPhase },
    RunMacro(MacroDefinition),
    RunSystemCommand(SystemCommand),
}

impl OutputCommand {
    /// Pointer commands travel on their own queue
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            OutputCommand::MovePointer { .. }
                | OutputCommand::Scroll { .. }
                | OutputCommand::Magnify { .. }
        )
    }

    /// Pointer deltas that may be shed under back-pressure; phase changes may not
    pub fn is_droppable_delta(&self) -> bool {
        match self {
            OutputCommand::MovePointer { .. } => true,
            OutputCommand::Scroll {
                phase, momentum, ..
            } => {
                matches!(phase, ScrollPhase::None | ScrollPhase::Changed)
                    && matches!(momentum, MomentumPhase::None | MomentumPhase::Changed)
            }
            OutputCommand::Magnify { phase, .. } => *phase == MagnifyPhase::Changed,
            _ => false,
        }
    }

    pub fn apply(self, sink: &dyn OutputSink) {
        match self {
            OutputCommand::KeyDown(key, modifiers) => sink.key_down(key, modifiers),
            OutputCommand::KeyUp(key, modifiers) => sink.key_up(key, modifiers),
            OutputCommand::HoldModifier(modifier) => sink.hold_modifier(modifier),
            OutputCommand::ReleaseModifier(modifier) => sink.release_modifier(modifier),
            OutputCommand::MovePointer { dx, dy } => sink.move_pointer(dx, dy),
            OutputCommand::Scroll {
                dx,
                dy,
                phase,
                momentum,
            } => sink.scroll(dx, dy, phase, momentum),
            OutputCommand::Magnify { amount, phase } => sink.magnify(amount, phase),
            OutputCommand::RunMacro(definition) => sink.run_macro(&definition),
            OutputCommand::RunSystemCommand(command) => sink.run_system_command(&command),
        }
    }
}

/// What happened, for HUDs and logs
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    pub text: String,
    /// Suggested haptic strength in [0, 1]
    pub haptic: f32,
    pub trigger: Trigger,
    pub button: Option<ButtonId>,
    pub timestamp: DateTime<Local>,
}

impl FeedbackEvent {
    pub fn new(text: impl Into<String>, trigger: Trigger, button: Option<ButtonId>) -> Self {
        Self {
            text: text.into(),
            haptic: trigger.haptic_intensity(),
            trigger,
            button,
            timestamp: Local::now(),
        }
    }
}

pub trait FeedbackListener: Send + Sync {
    fn on_feedback(&self, event: &FeedbackEvent);
}

/// An on-screen consumer that can take over buttons while it is visible
pub trait OverlayConsumer: Send + Sync {
    /// Asked before any state is locked; the overlay may call back into the engine
    fn claims(&self, button: ButtonId) -> bool;

    fn button_down(&self, button: ButtonId);

    fn button_up(&self, button: ButtonId);
}

/// Notified about every key the engine presses, e.g. to highlight it on an on-screen keyboard
pub trait KeyboardObserver: Send + Sync {
    fn key_pressed(&self, key: OutputKey, modifiers: Modifiers);
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Script failed: {0}")]
    Failed(String),

    #[error("Script engine unavailable: {0}")]
    Unavailable(String),
}

pub trait ScriptEngine: Send + Sync {
    /// Runs a script and optionally returns feedback text
    fn run(&self, script: &ScriptDefinition) -> Result<Option<String>, ScriptError>;
}
