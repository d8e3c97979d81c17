//! In-memory sinks for tests and diagnostics

use super::{
    FeedbackEvent, FeedbackListener, MagnifyPhase, MomentumPhase, OutputCommand, OutputSink,
    ScrollPhase,
};
use crate::mapping::{MacroDefinition, ModifierKey, OutputKey, SystemCommand};
use egui::Modifiers;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<OutputCommand>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: OutputCommand) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }

    pub fn commands(&self) -> Vec<OutputCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Keys pressed, in order
    pub fn key_downs(&self) -> Vec<OutputKey> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                OutputCommand::KeyDown(key, _) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn key_ups(&self) -> Vec<OutputKey> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                OutputCommand::KeyUp(key, _) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn pointer_commands(&self) -> Vec<OutputCommand> {
        self.commands()
            .into_iter()
            .filter(OutputCommand::is_pointer)
            .collect()
    }

    /// Modifiers currently asserted according to the recorded hold/release calls
    pub fn held_modifiers(&self) -> Vec<ModifierKey> {
        let mut held = Vec::new();
        for command in self.commands() {
            match command {
                OutputCommand::HoldModifier(modifier) => held.push(modifier),
                OutputCommand::ReleaseModifier(modifier) => {
                    if let Some(pos) = held.iter().position(|m| *m == modifier) {
                        held.remove(pos);
                    }
                }
                _ => {}
            }
        }
        held
    }

    /// Keys that went down and never came back up
    pub fn stuck_keys(&self) -> Vec<OutputKey> {
        let mut down = Vec::new();
        for command in self.commands() {
            match command {
                OutputCommand::KeyDown(key, _) => down.push(key),
                OutputCommand::KeyUp(key, _) => {
                    if let Some(pos) = down.iter().position(|k| *k == key) {
                        down.remove(pos);
                    }
                }
                _ => {}
            }
        }
        down
    }
}

impl OutputSink for RecordingSink {
    fn key_down(&self, key: OutputKey, modifiers: Modifiers) {
        self.push(OutputCommand::KeyDown(key, modifiers));
    }

    fn key_up(&self, key: OutputKey, modifiers: Modifiers) {
        self.push(OutputCommand::KeyUp(key, modifiers));
    }

    fn hold_modifier(&self, modifier: ModifierKey) {
        self.push(OutputCommand::HoldModifier(modifier));
    }

    fn release_modifier(&self, modifier: ModifierKey) {
        self.push(OutputCommand::ReleaseModifier(modifier));
    }

    fn move_pointer(&self, dx: f64, dy: f64) {
        self.push(OutputCommand::MovePointer { dx, dy });
    }

    fn scroll(&self, dx: f64, dy: f64, phase: ScrollPhase, momentum: MomentumPhase) {
        self.push(OutputCommand::Scroll {
            dx,
            dy,
            phase,
            momentum,
        });
    }

    fn magnify(&self, amount: f64, phase: MagnifyPhase) {
        self.push(OutputCommand::Magnify { amount, phase });
    }

    fn run_macro(&self, definition: &MacroDefinition) {
        self.push(OutputCommand::RunMacro(definition.clone()));
    }

    fn run_system_command(&self, command: &SystemCommand) {
        self.push(OutputCommand::RunSystemCommand(command.clone()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingFeedback {
    events: Mutex<Vec<FeedbackEvent>>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FeedbackEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.text).collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl FeedbackListener for RecordingFeedback {
    fn on_feedback(&self, event: &FeedbackEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::Key;

    #[test]
    fn tap_records_down_then_up() {
        let sink = RecordingSink::new();
        sink.tap(OutputKey::Keyboard(Key::A), Modifiers::NONE);
        assert_eq!(sink.key_downs(), vec![OutputKey::Keyboard(Key::A)]);
        assert_eq!(sink.key_ups(), vec![OutputKey::Keyboard(Key::A)]);
        assert!(sink.stuck_keys().is_empty());
    }

    #[test]
    fn held_modifiers_follow_hold_and_release() {
        let sink = RecordingSink::new();
        sink.hold_modifier(ModifierKey::Shift);
        sink.hold_modifier(ModifierKey::Command);
        sink.release_modifier(ModifierKey::Shift);
        assert_eq!(sink.held_modifiers(), vec![ModifierKey::Command]);
    }
}
