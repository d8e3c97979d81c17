//! Sinks that only log, used when no platform backend is attached

use super::{
    FeedbackEvent, FeedbackListener, MagnifyPhase, MomentumPhase, OutputSink, ScrollPhase,
};
use crate::mapping::{MacroDefinition, ModifierKey, OutputKey, SystemCommand};
use egui::Modifiers;
use tracing::{debug, info, trace};

#[derive(Debug, Default, Clone)]
pub struct LoggingSink;

impl OutputSink for LoggingSink {
    fn key_down(&self, key: OutputKey, modifiers: Modifiers) {
        info!("Key down: {} {:?}", key, modifiers);
    }

    fn key_up(&self, key: OutputKey, modifiers: Modifiers) {
        info!("Key up: {} {:?}", key, modifiers);
    }

    fn hold_modifier(&self, modifier: ModifierKey) {
        info!("Modifier held: {:?}", modifier);
    }

    fn release_modifier(&self, modifier: ModifierKey) {
        info!("Modifier released: {:?}", modifier);
    }

    fn move_pointer(&self, dx: f64, dy: f64) {
        trace!("Pointer move: ({:.1}, {:.1})", dx, dy);
    }

    fn scroll(&self, dx: f64, dy: f64, phase: ScrollPhase, momentum: MomentumPhase) {
        debug!(
            "Scroll: ({:.1}, {:.1}) phase {:?} momentum {:?}",
            dx, dy, phase, momentum
        );
    }

    fn magnify(&self, amount: f64, phase: MagnifyPhase) {
        debug!("Magnify: {:.3} {:?}", amount, phase);
    }

    fn run_macro(&self, definition: &MacroDefinition) {
        info!(
            "Macro '{}' ({} steps)",
            definition.name,
            definition.steps.len()
        );
    }

    fn run_system_command(&self, command: &SystemCommand) {
        info!("System command: {}", command.display_name());
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoggingFeedback;

impl FeedbackListener for LoggingFeedback {
    fn on_feedback(&self, event: &FeedbackEvent) {
        info!(
            "[{}] {:?} {}: {} (haptic {:.2})",
            event.timestamp.format("%H:%M:%S%.3f"),
            event.trigger,
            event
                .button
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            event.text,
            event.haptic
        );
    }
}
