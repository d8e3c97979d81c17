//! Press orchestration
//!
//! Decides what a button-down means: layer activation, overlay capture,
//! a continuously simulated hold, or the tap path with its long-hold and
//! repeat timers. Sequences and the chord window see the press first.

use super::scheduler::Task;
use super::state::{Decision, Effect, EngineState, PressRecord};
use crate::action::Trigger;
use crate::controller::ButtonId;
use crate::gesture::{ChordInput, GestureDetector};
use crate::mapping::{ButtonMapping, Profile};
use std::time::Instant;
use tracing::debug;

impl EngineState {
    /// A whole button-down under one lock: layer activation first, then
    /// overlay capture when `claimed`, then the mapped press
    pub(crate) fn press_input(&mut self, button: ButtonId, at: Instant, claimed: bool) -> Decision {
        if self.activate_layer(button, at) {
            return Decision::none();
        }
        if claimed {
            if !self.intercept(button, at) {
                return Decision::none();
            }
            debug!("{} routed to the overlay", button);
            return self.decision(vec![Effect::OverlayDown(button)]);
        }
        self.press(button, at)
    }

    /// Pushes the button's layer if it is an activator.
    ///
    /// Returns `true` when the press was consumed.
    pub(crate) fn activate_layer(&mut self, button: ButtonId, at: Instant) -> bool {
        let Some(profile) = self.active_profile() else {
            return false;
        };
        let Some(layer) = profile.layer_activated_by(button) else {
            return false;
        };
        if self.pressed.contains_key(&button) {
            return true;
        }
        self.layers.activate(&layer.id);
        let mut record = PressRecord::new(at, None);
        record.layer = Some(layer.id.clone());
        self.pressed.insert(button, record);
        true
    }

    /// Records a press the overlay took over; returns `false` for a repeated edge
    pub(crate) fn intercept(&mut self, button: ButtonId, at: Instant) -> bool {
        if self.active_profile().is_none() || self.pressed.contains_key(&button) {
            return false;
        }
        let mut record = PressRecord::new(at, None);
        record.intercepted = true;
        self.pressed.insert(button, record);
        true
    }

    pub(crate) fn press(&mut self, button: ButtonId, at: Instant) -> Decision {
        let Some(profile) = self.active_profile() else {
            return Decision::none();
        };
        if self.pressed.contains_key(&button) {
            debug!("{} is already down, ignoring repeated press", button);
            return Decision::none();
        }

        let mapping = self.layers.resolve(&profile, button).cloned();
        self.pressed
            .insert(button, PressRecord::new(at, mapping.clone()));

        let mut effects = Vec::new();
        if let Some(completed) = self.sequences.process(button, at) {
            for index in completed {
                if let Some(sequence) = profile.sequences.get(index) {
                    effects.push(Effect::execute(
                        sequence.action.clone(),
                        Trigger::Sequence,
                        button,
                    ));
                }
            }
        }

        let chord_participant = profile.is_chord_participant(button);
        if chord_participant {
            effects.extend(self.capture_for_chord(&profile, button, at));
            if self
                .pressed
                .get(&button)
                .is_some_and(|record| record.chord_active)
            {
                return self.decision(effects);
            }
        }

        let Some(mapping) = mapping else {
            debug!("{} is unmapped, inert", button);
            return self.decision(effects);
        };

        let hold_path = mapping.is_modifier_hold()
            || (mapping.action.is_mouse_click() && !chord_participant && mapping.double_tap.is_none());
        if hold_path {
            effects.extend(self.begin_hold(button, &mapping, at));
        } else {
            effects.extend(self.arm_tap(button, &mapping, at));
        }
        self.decision(effects)
    }

    fn capture_for_chord(&mut self, profile: &Profile, button: ButtonId, at: Instant) -> Vec<Effect> {
        let was_open = self.chords.is_open();
        match self.chords.process(ChordInput::Press(button), at) {
            Some(outcome) => {
                if let Some(window) = self.chord_window.take() {
                    window.cancel();
                }
                self.resolve_chord(profile, outcome, at)
            }
            None => {
                if !was_open {
                    if let Some(deadline) = self.chords.deadline() {
                        self.chord_window =
                            Some(self.scheduler.schedule(deadline, Task::ChordWindow));
                    }
                }
                Vec::new()
            }
        }
    }

    fn begin_hold(&mut self, button: ButtonId, mapping: &ButtonMapping, at: Instant) -> Vec<Effect> {
        if let Some(double_tap) = &mapping.double_tap {
            let threshold = double_tap.threshold_or(self.settings.double_tap());
            let within = self
                .last_tap
                .get(&button)
                .is_some_and(|last| at.saturating_duration_since(*last) <= threshold);
            if within {
                self.last_tap.remove(&button);
                self.timers_mut(button).cancel_deferred_tap();
                if let Some(record) = self.pressed.get_mut(&button) {
                    record.double_tap_on_press = true;
                }
                return vec![Effect::execute(
                    double_tap.action.clone(),
                    Trigger::DoubleTap,
                    button,
                )];
            }
        }

        debug!("{} starts a simulated hold", button);
        if let Some(record) = self.pressed.get_mut(&button) {
            record.holding = true;
        }
        self.held.insert(button, mapping.action.clone());
        vec![Effect::HoldBegin(mapping.action.clone())]
    }

    fn arm_tap(&mut self, button: ButtonId, mapping: &ButtonMapping, at: Instant) -> Vec<Effect> {
        if let Some(long_hold) = &mapping.long_hold {
            let deadline = at + long_hold.threshold_or(self.settings.long_hold());
            let handle = self
                .scheduler
                .schedule(deadline, Task::LongHold { button });
            self.timers_mut(button).long_hold = Some(handle);
        }

        if !mapping.repeat_enabled() {
            return Vec::new();
        }
        let interval = mapping
            .repeat
            .as_ref()
            .map(|repeat| repeat.interval_or(self.settings.repeat_interval()))
            .unwrap_or_else(|| self.settings.repeat_interval());
        let handle = self
            .scheduler
            .schedule(at + interval, Task::Repeat { button });
        self.timers_mut(button).repeat = Some(handle);
        if let Some(record) = self.pressed.get_mut(&button) {
            record.repeat_active = true;
        }
        vec![Effect::execute(mapping.action.clone(), Trigger::Tap, button)]
    }
}
