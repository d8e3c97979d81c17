//! Release interaction flow and scheduled-task firing
//!
//! ```text
//! release ─► cancel long-hold ─► layer / overlay / hold / chord cleanup
//!                                   │
//!                                   ▼
//!            repeat ─► long-hold ─► double-tap ─► single tap (or parked)
//! ```

use super::scheduler::Task;
use super::state::{Decision, Effect, EngineState};
use crate::action::Trigger;
use crate::controller::ButtonId;
use crate::gesture::{ChordInput, ChordOutcome, GestureDetector};
use crate::mapping::{ExecutableAction, Profile, TimedAction};
use std::time::{Duration, Instant};
use tracing::debug;

impl EngineState {
    pub(crate) fn release(&mut self, button: ButtonId, at: Instant, held: Option<Duration>) -> Decision {
        if let Some(timers) = self.timers.get_mut(&button) {
            timers.cancel_long_hold();
        }
        let Some(profile) = self.active_profile() else {
            return Decision::none();
        };
        let Some(record) = self.pressed.remove(&button) else {
            debug!("{} released without a recorded press", button);
            return Decision::none();
        };

        if let Some(layer) = &record.layer {
            self.layers.deactivate(layer);
            return Decision::none();
        }
        if record.intercepted {
            return self.decision(vec![Effect::OverlayUp(button)]);
        }
        if record.holding {
            self.last_tap.insert(button, at);
            let effects = self
                .held
                .remove(&button)
                .map(Effect::HoldEnd)
                .into_iter()
                .collect();
            return self.decision(effects);
        }
        if record.chord_active || record.double_tap_on_press {
            self.timers_mut(button).cancel_repeat();
            return Decision::none();
        }

        let Some(mapping) = record.mapping else {
            return Decision::none();
        };

        if record.repeat_active {
            self.timers_mut(button).cancel_repeat();
            // Primary already fired on press: double-tap still counts, the single-tap fallback does not
            let effects = match &mapping.double_tap {
                Some(double_tap) => self.evaluate_double_tap(button, double_tap, None, at),
                None => Vec::new(),
            };
            return self.decision(effects);
        }
        if record.long_hold_fired || mapping.is_modifier_hold() {
            return Decision::none();
        }

        let duration = held.unwrap_or_else(|| at.saturating_duration_since(record.pressed_at));
        if let Some(long_hold) = &mapping.long_hold {
            if duration >= long_hold.threshold_or(self.settings.long_hold()) {
                return self.decision(vec![Effect::execute(
                    long_hold.action.clone(),
                    Trigger::LongHold,
                    button,
                )]);
            }
        }

        let effects = match &mapping.double_tap {
            Some(double_tap) => {
                self.evaluate_double_tap(button, double_tap, Some(mapping.action.clone()), at)
            }
            None => self.single_tap(&profile, button, mapping.action.clone()),
        };
        self.decision(effects)
    }

    /// Double-tap window, measured release to release.
    ///
    /// `single` is scheduled as the deferred fallback when this is the
    /// first tap; `None` suppresses the fallback.
    fn evaluate_double_tap(
        &mut self,
        button: ButtonId,
        double_tap: &TimedAction,
        single: Option<ExecutableAction>,
        at: Instant,
    ) -> Vec<Effect> {
        let threshold = double_tap.threshold_or(self.settings.double_tap());
        let second_tap = self
            .last_tap
            .get(&button)
            .is_some_and(|last| at.saturating_duration_since(*last) <= threshold);

        if second_tap {
            self.last_tap.remove(&button);
            self.timers_mut(button).cancel_deferred_tap();
            return vec![Effect::execute(
                double_tap.action.clone(),
                Trigger::DoubleTap,
                button,
            )];
        }

        self.last_tap.insert(button, at);
        if let Some(action) = single {
            let handle = self
                .scheduler
                .schedule(at + threshold, Task::DeferredTap { button });
            let timers = self.timers_mut(button);
            timers.cancel_deferred_tap();
            timers.deferred_tap = Some((handle, action));
        }
        Vec::new()
    }

    fn single_tap(&mut self, profile: &Profile, button: ButtonId, action: ExecutableAction) -> Vec<Effect> {
        if profile.is_chord_participant(button) && self.chords.is_captured(button) {
            debug!("{} parked until the chord window closes", button);
            self.parked_taps.insert(button, action);
            return Vec::new();
        }
        vec![Effect::execute(action, Trigger::Tap, button)]
    }

    /// Fires every task due at `now`, in deadline order
    pub(crate) fn run_due(&mut self, now: Instant) -> Decision {
        let mut effects = Vec::new();
        while let Some((deadline, task)) = self.scheduler.pop_due(now) {
            effects.extend(self.fire(task, deadline, now));
        }
        self.decision(effects)
    }

    fn fire(&mut self, task: Task, deadline: Instant, now: Instant) -> Vec<Effect> {
        let profile = self.active_profile();
        match task {
            Task::ModifierRelease { modifiers } => vec![Effect::ReleaseModifiers(modifiers)],
            _ if profile.is_none() => Vec::new(),
            Task::LongHold { button } => {
                self.timers_mut(button).long_hold = None;
                let Some(record) = self.pressed.get_mut(&button) else {
                    return Vec::new();
                };
                let Some(long_hold) = record.mapping.as_ref().and_then(|m| m.long_hold.clone()) else {
                    return Vec::new();
                };
                record.long_hold_fired = true;
                debug!("{} held past its long-hold threshold", button);
                vec![Effect::execute(long_hold.action, Trigger::LongHold, button)]
            }
            Task::Repeat { button } => {
                let repeat = self
                    .pressed
                    .get(&button)
                    .filter(|record| record.repeat_active)
                    .and_then(|record| record.mapping.as_ref())
                    .map(|mapping| {
                        let interval = mapping
                            .repeat
                            .as_ref()
                            .map(|repeat| repeat.interval_or(self.settings.repeat_interval()))
                            .unwrap_or_else(|| self.settings.repeat_interval());
                        (mapping.action.clone(), interval)
                    });
                let Some((action, interval)) = repeat else {
                    self.timers_mut(button).repeat = None;
                    return Vec::new();
                };
                let mut next = deadline + interval;
                if next <= now {
                    next = now + interval;
                }
                let handle = self.scheduler.schedule(next, Task::Repeat { button });
                self.timers_mut(button).repeat = Some(handle);
                vec![Effect::execute(action, Trigger::Repeat, button)]
            }
            Task::DeferredTap { button } => {
                let Some((_, action)) = self.timers_mut(button).deferred_tap.take() else {
                    return Vec::new();
                };
                self.last_tap.remove(&button);
                vec![Effect::execute(action, Trigger::Tap, button)]
            }
            Task::ChordWindow => {
                self.chord_window = None;
                let Some(profile) = profile else {
                    return Vec::new();
                };
                match self.chords.process(ChordInput::Expire, deadline) {
                    Some(outcome) => self.resolve_chord(&profile, outcome, deadline),
                    None => Vec::new(),
                }
            }
        }
    }

    /// Applies a chord outcome: a match suppresses every member's own
    /// action, a miss flushes parked taps in button order
    pub(crate) fn resolve_chord(&mut self, profile: &Profile, outcome: ChordOutcome, at: Instant) -> Vec<Effect> {
        match outcome {
            ChordOutcome::Matched { chord, buttons } => {
                let Some(mapping) = profile.chords.get(chord) else {
                    return Vec::new();
                };
                let mut effects = Vec::new();
                for button in &buttons {
                    self.timers_mut(*button).cancel_all();
                    self.parked_taps.remove(button);
                    self.last_tap.remove(button);
                    if let Some(record) = self.pressed.get_mut(button) {
                        record.chord_active = true;
                        record.repeat_active = false;
                        if record.holding {
                            record.holding = false;
                            if let Some(action) = self.held.remove(button) {
                                effects.push(Effect::HoldEnd(action));
                            }
                        }
                    }
                }
                debug!("Chord {:?} formed at {:?}", buttons, at);
                effects.push(Effect::Execute {
                    action: mapping.action.clone(),
                    trigger: Trigger::Chord,
                    button: buttons.iter().next().copied(),
                });
                effects
            }
            ChordOutcome::NoMatch(buttons) => {
                debug!("No chord for {:?}, resolving individually", buttons);
                buttons
                    .into_iter()
                    .filter_map(|button| {
                        self.parked_taps
                            .remove(&button)
                            .map(|action| Effect::execute(action, Trigger::Tap, button))
                    })
                    .collect()
            }
        }
    }
}
