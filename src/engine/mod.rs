//! The input-mapping engine
//!
//! Turns normalized [`InputEvent`]s into output calls under the temporal
//! semantics of the active [`Profile`].
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────── Mutex<EngineState> ────────────┐
//! discrete ──►   │ layers ─► sequences ─► chord window ─► hold │ ──► Effects ─┐
//!  queue         │ / tap ─► scheduler (long-hold, repeat, ...) │              │
//!                └─────────────────────────────────────────────┘              ▼
//!                ┌──────────── Mutex<AnalogState> ─────────────┐      Mutex<OutputGate>
//! analog  ──►    │ joysticks ─ touchpad ─ motion gestures      │ ──►  ActionExecutor ──► OutputSink
//!  queue         └─────────────────────────────────────────────┘              │
//!                                                                  FeedbackListeners, overlay
//! ```
//!
//! Every input takes its state lock exactly once and returns effects.
//! Effects are applied under the output gate, which a reset also holds while
//! it releases everything; a decision made in an epoch that has since been
//! reset is discarded whole. Listeners and the overlay are called after the
//! gate is released, so an overlay may call back into the engine.
//!
//! Locks are always taken in the order state, analog, gate. Nothing that
//! holds the gate takes either state lock.
//!
//! 1. [`clock`] - system and manual time sources
//! 2. [`scheduler`] - cancellable deferred tasks
//! 3. [`layers`] - momentary layer stack
//! 4. `orchestration` - what a press means
//! 5. `flow` - what a release means, plus task firing
//! 6. [`runtime`] - tokio queues and lifecycle

pub mod clock;
mod flow;
pub mod layers;
mod orchestration;
pub mod runtime;
pub mod scheduler;
pub(crate) mod state;

use crate::action::{ActionExecutor, FollowUp, Trigger};
use crate::analog::AnalogOutput;
use crate::config::EngineSettings;
use crate::controller::{ButtonId, InputEvent};
use crate::gesture::GestureDetector;
use crate::mapping::{combine_modifiers, ExecutableAction, MappingError, ModifierKey, OutputKey, Profile};
use crate::output::{FeedbackEvent, FeedbackListener, OverlayConsumer};
use state::{AnalogState, Decision, Effect, EngineState, Origin};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info};

pub use clock::{Clock, ManualClock, SystemClock};
pub use layers::LayerStack;
pub use runtime::{EngineHandle, EngineRuntime, RuntimeError};
pub use scheduler::{Scheduler, Task, TaskHandle};

/// Epochs of the last reset that reached the output
#[derive(Debug, Default)]
struct OutputGate {
    discrete: u64,
    analog: u64,
}

impl OutputGate {
    fn admits(&self, origin: Origin) -> bool {
        match origin {
            Origin::Control => true,
            Origin::Discrete(epoch) => epoch == self.discrete,
            Origin::Analog(epoch) => epoch == self.analog,
        }
    }
}

/// A modifier tap waiting for its release to be scheduled
#[derive(Debug)]
struct PendingRelease {
    epoch: u64,
    at: Instant,
    modifiers: Vec<ModifierKey>,
}

/// Callbacks collected under the gate, run once it is released
#[derive(Default)]
struct Deferred {
    feedback: Vec<FeedbackEvent>,
    overlay: Vec<(ButtonId, bool)>,
    releases: Vec<PendingRelease>,
}

pub struct Engine {
    state: Mutex<EngineState>,
    analog: Mutex<AnalogState>,
    gate: Mutex<OutputGate>,
    /// Filled without the state lock, drained by the next discrete decision
    pending_releases: Mutex<Vec<PendingRelease>>,
    executor: ActionExecutor,
    listeners: Vec<Arc<dyn FeedbackListener>>,
    overlay: Option<Arc<dyn OverlayConsumer>>,
    clock: Arc<dyn Clock>,
    schedule_changed: Notify,
}

impl Engine {
    /// Creates an enabled engine without a profile; input is inert until
    /// [`Engine::switch_profile`] is called
    pub fn new(executor: ActionExecutor, settings: EngineSettings) -> Self {
        Self {
            state: Mutex::new(EngineState::new(settings)),
            analog: Mutex::new(AnalogState::new()),
            gate: Mutex::new(OutputGate::default()),
            pending_releases: Mutex::new(Vec::new()),
            executor,
            listeners: Vec::new(),
            overlay: None,
            clock: Arc::new(SystemClock),
            schedule_changed: Notify::new(),
        }
    }

    pub fn with_feedback_listener(mut self, listener: Arc<dyn FeedbackListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn OverlayConsumer>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Replaces the time source used by control changes and the runtime loops
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn analog_state(&self) -> MutexGuard<'_, AnalogState> {
        self.analog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self) -> MutexGuard<'_, OutputGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_releases(&self) -> MutexGuard<'_, Vec<PendingRelease>> {
        self.pending_releases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Wakes the discrete queue when work was scheduled from outside it
    pub fn schedule_changed(&self) -> &Notify {
        &self.schedule_changed
    }

    pub fn handle_input(&self, event: InputEvent) {
        match event {
            InputEvent::ButtonDown { button, at } => self.press(button, at),
            InputEvent::ButtonUp { button, at, held } => self.release(button, at, held),
            analog => self.handle_analog(analog),
        }
    }

    pub fn press(&self, button: ButtonId, at: Instant) {
        let claimed = self
            .overlay
            .as_ref()
            .is_some_and(|overlay| overlay.claims(button));
        let decision = {
            let mut state = self.state();
            self.absorb_releases(&mut state);
            let mut effects = state.run_due(at).effects;
            effects.extend(state.press_input(button, at, claimed).effects);
            state.decision(effects)
        };
        self.commit(decision, at);
        self.schedule_changed.notify_one();
    }

    pub fn release(&self, button: ButtonId, at: Instant, held: Option<Duration>) {
        let decision = {
            let mut state = self.state();
            self.absorb_releases(&mut state);
            let mut effects = state.run_due(at).effects;
            effects.extend(state.release(button, at, held).effects);
            state.decision(effects)
        };
        self.commit(decision, at);
        self.schedule_changed.notify_one();
    }

    /// Fires every scheduled task that is due at `now`
    pub fn run_due(&self, now: Instant) {
        let decision = {
            let mut state = self.state();
            self.absorb_releases(&mut state);
            state.run_due(now)
        };
        self.commit(decision, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let mut state = self.state();
        self.absorb_releases(&mut state);
        state.scheduler.next_deadline()
    }

    /// Moves modifier taps executed since the last decision onto the scheduler
    fn absorb_releases(&self, state: &mut EngineState) {
        let pending = std::mem::take(&mut *self.pending_releases());
        for release in pending {
            state.schedule_modifier_release(release.epoch, release.at, release.modifiers);
        }
    }

    /// Folds a stick, touchpad or motion sample into the analog processors
    pub fn handle_analog(&self, event: InputEvent) {
        let at = event.timestamp();
        let decision = {
            let mut analog = self.analog_state();
            let Some(profile) = analog.active_profile() else {
                return;
            };
            let effects = match event {
                InputEvent::Stick { stick, x, y, .. } => {
                    analog.joysticks.set_stick(stick, x, y);
                    Vec::new()
                }
                InputEvent::TouchpadMove { dx, dy, at } => analog
                    .touchpad
                    .on_move(dx, dy, at)
                    .into_iter()
                    .map(Effect::Analog)
                    .collect(),
                InputEvent::TouchpadGesture { sample, at } => analog
                    .touchpad
                    .on_gesture(sample, at)
                    .into_iter()
                    .map(Effect::Analog)
                    .collect(),
                InputEvent::Motion { axis, velocity, at } => analog
                    .motion
                    .process((axis, velocity), at)
                    .and_then(|(axis, direction)| {
                        debug!("Motion gesture {:?} {:?}", axis, direction);
                        profile.motion_action(axis, direction).cloned()
                    })
                    .map(|action| Effect::Execute {
                        action,
                        trigger: Trigger::Motion,
                        button: None,
                    })
                    .into_iter()
                    .collect(),
                InputEvent::ButtonDown { .. } | InputEvent::ButtonUp { .. } => Vec::new(),
            };
            analog.decision(effects, profile)
        };
        self.commit(decision, at);
    }

    /// One analog tick: stick output and touchpad momentum
    pub fn poll_analog(&self, now: Instant) {
        let held_modifiers = self.executor.held_modifiers();
        let decision = {
            let mut analog = self.analog_state();
            let Some(profile) = analog.active_profile() else {
                return;
            };
            let mut outputs = analog.joysticks.tick(now, &held_modifiers);
            outputs.extend(analog.touchpad.tick(now));
            analog.decision(outputs.into_iter().map(Effect::Analog).collect(), profile)
        };
        self.commit(decision, now);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.reset_with(
            |state| {
                if state.enabled == enabled {
                    return false;
                }
                info!("Engine {}", if enabled { "enabled" } else { "disabled" });
                state.enabled = enabled;
                true
            },
            None,
        );
    }

    pub fn set_locked(&self, locked: bool) {
        self.reset_with(
            |state| {
                if state.locked == locked {
                    return false;
                }
                info!("Engine {}", if locked { "locked" } else { "unlocked" });
                state.locked = locked;
                true
            },
            None,
        );
    }

    /// Validates and activates `profile`, releasing everything the previous one held
    pub fn switch_profile(&self, profile: Profile) -> Result<(), MappingError> {
        profile.validate()?;
        let profile = Arc::new(profile);
        info!("Switching to profile '{}'", profile.name);
        self.reset_with(|_| true, Some(profile));
        Ok(())
    }

    /// Resets both sides and applies the releases before any later decision
    /// can reach the output.
    ///
    /// `change` runs first under the state lock; returning `false` leaves
    /// everything untouched.
    fn reset_with(
        &self,
        change: impl FnOnce(&mut EngineState) -> bool,
        install: Option<Arc<Profile>>,
    ) {
        let now = self.clock.now();
        let mut state = self.state();
        if !change(&mut *state) {
            return;
        }
        let mut analog = self.analog_state();

        let mut effects = state.reset();
        effects.extend(analog.reset());
        if let Some(profile) = install {
            state.install_profile(profile.clone());
            analog.install_profile(profile);
        }
        analog.active = state.enabled && !state.locked;
        self.pending_releases().clear();

        let mut gate = self.gate();
        gate.discrete = state.epoch;
        gate.analog = analog.epoch;
        let decision = Decision {
            effects,
            profile: state.profile.clone(),
            origin: Origin::Control,
        };
        drop(analog);
        drop(state);

        let deferred = self.apply(&gate, decision, now);
        drop(gate);
        self.deliver(deferred);
        self.schedule_changed.notify_one();
    }

    pub fn active_profile(&self) -> Option<Arc<Profile>> {
        self.state().profile.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    pub fn active_layer(&self) -> Option<String> {
        self.state().layers.top().map(str::to_string)
    }

    /// Number of scheduled tasks that have not fired or been cancelled
    pub fn pending_tasks(&self) -> usize {
        let mut state = self.state();
        self.absorb_releases(&mut state);
        state.scheduler.live_tasks()
    }

    /// Applies a decision made without any lock held
    fn commit(&self, decision: Decision, at: Instant) {
        let deferred = {
            let gate = self.gate();
            self.apply(&gate, decision, at)
        };
        self.deliver(deferred);
    }

    fn apply(&self, gate: &OutputGate, decision: Decision, at: Instant) -> Deferred {
        let Decision {
            effects,
            profile,
            origin,
        } = decision;
        let mut deferred = Deferred::default();
        if !gate.admits(origin) {
            if !effects.is_empty() {
                debug!(
                    "Discarding {} effect(s) decided before the last reset",
                    effects.len()
                );
            }
            return deferred;
        }

        for effect in effects {
            match effect {
                Effect::Execute {
                    action,
                    trigger,
                    button,
                } => {
                    if let Some(profile) = &profile {
                        let epoch = gate.discrete;
                        self.execute(&action, trigger, button, profile, at, epoch, &mut deferred);
                    }
                }
                Effect::HoldBegin(action) => {
                    debug!("Hold begins: {}", action.binding());
                    self.executor.begin_hold(&action);
                }
                Effect::HoldEnd(action) => {
                    debug!("Hold ends: {}", action.binding());
                    self.executor.end_hold(&action);
                }
                Effect::OverlayDown(button) => deferred.overlay.push((button, true)),
                Effect::OverlayUp(button) => deferred.overlay.push((button, false)),
                Effect::ReleaseModifiers(modifiers) => self.executor.release_modifiers(&modifiers),
                Effect::ReleaseAllModifiers => self.executor.release_all_modifiers(),
                Effect::Analog(output) => self.apply_analog(output),
            }
        }
        deferred
    }

    fn execute(
        &self,
        action: &ExecutableAction,
        trigger: Trigger,
        button: Option<ButtonId>,
        profile: &Profile,
        at: Instant,
        epoch: u64,
        deferred: &mut Deferred,
    ) {
        let execution = self.executor.execute(action, profile);
        let source = button.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string());
        info!(
            "{:?} [{}] {} => {}",
            trigger,
            source,
            execution.kind,
            execution.feedback.as_deref().unwrap_or("(no feedback)")
        );

        if let Some(text) = execution.feedback {
            deferred
                .feedback
                .push(FeedbackEvent::new(text, trigger, button));
        }

        if let Some(FollowUp::ReleaseModifiers(modifiers)) = execution.follow_up {
            deferred.releases.push(PendingRelease {
                epoch,
                at,
                modifiers,
            });
        }
    }

    /// Runs what [`Engine::apply`] collected, with no engine lock held
    fn deliver(&self, deferred: Deferred) {
        let Deferred {
            feedback,
            overlay,
            releases,
        } = deferred;

        if let Some(consumer) = &self.overlay {
            for (button, down) in overlay {
                if down {
                    consumer.button_down(button);
                } else {
                    consumer.button_up(button);
                }
            }
        }

        for event in &feedback {
            for listener in &self.listeners {
                listener.on_feedback(event);
            }
        }

        if !releases.is_empty() {
            self.pending_releases().extend(releases);
            self.schedule_changed.notify_one();
        }
    }

    fn apply_analog(&self, output: AnalogOutput) {
        let sink = self.executor.sink();
        match output {
            AnalogOutput::MovePointer { dx, dy } => sink.move_pointer(dx, dy),
            AnalogOutput::Scroll {
                dx,
                dy,
                phase,
                momentum,
            } => sink.scroll(dx, dy, phase, momentum),
            AnalogOutput::Magnify { amount, phase } => sink.magnify(amount, phase),
            AnalogOutput::KeyDown(key) => self.executor.key_down(OutputKey::Keyboard(key)),
            AnalogOutput::KeyUp(key) => self.executor.key_up(OutputKey::Keyboard(key)),
            AnalogOutput::KeyTap(binding) => {
                if let Some(key) = binding.key {
                    sink.tap(key, combine_modifiers(&binding.modifiers));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MotionAxis;
    use crate::mapping::{ButtonMapping, ChordMapping, GestureDirection, MotionBinding, TimedAction};
    use crate::output::{OutputCommand, RecordingFeedback, RecordingSink};
    use egui::{Key, PointerButton};
    use std::sync::mpsc;
    use std::thread;

    fn engine_with(profile: Profile) -> (Engine, Arc<RecordingSink>, Arc<RecordingFeedback>) {
        let sink = Arc::new(RecordingSink::new());
        let feedback = Arc::new(RecordingFeedback::new());
        let engine = Engine::new(ActionExecutor::new(sink.clone()), EngineSettings::default())
            .with_feedback_listener(feedback.clone());
        engine.switch_profile(profile).unwrap();
        sink.clear();
        (engine, sink, feedback)
    }

    fn key(key: Key) -> OutputKey {
        OutputKey::Keyboard(key)
    }

    #[test]
    fn no_profile_means_inert() {
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(ActionExecutor::new(sink.clone()), EngineSettings::default());
        let t0 = Instant::now();
        engine.press(ButtonId::A, t0);
        engine.release(ButtonId::A, t0 + Duration::from_millis(30), None);
        assert!(sink.commands().is_empty());
        assert!(engine.active_profile().is_none());
    }

    #[test]
    fn plain_tap_fires_on_release() {
        let mut profile = Profile::empty("tap");
        profile.bind(ButtonId::A, ButtonMapping::new(ExecutableAction::key(Key::A)));
        let (engine, sink, feedback) = engine_with(profile);
        let t0 = Instant::now();

        engine.press(ButtonId::A, t0);
        assert!(sink.key_downs().is_empty());
        engine.release(ButtonId::A, t0 + Duration::from_millis(40), None);
        assert_eq!(sink.key_downs(), vec![key(Key::A)]);
        assert_eq!(sink.key_ups(), vec![key(Key::A)]);
        assert_eq!(feedback.texts(), vec!["A".to_string()]);
    }

    #[test]
    fn invalid_profile_is_rejected_and_previous_kept() {
        let (engine, _, _) = engine_with(Profile::empty("good"));
        let mut bad = Profile::empty("bad");
        bad.chords
            .push(ChordMapping::new(&[ButtonId::A], ExecutableAction::key(Key::C)));
        assert_eq!(engine.switch_profile(bad), Err(MappingError::ChordTooSmall(1)));
        assert_eq!(engine.active_profile().unwrap().name, "good");
    }

    #[test]
    fn modifier_tap_is_released_after_the_delay() {
        let mut profile = Profile::empty("tap");
        profile.bind(
            ButtonId::B,
            ButtonMapping::new(ExecutableAction::modifiers_only(&[ModifierKey::Command])),
        );
        let (engine, sink, _) = engine_with(profile);
        let t0 = Instant::now();

        engine.press(ButtonId::B, t0);
        engine.release(ButtonId::B, t0 + Duration::from_millis(20), None);
        assert_eq!(sink.held_modifiers(), vec![ModifierKey::Command]);

        engine.run_due(t0 + Duration::from_millis(60));
        assert_eq!(sink.held_modifiers(), vec![ModifierKey::Command]);
        engine.run_due(t0 + Duration::from_millis(70));
        assert!(sink.held_modifiers().is_empty());
        assert_eq!(
            sink.commands(),
            vec![
                OutputCommand::HoldModifier(ModifierKey::Command),
                OutputCommand::ReleaseModifier(ModifierKey::Command),
            ]
        );
    }

    #[test]
    fn long_hold_task_is_cancelled_by_release() {
        let mut profile = Profile::empty("hold");
        profile.bind(
            ButtonId::Y,
            ButtonMapping::new(ExecutableAction::key(Key::Escape))
                .with_long_hold(TimedAction::new(ExecutableAction::key(Key::Q))),
        );
        let (engine, sink, _) = engine_with(profile);
        let t0 = Instant::now();

        engine.press(ButtonId::Y, t0);
        assert_eq!(engine.pending_tasks(), 1);
        engine.release(ButtonId::Y, t0 + Duration::from_millis(100), None);
        assert_eq!(engine.pending_tasks(), 0);
        engine.run_due(t0 + Duration::from_secs(2));
        assert_eq!(sink.key_downs(), vec![key(Key::Escape)]);
    }

    #[test]
    fn hold_decided_before_a_reset_never_reaches_the_output() {
        let mut profile = Profile::empty("hold");
        profile.bind(
            ButtonId::A,
            ButtonMapping::new(ExecutableAction::mouse(PointerButton::Primary)),
        );
        let (engine, sink, _) = engine_with(profile);
        let t0 = engine.now();

        let stale = engine.state().press(ButtonId::A, t0);
        assert!(stale.effects.iter().any(|e| matches!(e, Effect::HoldBegin(_))));
        engine.set_enabled(false);
        engine.commit(stale, t0);
        engine.set_enabled(true);
        engine.release(ButtonId::A, t0 + Duration::from_millis(40), None);

        assert!(sink.key_downs().is_empty());
        assert!(sink.stuck_keys().is_empty());
    }

    #[test]
    fn analog_key_down_decided_before_a_lock_is_discarded() {
        let (engine, sink, _) = engine_with(Profile::empty("sticks"));
        let profile = engine.active_profile().unwrap();

        let stale = engine
            .analog_state()
            .decision(vec![Effect::Analog(AnalogOutput::KeyDown(Key::W))], profile);
        engine.set_locked(true);
        engine.commit(stale, engine.now());

        assert!(sink.key_downs().is_empty());
        assert!(sink.stuck_keys().is_empty());
    }

    #[test]
    fn motion_modifier_tap_does_not_wait_for_button_resolution() {
        let mut profile = Profile::empty("motion");
        profile.motion_gestures.push(MotionBinding {
            axis: MotionAxis::Roll,
            direction: GestureDirection::Positive,
            action: ExecutableAction::modifiers_only(&[ModifierKey::Command]),
        });
        let (engine, sink, _) = engine_with(profile);
        let t0 = engine.now();

        let busy = engine.state();
        let (done_tx, done_rx) = mpsc::channel();
        thread::scope(|scope| {
            scope.spawn(|| {
                for (i, f) in [0.2, 0.6, 1.0, 0.8, 0.5, 0.2, 0.05, 0.0].iter().enumerate() {
                    engine.handle_analog(InputEvent::Motion {
                        axis: MotionAxis::Roll,
                        velocity: f * 4.0,
                        at: t0 + Duration::from_millis(10 * i as u64),
                    });
                }
                done_tx.send(()).unwrap();
            });
            let finished = done_rx.recv_timeout(Duration::from_secs(2)).is_ok();
            drop(busy);
            assert!(finished, "analog samples blocked on the discrete state");
        });

        assert_eq!(sink.held_modifiers(), vec![ModifierKey::Command]);
        engine.run_due(t0 + Duration::from_millis(200));
        assert!(sink.held_modifiers().is_empty());
    }

    #[test]
    fn modifier_tap_from_before_a_reset_is_not_released_twice() {
        let mut profile = Profile::empty("tap");
        profile.bind(
            ButtonId::B,
            ButtonMapping::new(ExecutableAction::modifiers_only(&[ModifierKey::Shift])),
        );
        profile.bind(
            ButtonId::LeftBumper,
            ButtonMapping::modifier_hold(&[ModifierKey::Shift]),
        );
        let (engine, sink, _) = engine_with(profile);
        let t0 = engine.now();

        engine.press(ButtonId::B, t0);
        engine.release(ButtonId::B, t0 + Duration::from_millis(20), None);
        // The tap's release lands only after the engine was reset twice
        let late: Vec<PendingRelease> = engine.pending_releases().drain(..).collect();
        assert_eq!(late.len(), 1);
        engine.set_enabled(false);
        engine.set_enabled(true);
        engine.pending_releases().extend(late);
        engine.press(ButtonId::LeftBumper, t0 + Duration::from_millis(30));
        engine.run_due(t0 + Duration::from_millis(200));

        assert_eq!(sink.held_modifiers(), vec![ModifierKey::Shift]);
    }

    #[test]
    fn engine_reads_time_from_its_clock() {
        let clock = Arc::new(ManualClock::new());
        let engine = Engine::new(
            ActionExecutor::new(Arc::new(RecordingSink::new())),
            EngineSettings::default(),
        )
        .with_clock(clock.clone());

        let later = clock.advance(Duration::from_secs(5));
        assert_eq!(engine.now(), later);
        assert_eq!(engine.clock().now(), later);
    }
}
