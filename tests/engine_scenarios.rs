use egui::{Key, PointerButton};
use padmapper::action::{ActionExecutor, Trigger, SCRIPT_ERROR_FEEDBACK};
use padmapper::config::EngineSettings;
use padmapper::controller::{ButtonId, InputEvent, MotionAxis, StickId, TwoFingerSample};
use padmapper::engine::{Clock, Engine, ManualClock};
use padmapper::mapping::{
    ButtonBinding, ButtonMapping, ChordMapping, ExecutableAction, GestureDirection, Layer,
    MacroDefinition, MacroStep, ModifierKey, MotionBinding, OutputKey, Profile, RepeatMapping,
    ScriptDefinition, SequenceMapping, TimedAction,
};
use padmapper::output::{
    FeedbackEvent, FeedbackListener, OutputCommand, OverlayConsumer, RecordingFeedback,
    RecordingSink, ScriptEngine, ScriptError,
};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct Harness {
    engine: Engine,
    sink: Arc<RecordingSink>,
    feedback: Arc<RecordingFeedback>,
    clock: Arc<ManualClock>,
    t0: Instant,
}

impl Harness {
    fn new(profile: Profile) -> Self {
        Self::with_executor(profile, |executor| executor)
    }

    fn with_executor(profile: Profile, configure: impl FnOnce(ActionExecutor) -> ActionExecutor) -> Self {
        let sink = Arc::new(RecordingSink::new());
        let feedback = Arc::new(RecordingFeedback::new());
        let clock = Arc::new(ManualClock::new());
        let engine = Engine::new(
            configure(ActionExecutor::new(sink.clone())),
            EngineSettings::default(),
        )
        .with_feedback_listener(feedback.clone())
        .with_clock(clock.clone());
        engine.switch_profile(profile).unwrap();
        sink.clear();
        let t0 = clock.now();
        Self {
            engine,
            sink,
            feedback,
            clock,
            t0,
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    fn press(&self, button: ButtonId, ms: u64) {
        self.engine.press(button, self.at(ms));
    }

    fn release(&self, button: ButtonId, ms: u64) {
        self.engine.release(button, self.at(ms), None);
    }

    fn tap(&self, button: ButtonId, down_ms: u64, up_ms: u64) {
        self.press(button, down_ms);
        self.release(button, up_ms);
    }

    fn advance_to(&self, ms: u64) {
        self.clock.set(self.at(ms));
        self.engine.run_due(self.engine.now());
    }

    fn keys(&self) -> Vec<OutputKey> {
        self.sink.key_downs()
    }

    fn triggers(&self) -> Vec<Trigger> {
        self.feedback.events().into_iter().map(|e| e.trigger).collect()
    }
}

fn key(key: Key) -> OutputKey {
    OutputKey::Keyboard(key)
}

fn bound(bindings: Vec<(ButtonId, ButtonMapping)>) -> Profile {
    let mut profile = Profile::empty("test");
    for (button, mapping) in bindings {
        profile.bind(button, mapping);
    }
    profile
}

fn tap_to(k: Key) -> ButtonMapping {
    ButtonMapping::new(ExecutableAction::key(k))
}

#[test]
fn quick_press_release_emits_one_key_tap() {
    let h = Harness::new(bound(vec![(ButtonId::A, tap_to(Key::A))]));

    h.tap(ButtonId::A, 0, 50);

    assert_eq!(h.keys(), vec![key(Key::A)]);
    assert_eq!(h.sink.key_ups(), vec![key(Key::A)]);
    assert_eq!(h.triggers(), vec![Trigger::Tap]);
}

#[test]
fn chord_fires_once_and_suppresses_members() {
    let mut profile = bound(vec![(ButtonId::A, tap_to(Key::A)), (ButtonId::B, tap_to(Key::B))]);
    profile.chords.push(ChordMapping::new(
        &[ButtonId::A, ButtonId::B],
        ExecutableAction::key_with(Key::C, &[ModifierKey::Command]).with_hint("Copy"),
    ));
    let h = Harness::new(profile);

    h.press(ButtonId::A, 0);
    h.press(ButtonId::B, 20);
    h.release(ButtonId::A, 80);
    h.release(ButtonId::B, 90);
    h.advance_to(1_000);

    assert_eq!(h.keys(), vec![key(Key::C)]);
    assert_eq!(h.feedback.texts(), vec!["Copy".to_string()]);
    assert_eq!(h.triggers(), vec![Trigger::Chord]);
}

#[test]
fn chord_window_miss_resolves_buttons_in_ascending_order() {
    let mut profile = bound(vec![(ButtonId::A, tap_to(Key::A)), (ButtonId::Y, tap_to(Key::Y))]);
    profile.chords.push(ChordMapping::new(
        &[ButtonId::A, ButtonId::B],
        ExecutableAction::key(Key::C),
    ));
    profile.chords.push(ChordMapping::new(
        &[ButtonId::X, ButtonId::Y],
        ExecutableAction::key(Key::V),
    ));
    let h = Harness::new(profile);

    h.press(ButtonId::Y, 0);
    h.press(ButtonId::A, 10);
    h.release(ButtonId::Y, 30);
    h.release(ButtonId::A, 40);
    assert!(h.keys().is_empty(), "taps wait for the chord window");

    h.advance_to(150);
    assert_eq!(h.keys(), vec![key(Key::A), key(Key::Y)]);
}

#[test]
fn chord_participant_released_after_window_taps_immediately() {
    let mut profile = bound(vec![(ButtonId::A, tap_to(Key::A))]);
    profile.chords.push(ChordMapping::new(
        &[ButtonId::A, ButtonId::B],
        ExecutableAction::key(Key::C),
    ));
    let h = Harness::new(profile);

    h.press(ButtonId::A, 0);
    h.release(ButtonId::A, 200);

    assert_eq!(h.keys(), vec![key(Key::A)]);
}

#[test]
fn double_tap_inside_window_fires_only_the_double_tap() {
    let h = Harness::new(bound(vec![(
        ButtonId::A,
        tap_to(Key::A).with_double_tap(TimedAction::with_threshold(
            ExecutableAction::key(Key::D),
            Duration::from_millis(300),
        )),
    )]));

    h.tap(ButtonId::A, 0, 40);
    h.tap(ButtonId::A, 120, 200);
    h.advance_to(2_000);

    assert_eq!(h.keys(), vec![key(Key::D)]);
    assert_eq!(h.triggers(), vec![Trigger::DoubleTap]);
}

#[test]
fn single_tap_fires_after_double_tap_window_elapses() {
    let h = Harness::new(bound(vec![(
        ButtonId::A,
        tap_to(Key::A).with_double_tap(TimedAction::with_threshold(
            ExecutableAction::key(Key::D),
            Duration::from_millis(300),
        )),
    )]));

    h.tap(ButtonId::A, 0, 40);
    h.advance_to(339);
    assert!(h.keys().is_empty());

    h.advance_to(340);
    assert_eq!(h.keys(), vec![key(Key::A)]);

    h.tap(ButtonId::A, 800, 840);
    h.advance_to(1_200);
    assert_eq!(h.keys(), vec![key(Key::A), key(Key::A)]);
}

#[test]
fn long_hold_fires_at_threshold_and_release_adds_nothing() {
    let h = Harness::new(bound(vec![(
        ButtonId::A,
        tap_to(Key::A).with_long_hold(TimedAction::with_threshold(
            ExecutableAction::key(Key::L),
            Duration::from_millis(500),
        )),
    )]));

    h.press(ButtonId::A, 0);
    h.advance_to(499);
    assert!(h.keys().is_empty());
    h.advance_to(500);
    assert_eq!(h.keys(), vec![key(Key::L)]);

    h.release(ButtonId::A, 600);
    h.advance_to(2_000);
    assert_eq!(h.keys(), vec![key(Key::L)]);
    assert_eq!(h.triggers(), vec![Trigger::LongHold]);
}

#[test]
fn reported_hold_duration_counts_as_long_hold() {
    let h = Harness::new(bound(vec![(
        ButtonId::A,
        tap_to(Key::A).with_long_hold(TimedAction::with_threshold(
            ExecutableAction::key(Key::L),
            Duration::from_millis(500),
        )),
    )]));

    h.press(ButtonId::A, 0);
    h.engine
        .release(ButtonId::A, h.at(100), Some(Duration::from_millis(650)));

    assert_eq!(h.keys(), vec![key(Key::L)]);
}

#[test]
fn repeat_fires_on_press_and_every_interval_until_release() {
    let h = Harness::new(bound(vec![(
        ButtonId::DpadDown,
        tap_to(Key::ArrowDown).with_repeat(RepeatMapping::every(Duration::from_millis(100))),
    )]));

    h.press(ButtonId::DpadDown, 0);
    assert_eq!(h.keys().len(), 1);
    h.advance_to(100);
    h.advance_to(200);
    h.advance_to(300);
    assert_eq!(h.keys().len(), 4);

    h.release(ButtonId::DpadDown, 350);
    h.advance_to(1_000);
    assert_eq!(h.keys().len(), 4);
    assert_eq!(
        h.triggers(),
        vec![Trigger::Tap, Trigger::Repeat, Trigger::Repeat, Trigger::Repeat]
    );
}

#[test]
fn repeat_with_double_tap_never_adds_a_single_tap_fallback() {
    let h = Harness::new(bound(vec![(
        ButtonId::X,
        tap_to(Key::Space)
            .with_repeat(RepeatMapping::every(Duration::from_millis(100)))
            .with_double_tap(TimedAction::with_threshold(
                ExecutableAction::key(Key::Enter),
                Duration::from_millis(300),
            )),
    )]));

    h.tap(ButtonId::X, 0, 50);
    h.tap(ButtonId::X, 150, 200);
    h.advance_to(2_000);
    assert_eq!(
        h.keys(),
        vec![key(Key::Space), key(Key::Space), key(Key::Enter)]
    );

    h.tap(ButtonId::X, 3_000, 3_050);
    h.advance_to(5_000);
    assert_eq!(h.keys().len(), 4);
}

#[test]
fn sequence_survives_unrelated_presses() {
    let mut profile = Profile::empty("sequences");
    profile.sequences.push(SequenceMapping::new(
        &[ButtonId::A, ButtonId::B, ButtonId::X],
        Duration::from_millis(400),
        ExecutableAction::key(Key::S),
    ));
    profile.sequences.push(SequenceMapping::new(
        &[ButtonId::A, ButtonId::Y],
        Duration::from_millis(400),
        ExecutableAction::key(Key::T),
    ));
    let h = Harness::new(profile);

    h.tap(ButtonId::A, 0, 20);
    h.tap(ButtonId::DpadUp, 100, 120);
    h.tap(ButtonId::B, 200, 220);
    h.tap(ButtonId::X, 300, 320);
    assert_eq!(h.keys(), vec![key(Key::S)]);

    h.tap(ButtonId::Y, 350, 370);
    assert_eq!(h.keys(), vec![key(Key::S), key(Key::T)]);
    assert_eq!(h.triggers(), vec![Trigger::Sequence, Trigger::Sequence]);
}

#[test]
fn slow_sequence_step_is_discarded() {
    let mut profile = Profile::empty("sequences");
    profile.sequences.push(SequenceMapping::new(
        &[ButtonId::A, ButtonId::B],
        Duration::from_millis(200),
        ExecutableAction::key(Key::S),
    ));
    let h = Harness::new(profile);

    h.tap(ButtonId::A, 0, 20);
    h.tap(ButtonId::B, 400, 420);
    assert!(h.keys().is_empty());

    h.tap(ButtonId::A, 1_000, 1_020);
    h.tap(ButtonId::B, 1_100, 1_120);
    assert_eq!(h.keys(), vec![key(Key::S)]);
}

#[test]
fn layer_overrides_while_activator_is_held() {
    let mut profile = bound(vec![(ButtonId::A, tap_to(Key::A)), (ButtonId::B, tap_to(Key::B))]);
    profile.layers.push(Layer {
        id: "edit".to_string(),
        activator: Some(ButtonId::View),
        buttons: vec![ButtonBinding::new(
            ButtonId::A,
            ButtonMapping::new(ExecutableAction::key_with(Key::C, &[ModifierKey::Command])),
        )],
    });
    let h = Harness::new(profile);

    h.press(ButtonId::View, 0);
    assert_eq!(h.engine.active_layer().as_deref(), Some("edit"));
    h.tap(ButtonId::A, 10, 30);
    h.tap(ButtonId::B, 40, 60);
    h.release(ButtonId::View, 70);
    assert_eq!(h.engine.active_layer(), None);
    h.tap(ButtonId::A, 100, 130);

    assert_eq!(h.keys(), vec![key(Key::C), key(Key::B), key(Key::A)]);
    assert_eq!(
        h.sink.commands()[0],
        OutputCommand::KeyDown(key(Key::C), egui::Modifiers::COMMAND)
    );
}

#[test]
fn shared_modifier_stays_down_until_last_holder_releases() {
    let h = Harness::new(bound(vec![
        (ButtonId::LeftBumper, ButtonMapping::modifier_hold(&[ModifierKey::Command])),
        (ButtonId::RightBumper, ButtonMapping::modifier_hold(&[ModifierKey::Command])),
    ]));

    h.press(ButtonId::LeftBumper, 0);
    h.press(ButtonId::RightBumper, 10);
    h.release(ButtonId::LeftBumper, 50);
    assert_eq!(h.sink.held_modifiers(), vec![ModifierKey::Command]);

    h.release(ButtonId::RightBumper, 90);
    assert!(h.sink.held_modifiers().is_empty());
    assert_eq!(
        h.sink.commands(),
        vec![
            OutputCommand::HoldModifier(ModifierKey::Command),
            OutputCommand::ReleaseModifier(ModifierKey::Command),
        ]
    );
}

#[test]
fn mouse_button_is_held_for_the_press_duration() {
    let h = Harness::new(bound(vec![(
        ButtonId::A,
        ButtonMapping::new(ExecutableAction::mouse(PointerButton::Primary)),
    )]));

    h.press(ButtonId::A, 0);
    assert_eq!(h.keys(), vec![OutputKey::Mouse(PointerButton::Primary)]);
    assert!(h.sink.key_ups().is_empty());

    h.release(ButtonId::A, 400);
    assert!(h.sink.stuck_keys().is_empty());
}

#[test]
fn double_tap_on_a_held_modifier_fires_instead_of_holding() {
    let h = Harness::new(bound(vec![(
        ButtonId::LeftBumper,
        ButtonMapping::modifier_hold(&[ModifierKey::Shift]).with_double_tap(
            TimedAction::with_threshold(ExecutableAction::key(Key::Tab), Duration::from_millis(300)),
        ),
    )]));

    h.tap(ButtonId::LeftBumper, 0, 60);
    h.tap(ButtonId::LeftBumper, 150, 200);

    assert_eq!(h.keys(), vec![key(Key::Tab)]);
    assert!(h.sink.held_modifiers().is_empty());
    assert_eq!(h.triggers(), vec![Trigger::DoubleTap]);
}

fn excursion(peak: f64) -> Vec<f64> {
    vec![0.2, 0.6, 1.0, 0.8, 0.5, 0.2, 0.05, 0.0]
        .into_iter()
        .map(|f| f * peak)
        .collect()
}

fn feed_motion(h: &Harness, axis: MotionAxis, trace: &[f64], start_ms: u64) {
    for (i, velocity) in trace.iter().enumerate() {
        h.engine.handle_input(InputEvent::Motion {
            axis,
            velocity: *velocity,
            at: h.at(start_ms + 10 * i as u64),
        });
    }
}

#[test]
fn motion_gesture_fires_once_per_excursion_and_respects_cooldown() {
    let mut profile = Profile::empty("motion");
    profile.motion_gestures.push(MotionBinding {
        axis: MotionAxis::Roll,
        direction: GestureDirection::Positive,
        action: ExecutableAction::key_with(Key::ArrowRight, &[ModifierKey::Control]),
    });
    let h = Harness::new(profile);

    feed_motion(&h, MotionAxis::Roll, &excursion(4.0), 0);
    assert_eq!(h.keys(), vec![key(Key::ArrowRight)]);

    feed_motion(&h, MotionAxis::Roll, &excursion(4.0), 100);
    assert_eq!(h.keys().len(), 1, "replay inside the cooldown is ignored");

    feed_motion(&h, MotionAxis::Roll, &[0.0], 400);
    feed_motion(&h, MotionAxis::Roll, &excursion(4.0), 450);
    assert_eq!(h.keys().len(), 2);
    assert_eq!(h.triggers(), vec![Trigger::Motion, Trigger::Motion]);
}

#[test]
fn stick_resting_in_deadzone_produces_nothing() {
    let h = Harness::new(Profile::empty("sticks"));

    h.engine.handle_input(InputEvent::Stick {
        stick: StickId::Left,
        x: 0.05,
        y: -0.04,
        at: h.at(0),
    });
    for i in 1..=50 {
        h.engine.poll_analog(h.at(8 * i));
    }

    assert!(h.sink.commands().is_empty());
}

#[test]
fn deflected_stick_moves_the_pointer() {
    let h = Harness::new(Profile::empty("sticks"));

    h.engine.handle_input(InputEvent::Stick {
        stick: StickId::Left,
        x: 0.8,
        y: 0.0,
        at: h.at(0),
    });
    for i in 1..=30 {
        h.engine.poll_analog(h.at(8 * i));
    }

    let moved: f64 = h
        .sink
        .pointer_commands()
        .into_iter()
        .map(|command| match command {
            OutputCommand::MovePointer { dx, .. } => dx,
            _ => 0.0,
        })
        .sum();
    assert!(moved > 0.0);
}

#[test]
fn touchpad_finger_moves_the_pointer() {
    let h = Harness::new(Profile::empty("touchpad"));

    h.engine.handle_input(InputEvent::TouchpadMove {
        dx: 0.01,
        dy: 0.0,
        at: h.at(0),
    });

    assert_eq!(
        h.sink.pointer_commands(),
        vec![OutputCommand::MovePointer { dx: 9.0, dy: 0.0 }]
    );
}

#[test]
fn disabling_releases_every_held_output() {
    let h = Harness::new(bound(vec![
        (ButtonId::LeftBumper, ButtonMapping::modifier_hold(&[ModifierKey::Shift])),
        (ButtonId::A, ButtonMapping::new(ExecutableAction::mouse(PointerButton::Primary))),
        (
            ButtonId::Y,
            tap_to(Key::Escape).with_long_hold(TimedAction::new(ExecutableAction::key(Key::Q))),
        ),
    ]));

    h.press(ButtonId::LeftBumper, 0);
    h.press(ButtonId::A, 10);
    h.press(ButtonId::Y, 20);
    assert!(h.engine.pending_tasks() > 0);

    h.engine.set_enabled(false);
    assert!(h.sink.stuck_keys().is_empty());
    assert!(h.sink.held_modifiers().is_empty());
    assert_eq!(h.engine.pending_tasks(), 0);

    h.sink.clear();
    h.release(ButtonId::Y, 30);
    h.tap(ButtonId::Y, 40, 60);
    h.advance_to(5_000);
    assert!(h.sink.commands().is_empty());

    h.engine.set_enabled(true);
    h.tap(ButtonId::Y, 6_000, 6_050);
    assert_eq!(h.keys(), vec![key(Key::Escape)]);
}

#[test]
fn profile_switch_cancels_pending_work() {
    let h = Harness::new(bound(vec![(
        ButtonId::Y,
        tap_to(Key::Escape).with_long_hold(TimedAction::new(ExecutableAction::key(Key::Q))),
    )]));

    h.press(ButtonId::Y, 0);
    h.engine
        .switch_profile(bound(vec![(ButtonId::Y, tap_to(Key::Z))]))
        .unwrap();
    assert_eq!(h.engine.pending_tasks(), 0);
    h.advance_to(2_000);
    h.release(ButtonId::Y, 2_100);
    assert!(h.keys().is_empty());

    h.tap(ButtonId::Y, 3_000, 3_050);
    assert_eq!(h.keys(), vec![key(Key::Z)]);
    assert_eq!(h.engine.active_profile().map(|p| p.name.clone()), Some("test".to_string()));
}

#[test]
fn locked_engine_ignores_input_until_unlocked() {
    let h = Harness::new(bound(vec![(ButtonId::A, tap_to(Key::A))]));

    h.engine.set_locked(true);
    assert!(h.engine.is_locked());
    h.tap(ButtonId::A, 0, 40);
    assert!(h.keys().is_empty());

    h.engine.set_locked(false);
    h.tap(ButtonId::A, 100, 140);
    assert_eq!(h.keys(), vec![key(Key::A)]);
}

struct FailingScripts;

impl ScriptEngine for FailingScripts {
    fn run(&self, _script: &ScriptDefinition) -> Result<Option<String>, ScriptError> {
        Err(ScriptError::Failed("boom".to_string()))
    }
}

#[test]
fn script_failure_becomes_feedback_and_input_continues() {
    let mut profile = bound(vec![
        (ButtonId::A, ButtonMapping::new(ExecutableAction::script_ref("resize"))),
        (ButtonId::B, tap_to(Key::B)),
    ]);
    profile.scripts.push(ScriptDefinition {
        id: "resize".to_string(),
        name: "Resize window".to_string(),
        source: "window.resize()".to_string(),
    });
    let h = Harness::with_executor(profile, |executor| {
        executor.with_script_engine(Arc::new(FailingScripts))
    });

    h.tap(ButtonId::A, 0, 30);
    h.tap(ButtonId::B, 50, 80);

    assert_eq!(
        h.feedback.texts(),
        vec![SCRIPT_ERROR_FEEDBACK.to_string(), "B".to_string()]
    );
    assert_eq!(h.keys(), vec![key(Key::B)]);
}

#[test]
fn macros_run_by_id_and_missing_ones_fall_back_to_hint() {
    let mut profile = bound(vec![
        (ButtonId::A, ButtonMapping::new(ExecutableAction::macro_ref("greet"))),
        (
            ButtonId::B,
            ButtonMapping::new(ExecutableAction::macro_ref("missing").with_hint("Build")),
        ),
    ]);
    let greet = MacroDefinition {
        id: "greet".to_string(),
        name: "Greeting".to_string(),
        steps: vec![MacroStep::Text {
            text: "hello".to_string(),
        }],
    };
    profile.macros.push(greet.clone());
    let h = Harness::new(profile);

    h.tap(ButtonId::A, 0, 30);
    h.tap(ButtonId::B, 50, 80);

    assert_eq!(h.sink.commands(), vec![OutputCommand::RunMacro(greet)]);
    assert_eq!(
        h.feedback.texts(),
        vec!["Greeting".to_string(), "Build".to_string()]
    );
}

#[derive(Default)]
struct DpadOverlay {
    events: Mutex<Vec<(ButtonId, bool)>>,
}

impl OverlayConsumer for DpadOverlay {
    fn claims(&self, button: ButtonId) -> bool {
        button.is_dpad()
    }

    fn button_down(&self, button: ButtonId) {
        self.events.lock().unwrap().push((button, true));
    }

    fn button_up(&self, button: ButtonId) {
        self.events.lock().unwrap().push((button, false));
    }
}

#[test]
fn overlay_takes_claimed_buttons_before_any_mapping() {
    let mut profile = bound(vec![
        (ButtonId::DpadUp, tap_to(Key::ArrowUp)),
        (ButtonId::A, tap_to(Key::A)),
    ]);
    profile.sequences.push(SequenceMapping::new(
        &[ButtonId::DpadUp, ButtonId::A],
        Duration::from_millis(400),
        ExecutableAction::key(Key::S),
    ));
    let overlay = Arc::new(DpadOverlay::default());
    let sink = Arc::new(RecordingSink::new());
    let engine = Engine::new(ActionExecutor::new(sink.clone()), EngineSettings::default())
        .with_overlay(overlay.clone());
    engine.switch_profile(profile).unwrap();
    sink.clear();
    let t0 = Instant::now();

    engine.press(ButtonId::DpadUp, t0);
    engine.release(ButtonId::DpadUp, t0 + Duration::from_millis(30), None);
    engine.press(ButtonId::A, t0 + Duration::from_millis(60));
    engine.release(ButtonId::A, t0 + Duration::from_millis(90), None);

    assert_eq!(
        *overlay.events.lock().unwrap(),
        vec![(ButtonId::DpadUp, true), (ButtonId::DpadUp, false)]
    );
    assert_eq!(sink.key_downs(), vec![key(Key::A)]);
}

#[test]
fn two_finger_pan_scrolls() {
    let h = Harness::new(Profile::empty("touchpad"));

    for i in 0..5 {
        h.engine.handle_input(InputEvent::TouchpadGesture {
            sample: TwoFingerSample {
                center_dx: 0.0,
                center_dy: 0.02,
                distance_delta: 0.0,
                first_touching: true,
                second_touching: true,
            },
            at: h.at(10 * i),
        });
    }

    assert!(h
        .sink
        .pointer_commands()
        .iter()
        .any(|command| matches!(command, OutputCommand::Scroll { .. })));
}

/// Parks the first feedback callback until the test lets it go
struct PausingListener {
    entered: Mutex<Option<mpsc::Sender<()>>>,
    resume: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FeedbackListener for PausingListener {
    fn on_feedback(&self, _event: &FeedbackEvent) {
        let Some(entered) = self.entered.lock().unwrap().take() else {
            return;
        };
        entered.send(()).unwrap();
        if let Some(resume) = self.resume.lock().unwrap().take() {
            resume.recv().unwrap();
        }
    }
}

#[test]
fn disabling_while_a_press_is_being_applied_leaves_nothing_held() {
    let mut profile = Profile::empty("race");
    profile.bind(
        ButtonId::A,
        ButtonMapping::new(ExecutableAction::mouse(PointerButton::Primary)),
    );
    profile.sequences.push(SequenceMapping::new(
        &[ButtonId::A],
        Duration::from_millis(400),
        ExecutableAction::key(Key::S),
    ));

    let (entered_tx, entered_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();
    let listener = Arc::new(PausingListener {
        entered: Mutex::new(Some(entered_tx)),
        resume: Mutex::new(Some(resume_rx)),
    });
    let sink = Arc::new(RecordingSink::new());
    let engine = Engine::new(ActionExecutor::new(sink.clone()), EngineSettings::default())
        .with_feedback_listener(listener);
    engine.switch_profile(profile).unwrap();
    let t0 = engine.now();

    thread::scope(|scope| {
        let pressing = scope.spawn(|| engine.press(ButtonId::A, t0));
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        engine.set_enabled(false);
        resume_tx.send(()).unwrap();
        pressing.join().unwrap();
    });
    engine.set_enabled(true);
    engine.release(ButtonId::A, t0 + Duration::from_millis(50), None);

    assert!(sink.stuck_keys().is_empty(), "stuck: {:?}", sink.stuck_keys());
    assert!(sink.held_modifiers().is_empty());
}

#[test]
fn profile_switch_between_press_and_release_ends_the_old_hold() {
    let mut profile = Profile::empty("old");
    profile.bind(
        ButtonId::A,
        ButtonMapping::new(ExecutableAction::mouse(PointerButton::Primary)),
    );
    let h = Harness::new(profile);

    h.press(ButtonId::A, 0);
    assert_eq!(h.keys(), vec![OutputKey::Mouse(PointerButton::Primary)]);
    h.engine.switch_profile(Profile::empty("new")).unwrap();
    assert!(h.sink.stuck_keys().is_empty());

    h.release(ButtonId::A, 40);
    assert_eq!(h.keys().len(), 1);
    assert!(h.sink.stuck_keys().is_empty());
}
