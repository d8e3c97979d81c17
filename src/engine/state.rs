//! Runtime context shared by every engine decision
//!
//! [`EngineState`] holds everything a discrete decision reads or writes and
//! lives behind a single mutex in [`super::Engine`]. [`AnalogState`] holds
//! the continuous processors behind a second mutex so the analog tick never
//! waits on button resolution. Neither touches the output sink: decisions
//! are returned as [`Effect`]s and applied after the lock is released.
//!
//! Both sides count their resets in an epoch. A [`Decision`] remembers the
//! epoch it was made in, so output decided before a reset can be told apart
//! from output decided after it.

use super::layers::LayerStack;
use super::scheduler::{Scheduler, Task, TaskHandle};
use crate::action::Trigger;
use crate::analog::{AnalogOutput, JoystickProcessor, TouchpadProcessor};
use crate::config::EngineSettings;
use crate::controller::ButtonId;
use crate::gesture::{ChordDetector, GestureDetector, MotionGestureDetector, SequenceDetector};
use crate::mapping::{
    ButtonMapping, ExecutableAction, JoystickSettings, ModifierKey, MotionSettings, Profile,
    TouchpadSettings,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Output-side work decided under the lock
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    Execute {
        action: ExecutableAction,
        trigger: Trigger,
        button: Option<ButtonId>,
    },
    HoldBegin(ExecutableAction),
    HoldEnd(ExecutableAction),
    OverlayDown(ButtonId),
    OverlayUp(ButtonId),
    ReleaseModifiers(Vec<ModifierKey>),
    ReleaseAllModifiers,
    Analog(AnalogOutput),
}

impl Effect {
    pub(crate) fn execute(action: ExecutableAction, trigger: Trigger, button: ButtonId) -> Self {
        Effect::Execute {
            action,
            trigger,
            button: Some(button),
        }
    }
}

/// Which side decided, and in which epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Enable, lock and profile changes; never stale
    #[default]
    Control,
    Discrete(u64),
    Analog(u64),
}

/// A finished decision plus the profile it was made against
#[derive(Debug, Default)]
pub(crate) struct Decision {
    pub effects: Vec<Effect>,
    pub profile: Option<Arc<Profile>>,
    pub origin: Origin,
}

impl Decision {
    pub(crate) fn none() -> Self {
        Self::default()
    }
}

/// What the engine remembers about a button between its press and release
#[derive(Debug, Clone)]
pub(crate) struct PressRecord {
    pub pressed_at: Instant,
    /// Resolved through the layer stack at press time
    pub mapping: Option<ButtonMapping>,
    /// Set when this press activated a layer
    pub layer: Option<String>,
    pub intercepted: bool,
    pub holding: bool,
    pub long_hold_fired: bool,
    pub repeat_active: bool,
    pub chord_active: bool,
    pub double_tap_on_press: bool,
}

impl PressRecord {
    pub(crate) fn new(pressed_at: Instant, mapping: Option<ButtonMapping>) -> Self {
        Self {
            pressed_at,
            mapping,
            layer: None,
            intercepted: false,
            holding: false,
            long_hold_fired: false,
            repeat_active: false,
            chord_active: false,
            double_tap_on_press: false,
        }
    }
}

/// Scheduled work that belongs to one button
#[derive(Debug, Default)]
pub(crate) struct ButtonTimers {
    pub long_hold: Option<TaskHandle>,
    pub repeat: Option<TaskHandle>,
    /// Outlives the release that scheduled it
    pub deferred_tap: Option<(TaskHandle, ExecutableAction)>,
}

impl ButtonTimers {
    pub(crate) fn cancel_long_hold(&mut self) {
        if let Some(handle) = self.long_hold.take() {
            handle.cancel();
        }
    }

    pub(crate) fn cancel_repeat(&mut self) {
        if let Some(handle) = self.repeat.take() {
            handle.cancel();
        }
    }

    pub(crate) fn cancel_deferred_tap(&mut self) {
        if let Some((handle, _)) = self.deferred_tap.take() {
            handle.cancel();
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        self.cancel_long_hold();
        self.cancel_repeat();
        self.cancel_deferred_tap();
    }
}

pub(crate) struct EngineState {
    /// Bumped by every [`EngineState::reset`]
    pub epoch: u64,
    pub enabled: bool,
    pub locked: bool,
    pub profile: Option<Arc<Profile>>,
    pub settings: EngineSettings,
    pub layers: LayerStack,
    pub scheduler: Scheduler,
    pub pressed: HashMap<ButtonId, PressRecord>,
    pub timers: HashMap<ButtonId, ButtonTimers>,
    pub last_tap: HashMap<ButtonId, Instant>,
    /// Single taps waiting for the chord window to close
    pub parked_taps: BTreeMap<ButtonId, ExecutableAction>,
    /// Continuously simulated holds, by the button that started them
    pub held: HashMap<ButtonId, ExecutableAction>,
    pub chords: ChordDetector,
    pub chord_window: Option<TaskHandle>,
    pub sequences: SequenceDetector,
}

impl EngineState {
    pub(crate) fn new(settings: EngineSettings) -> Self {
        Self {
            epoch: 0,
            enabled: true,
            locked: false,
            profile: None,
            chords: ChordDetector::new(&[], settings.chord_window()),
            sequences: SequenceDetector::new(&[], settings.chord_window()),
            settings,
            layers: LayerStack::default(),
            scheduler: Scheduler::new(),
            pressed: HashMap::new(),
            timers: HashMap::new(),
            last_tap: HashMap::new(),
            parked_taps: BTreeMap::new(),
            held: HashMap::new(),
            chord_window: None,
        }
    }

    /// The profile to act on, or `None` while disabled, locked or unconfigured
    pub(crate) fn active_profile(&self) -> Option<Arc<Profile>> {
        if self.enabled && !self.locked {
            self.profile.clone()
        } else {
            None
        }
    }

    pub(crate) fn timers_mut(&mut self, button: ButtonId) -> &mut ButtonTimers {
        self.timers.entry(button).or_default()
    }

    pub(crate) fn decision(&self, effects: Vec<Effect>) -> Decision {
        Decision {
            effects,
            profile: self.profile.clone(),
            origin: Origin::Discrete(self.epoch),
        }
    }

    /// Schedules the release of a modifier tap executed at `at` in `epoch`.
    ///
    /// A tap from an earlier epoch is ignored: the reset in between already
    /// released every modifier.
    pub(crate) fn schedule_modifier_release(
        &mut self,
        epoch: u64,
        at: Instant,
        modifiers: Vec<ModifierKey>,
    ) {
        if epoch != self.epoch {
            debug!("Dropping release of {:?} from before the last reset", modifiers);
            return;
        }
        let deadline = at + self.settings.modifier_tap_delay();
        self.scheduler
            .schedule(deadline, Task::ModifierRelease { modifiers });
    }

    /// Installs a validated profile and rebuilds the detectors from it
    pub(crate) fn install_profile(&mut self, profile: Arc<Profile>) {
        self.chords = ChordDetector::new(&profile.chords, self.settings.chord_window());
        self.sequences = SequenceDetector::new(&profile.sequences, self.settings.chord_window());
        self.profile = Some(profile);
    }

    /// Cancels all scheduled work and ends every simulated hold
    pub(crate) fn reset(&mut self) -> Vec<Effect> {
        self.epoch = self.epoch.wrapping_add(1);
        let mut effects: Vec<Effect> = self
            .scheduler
            .cancel_all()
            .into_iter()
            .filter_map(|task| match task {
                Task::ModifierRelease { modifiers } => {
                    Some(Effect::ReleaseModifiers(modifiers))
                }
                _ => None,
            })
            .collect();

        let mut intercepted: Vec<ButtonId> = self
            .pressed
            .iter()
            .filter(|(_, record)| record.intercepted)
            .map(|(button, _)| *button)
            .collect();
        intercepted.sort();
        effects.extend(intercepted.into_iter().map(Effect::OverlayUp));

        let mut held: Vec<(ButtonId, ExecutableAction)> = self.held.drain().collect();
        held.sort_by_key(|(button, _)| *button);
        effects.extend(held.into_iter().map(|(_, action)| Effect::HoldEnd(action)));

        self.pressed.clear();
        self.timers.clear();
        self.last_tap.clear();
        self.parked_taps.clear();
        self.chord_window = None;
        self.chords.reset();
        self.sequences.reset();
        self.layers.clear();

        effects.push(Effect::ReleaseAllModifiers);
        effects
    }
}

/// Continuous processors and the gate that silences them
pub(crate) struct AnalogState {
    pub epoch: u64,
    pub active: bool,
    pub profile: Option<Arc<Profile>>,
    pub joysticks: JoystickProcessor,
    pub touchpad: TouchpadProcessor,
    pub motion: MotionGestureDetector,
}

impl AnalogState {
    pub(crate) fn new() -> Self {
        Self {
            epoch: 0,
            active: true,
            profile: None,
            joysticks: JoystickProcessor::new(&JoystickSettings::default()),
            touchpad: TouchpadProcessor::new(TouchpadSettings::default()),
            motion: MotionGestureDetector::new(&MotionSettings::default()),
        }
    }

    pub(crate) fn active_profile(&self) -> Option<Arc<Profile>> {
        if self.active {
            self.profile.clone()
        } else {
            None
        }
    }

    /// Brings every processor back to rest, returning the outputs that end
    /// any scroll, magnify or held direction key
    pub(crate) fn decision(&self, effects: Vec<Effect>, profile: Arc<Profile>) -> Decision {
        Decision {
            effects,
            profile: Some(profile),
            origin: Origin::Analog(self.epoch),
        }
    }

    pub(crate) fn reset(&mut self) -> Vec<Effect> {
        self.epoch = self.epoch.wrapping_add(1);
        self.motion.reset();
        self.joysticks
            .reset()
            .into_iter()
            .chain(self.touchpad.reset())
            .map(Effect::Analog)
            .collect()
    }

    pub(crate) fn install_profile(&mut self, profile: Arc<Profile>) {
        self.joysticks = JoystickProcessor::new(&profile.joysticks);
        self.touchpad = TouchpadProcessor::new(profile.touchpad.clone());
        self.motion = MotionGestureDetector::new(&profile.motion);
        self.profile = Some(profile);
    }
}
