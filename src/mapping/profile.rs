//! Profile data model: what every button, chord, sequence, layer and
//! motion gesture does, plus the analog settings.
//!
//! Mapping tables are lists of bindings rather than maps keyed by
//! [`ButtonId`] so that they read naturally as TOML arrays of tables.

use super::action::{ExecutableAction, KeyBinding, ModifierKey, OutputKey};
use super::analog_settings::{JoystickSettings, MotionSettings, TouchpadSettings};
use super::error::MappingError;
use crate::controller::{ButtonId, MotionAxis};
use egui::{Key, PointerButton};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

/// A sub-action with its own timing threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedAction {
    #[serde(flatten)]
    pub action: ExecutableAction,
    /// Falls back to the engine default when unset
    #[serde(default)]
    pub threshold_ms: Option<u64>,
}

impl TimedAction {
    pub fn new(action: ExecutableAction) -> Self {
        Self {
            action,
            threshold_ms: None,
        }
    }

    pub fn with_threshold(action: ExecutableAction, threshold: Duration) -> Self {
        Self {
            action,
            threshold_ms: Some(threshold.as_millis() as u64),
        }
    }

    pub fn threshold_or(&self, default: Duration) -> Duration {
        self.threshold_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatMapping {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

impl RepeatMapping {
    pub fn every(interval: Duration) -> Self {
        Self {
            enabled: true,
            interval_ms: Some(interval.as_millis() as u64),
        }
    }

    pub fn interval_or(&self, default: Duration) -> Duration {
        self.interval_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
    }
}

fn default_true() -> bool {
    true
}

/// What a single button does
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ButtonMapping {
    #[serde(flatten)]
    pub action: ExecutableAction,
    /// Keep the action's modifiers asserted for as long as the button is held
    #[serde(default)]
    pub hold_modifier: bool,
    #[serde(default)]
    pub long_hold: Option<TimedAction>,
    #[serde(default)]
    pub double_tap: Option<TimedAction>,
    #[serde(default)]
    pub repeat: Option<RepeatMapping>,
}

impl ButtonMapping {
    pub fn new(action: ExecutableAction) -> Self {
        Self {
            action,
            ..Default::default()
        }
    }

    pub fn modifier_hold(modifiers: &[ModifierKey]) -> Self {
        Self {
            action: ExecutableAction::modifiers_only(modifiers),
            hold_modifier: true,
            ..Default::default()
        }
    }

    pub fn with_long_hold(mut self, long_hold: TimedAction) -> Self {
        self.long_hold = Some(long_hold);
        self
    }

    pub fn with_double_tap(mut self, double_tap: TimedAction) -> Self {
        self.double_tap = Some(double_tap);
        self
    }

    pub fn with_repeat(mut self, repeat: RepeatMapping) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn is_modifier_hold(&self) -> bool {
        self.hold_modifier && !self.action.modifiers.is_empty()
    }

    pub fn repeat_enabled(&self) -> bool {
        self.repeat.as_ref().map(|r| r.enabled).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonBinding {
    pub button: ButtonId,
    #[serde(flatten)]
    pub mapping: ButtonMapping,
}

impl ButtonBinding {
    pub fn new(button: ButtonId, mapping: ButtonMapping) -> Self {
        Self { button, mapping }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordMapping {
    pub buttons: Vec<ButtonId>,
    #[serde(flatten)]
    pub action: ExecutableAction,
}

impl ChordMapping {
    pub fn new(buttons: &[ButtonId], action: ExecutableAction) -> Self {
        Self {
            buttons: buttons.to_vec(),
            action,
        }
    }

    pub fn button_set(&self) -> BTreeSet<ButtonId> {
        self.buttons.iter().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceMapping {
    pub steps: Vec<ButtonId>,
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(flatten)]
    pub action: ExecutableAction,
}

fn default_step_timeout_ms() -> u64 {
    400
}

impl SequenceMapping {
    pub fn new(steps: &[ButtonId], step_timeout: Duration, action: ExecutableAction) -> Self {
        Self {
            steps: steps.to_vec(),
            step_timeout_ms: step_timeout.as_millis() as u64,
            action,
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// Named alternate mapping table, active while its activator is held
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    #[serde(default)]
    pub activator: Option<ButtonId>,
    #[serde(default)]
    pub buttons: Vec<ButtonBinding>,
}

impl Layer {
    pub fn mapping(&self, button: ButtonId) -> Option<&ButtonMapping> {
        self.buttons
            .iter()
            .find(|binding| binding.button == button)
            .map(|binding| &binding.mapping)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MacroStep {
    Key {
        key: OutputKey,
        #[serde(default)]
        modifiers: Vec<ModifierKey>,
    },
    Text {
        text: String,
    },
    Delay {
        ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<MacroStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDefinition {
    pub id: String,
    pub name: String,
    pub source: String,
}

/// Sign of a completed motion excursion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureDirection {
    Positive,
    Negative,
}

impl GestureDirection {
    pub fn of(value: f64) -> Self {
        if value < 0.0 {
            GestureDirection::Negative
        } else {
            GestureDirection::Positive
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionBinding {
    pub axis: MotionAxis,
    pub direction: GestureDirection,
    #[serde(flatten)]
    pub action: ExecutableAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub buttons: Vec<ButtonBinding>,
    #[serde(default)]
    pub chords: Vec<ChordMapping>,
    #[serde(default)]
    pub sequences: Vec<SequenceMapping>,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub macros: Vec<MacroDefinition>,
    #[serde(default)]
    pub scripts: Vec<ScriptDefinition>,
    #[serde(default)]
    pub motion_gestures: Vec<MotionBinding>,
    #[serde(default)]
    pub joysticks: JoystickSettings,
    #[serde(default)]
    pub touchpad: TouchpadSettings,
    #[serde(default)]
    pub motion: MotionSettings,
}

impl Profile {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buttons: Vec::new(),
            chords: Vec::new(),
            sequences: Vec::new(),
            layers: Vec::new(),
            macros: Vec::new(),
            scripts: Vec::new(),
            motion_gestures: Vec::new(),
            joysticks: JoystickSettings::default(),
            touchpad: TouchpadSettings::default(),
            motion: MotionSettings::default(),
        }
    }

    /// Base-table mapping, ignoring layers
    pub fn mapping(&self, button: ButtonId) -> Option<&ButtonMapping> {
        self.buttons
            .iter()
            .find(|binding| binding.button == button)
            .map(|binding| &binding.mapping)
    }

    pub fn bind(&mut self, button: ButtonId, mapping: ButtonMapping) {
        self.buttons.retain(|binding| binding.button != button);
        self.buttons.push(ButtonBinding::new(button, mapping));
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn layer_activated_by(&self, button: ButtonId) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|layer| layer.activator == Some(button))
    }

    pub fn is_chord_participant(&self, button: ButtonId) -> bool {
        self.chords.iter().any(|chord| chord.buttons.contains(&button))
    }

    pub fn macro_definition(&self, id: &str) -> Option<&MacroDefinition> {
        self.macros.iter().find(|m| m.id == id)
    }

    pub fn script(&self, id: &str) -> Option<&ScriptDefinition> {
        self.scripts.iter().find(|s| s.id == id)
    }

    pub fn motion_action(
        &self,
        axis: MotionAxis,
        direction: GestureDirection,
    ) -> Option<&ExecutableAction> {
        self.motion_gestures
            .iter()
            .find(|binding| binding.axis == axis && binding.direction == direction)
            .map(|binding| &binding.action)
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        let mut chord_sets = HashSet::new();
        for chord in &self.chords {
            let set = chord.button_set();
            if set.len() < 2 {
                return Err(MappingError::ChordTooSmall(set.len()));
            }
            if !chord_sets.insert(set.clone()) {
                let names: Vec<String> = set.iter().map(|b| b.to_string()).collect();
                return Err(MappingError::DuplicateChord(names.join("+")));
            }
        }

        for (index, sequence) in self.sequences.iter().enumerate() {
            if sequence.steps.is_empty() {
                return Err(MappingError::EmptySequence(index));
            }
            if sequence.step_timeout_ms == 0 {
                return Err(MappingError::ZeroTimeout(format!("sequence {}", index)));
            }
        }

        let mut layer_ids = HashSet::new();
        let mut activators = HashSet::new();
        for layer in &self.layers {
            if !layer_ids.insert(layer.id.as_str()) {
                return Err(MappingError::DuplicateLayer(layer.id.clone()));
            }
            if let Some(activator) = layer.activator {
                if !activators.insert(activator) {
                    return Err(MappingError::ConflictingActivator(activator));
                }
            }
        }

        let layered = self
            .layers
            .iter()
            .flat_map(|layer| layer.buttons.iter());
        for binding in self.buttons.iter().chain(layered) {
            validate_button(binding)?;
        }

        self.joysticks.validate()?;
        self.touchpad.validate()?;
        self.motion.validate()
    }

    /// A reasonable out-of-the-box profile for desktop navigation
    pub fn default_profile() -> Self {
        let mut profile = Self::empty("Default");

        profile.bind(
            ButtonId::A,
            ButtonMapping::new(ExecutableAction::mouse(PointerButton::Primary)),
        );
        profile.bind(
            ButtonId::B,
            ButtonMapping::new(ExecutableAction::mouse(PointerButton::Secondary)),
        );
        profile.bind(
            ButtonId::X,
            ButtonMapping::new(ExecutableAction::key(Key::Space))
                .with_double_tap(TimedAction::new(ExecutableAction::key(Key::Enter))),
        );
        profile.bind(
            ButtonId::Y,
            ButtonMapping::new(ExecutableAction::key(Key::Escape)).with_long_hold(
                TimedAction::new(
                    ExecutableAction::key_with(Key::Q, &[ModifierKey::Command])
                        .with_hint("Quit app"),
                ),
            ),
        );
        profile.bind(
            ButtonId::LeftBumper,
            ButtonMapping::modifier_hold(&[ModifierKey::Command]),
        );
        profile.bind(
            ButtonId::RightBumper,
            ButtonMapping::modifier_hold(&[ModifierKey::Shift]),
        );
        profile.bind(
            ButtonId::LeftTrigger,
            ButtonMapping::new(ExecutableAction::key_with(
                Key::OpenBracket,
                &[ModifierKey::Command],
            )),
        );
        profile.bind(
            ButtonId::RightTrigger,
            ButtonMapping::new(ExecutableAction::key_with(
                Key::CloseBracket,
                &[ModifierKey::Command],
            )),
        );
        for (button, key) in [
            (ButtonId::DpadUp, Key::ArrowUp),
            (ButtonId::DpadDown, Key::ArrowDown),
            (ButtonId::DpadLeft, Key::ArrowLeft),
            (ButtonId::DpadRight, Key::ArrowRight),
        ] {
            profile.bind(
                button,
                ButtonMapping::new(ExecutableAction::key(key))
                    .with_repeat(RepeatMapping::every(Duration::from_millis(100))),
            );
        }
        profile.bind(
            ButtonId::Menu,
            ButtonMapping::new(ExecutableAction::key(Key::Tab).with_hint("Next field")),
        );
        profile.bind(
            ButtonId::TouchpadButton,
            ButtonMapping::new(ExecutableAction::mouse(PointerButton::Primary)),
        );

        profile.chords.push(ChordMapping::new(
            &[ButtonId::LeftTrigger, ButtonId::RightTrigger],
            ExecutableAction::key_with(Key::T, &[ModifierKey::Command]).with_hint("New tab"),
        ));

        profile.sequences.push(SequenceMapping::new(
            &[ButtonId::LeftThumbstick, ButtonId::RightThumbstick],
            Duration::from_millis(400),
            ExecutableAction::key_with(Key::Num4, &[ModifierKey::Command, ModifierKey::Shift])
                .with_hint("Screenshot"),
        ));

        profile.layers.push(Layer {
            id: "edit".to_string(),
            activator: Some(ButtonId::View),
            buttons: vec![
                ButtonBinding::new(
                    ButtonId::A,
                    ButtonMapping::new(ExecutableAction::key_with(
                        Key::C,
                        &[ModifierKey::Command],
                    )),
                ),
                ButtonBinding::new(
                    ButtonId::B,
                    ButtonMapping::new(ExecutableAction::key_with(
                        Key::V,
                        &[ModifierKey::Command],
                    )),
                ),
                ButtonBinding::new(
                    ButtonId::X,
                    ButtonMapping::new(ExecutableAction::key_with(
                        Key::X,
                        &[ModifierKey::Command],
                    )),
                ),
                ButtonBinding::new(
                    ButtonId::Y,
                    ButtonMapping::new(ExecutableAction::key_with(
                        Key::Z,
                        &[ModifierKey::Command],
                    )),
                ),
            ],
        });

        profile.motion_gestures.push(MotionBinding {
            axis: MotionAxis::Roll,
            direction: GestureDirection::Positive,
            action: ExecutableAction::key_with(Key::ArrowRight, &[ModifierKey::Control])
                .with_hint("Next space"),
        });
        profile.motion_gestures.push(MotionBinding {
            axis: MotionAxis::Roll,
            direction: GestureDirection::Negative,
            action: ExecutableAction::key_with(Key::ArrowLeft, &[ModifierKey::Control])
                .with_hint("Previous space"),
        });

        profile
    }
}

fn validate_button(binding: &ButtonBinding) -> Result<(), MappingError> {
    let mapping = &binding.mapping;
    for (name, timed) in [
        ("long hold", &mapping.long_hold),
        ("double tap", &mapping.double_tap),
    ] {
        if let Some(TimedAction {
            threshold_ms: Some(0),
            ..
        }) = timed
        {
            return Err(MappingError::ZeroTimeout(format!(
                "{} of {}",
                name, binding.button
            )));
        }
    }
    if let Some(RepeatMapping {
        interval_ms: Some(0),
        ..
    }) = mapping.repeat
    {
        return Err(MappingError::ZeroRepeatInterval(binding.button));
    }
    Ok(())
}

impl From<KeyBinding> for ExecutableAction {
    fn from(binding: KeyBinding) -> Self {
        ExecutableAction {
            key: binding.key,
            modifiers: binding.modifiers,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        assert_eq!(Profile::default_profile().validate(), Ok(()));
    }

    #[test]
    fn single_button_chord_is_rejected() {
        let mut profile = Profile::empty("p");
        profile.chords.push(ChordMapping::new(
            &[ButtonId::A, ButtonId::A],
            ExecutableAction::key(Key::C),
        ));
        assert_eq!(profile.validate(), Err(MappingError::ChordTooSmall(1)));
    }

    #[test]
    fn chord_order_does_not_make_a_new_chord() {
        let mut profile = Profile::empty("p");
        profile.chords.push(ChordMapping::new(
            &[ButtonId::A, ButtonId::B],
            ExecutableAction::key(Key::C),
        ));
        profile.chords.push(ChordMapping::new(
            &[ButtonId::B, ButtonId::A],
            ExecutableAction::key(Key::V),
        ));
        assert!(matches!(
            profile.validate(),
            Err(MappingError::DuplicateChord(_))
        ));
    }

    #[test]
    fn zero_repeat_interval_is_rejected() {
        let mut profile = Profile::empty("p");
        profile.bind(
            ButtonId::DpadUp,
            ButtonMapping::new(ExecutableAction::key(Key::ArrowUp)).with_repeat(RepeatMapping {
                enabled: true,
                interval_ms: Some(0),
            }),
        );
        assert_eq!(
            profile.validate(),
            Err(MappingError::ZeroRepeatInterval(ButtonId::DpadUp))
        );
    }

    #[test]
    fn two_layers_on_one_activator_conflict() {
        let mut profile = Profile::empty("p");
        for id in ["one", "two"] {
            profile.layers.push(Layer {
                id: id.to_string(),
                activator: Some(ButtonId::View),
                buttons: Vec::new(),
            });
        }
        assert_eq!(
            profile.validate(),
            Err(MappingError::ConflictingActivator(ButtonId::View))
        );
    }

    #[test]
    fn bindings_parse_from_toml_tables() {
        let text = r#"
            name = "Test"

            [[buttons]]
            button = "A"
            key = "A"
            modifiers = ["Command"]

            [buttons.long_hold]
            key = "B"
            threshold_ms = 700

            [[buttons]]
            button = "LeftBumper"
            modifiers = ["Shift"]
            hold_modifier = true

            [[chords]]
            buttons = ["A", "B"]
            macro_id = "copy"
            hint = "Copy"

            [[sequences]]
            steps = ["DpadUp", "DpadDown"]
            key = "Z"
        "#;
        let profile: Profile = toml::from_str(text).unwrap();
        let a = profile.mapping(ButtonId::A).unwrap();
        assert_eq!(a.action.key, Some(OutputKey::Keyboard(Key::A)));
        assert_eq!(
            a.long_hold.as_ref().unwrap().threshold_or(Duration::ZERO),
            Duration::from_millis(700)
        );
        assert!(profile.mapping(ButtonId::LeftBumper).unwrap().is_modifier_hold());
        assert_eq!(profile.chords[0].action.macro_id.as_deref(), Some("copy"));
        assert_eq!(profile.sequences[0].step_timeout_ms, 400);
        assert!(profile.is_chord_participant(ButtonId::B));
        assert!(!profile.is_chord_participant(ButtonId::X));
    }

    #[test]
    fn rebinding_replaces_previous_mapping() {
        let mut profile = Profile::empty("p");
        profile.bind(ButtonId::A, ButtonMapping::new(ExecutableAction::key(Key::A)));
        profile.bind(ButtonId::A, ButtonMapping::new(ExecutableAction::key(Key::B)));
        assert_eq!(profile.buttons.len(), 1);
        assert_eq!(
            profile.mapping(ButtonId::A).unwrap().action.key,
            Some(OutputKey::Keyboard(Key::B))
        );
    }
}
