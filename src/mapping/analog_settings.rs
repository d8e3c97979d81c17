//! Settings for the continuous processors

use super::action::{KeyBinding, ModifierKey};
use super::error::MappingError;
use egui::Key;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickMode {
    Disabled,
    Pointer,
    Scroll,
    DirectionKeys,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionLayout {
    Wasd,
    Arrows,
}

impl DirectionLayout {
    /// Keys for up, down, left, right
    pub fn keys(self) -> [Key; 4] {
        match self {
            DirectionLayout::Wasd => [Key::W, Key::S, Key::A, Key::D],
            DirectionLayout::Arrows => [
                Key::ArrowUp,
                Key::ArrowDown,
                Key::ArrowLeft,
                Key::ArrowRight,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StickSettings {
    pub mode: StickMode,
    /// Multiplier on `max_speed`
    pub sensitivity: f64,
    /// Radial deadzone as a fraction of full deflection
    pub deadzone: f64,
    /// Exponent applied to the renormalized magnitude
    pub acceleration: f64,
    /// Output units per second at full deflection and sensitivity 1.0
    pub max_speed: f64,
    pub invert_y: bool,
    pub direction_layout: DirectionLayout,
    /// Minimum share of full deflection the secondary axis needs for a diagonal
    pub diagonal_threshold: f64,
    /// Holding this modifier slows the stick down to `focus_multiplier`
    pub focus_modifier: Option<ModifierKey>,
    pub focus_multiplier: f64,
}

impl StickSettings {
    pub fn pointer() -> Self {
        Self::default()
    }

    pub fn scroll() -> Self {
        Self {
            mode: StickMode::Scroll,
            max_speed: 900.0,
            acceleration: 2.0,
            ..Self::default()
        }
    }

    pub fn direction_keys(layout: DirectionLayout) -> Self {
        Self {
            mode: StickMode::DirectionKeys,
            direction_layout: layout,
            deadzone: 0.3,
            ..Self::default()
        }
    }

    fn validate(&self, name: &str) -> Result<(), MappingError> {
        if !(0.0..1.0).contains(&self.deadzone) {
            return Err(MappingError::InvalidDeadzone(self.deadzone));
        }
        if self.acceleration <= 0.0 {
            return Err(MappingError::InvalidAnalogSetting(format!(
                "{} stick acceleration must be positive",
                name
            )));
        }
        if self.sensitivity < 0.0 || self.max_speed < 0.0 {
            return Err(MappingError::InvalidAnalogSetting(format!(
                "{} stick speed must not be negative",
                name
            )));
        }
        if !(0.0..=1.0).contains(&self.diagonal_threshold) {
            return Err(MappingError::InvalidAnalogSetting(format!(
                "{} stick diagonal threshold must be within [0, 1]",
                name
            )));
        }
        Ok(())
    }
}

impl Default for StickSettings {
    fn default() -> Self {
        Self {
            mode: StickMode::Pointer,
            sensitivity: 1.0,
            deadzone: 0.15,
            acceleration: 1.6,
            max_speed: 1800.0,
            invert_y: false,
            direction_layout: DirectionLayout::Arrows,
            diagonal_threshold: 0.4,
            focus_modifier: None,
            focus_multiplier: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoystickSettings {
    pub left: StickSettings,
    pub right: StickSettings,
}

impl Default for JoystickSettings {
    fn default() -> Self {
        Self {
            left: StickSettings::pointer(),
            right: StickSettings::scroll(),
        }
    }
}

impl JoystickSettings {
    pub fn validate(&self) -> Result<(), MappingError> {
        self.left.validate("left")?;
        self.right.validate("right")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinchMode {
    /// Continuous magnify gesture
    Magnify,
    /// Discrete zoom key presses
    ZoomKeys,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchpadSettings {
    /// Pixels per touchpad unit for single-finger movement
    pub sensitivity: f64,
    /// Weight of the previous value in the single-finger moving average, in [0, 1)
    pub smoothing: f64,
    /// Gap after which the moving average starts over
    pub reset_gap_ms: u64,
    /// Pixels per touchpad unit for two-finger panning
    pub scroll_sensitivity: f64,
    /// Pinch wins when its magnitude exceeds pan magnitude times this ratio
    pub pinch_ratio: f64,
    pub pan_deadzone: f64,
    pub pinch_deadzone: f64,
    pub pinch_mode: PinchMode,
    pub magnify_sensitivity: f64,
    /// Accumulated pinch distance per zoom key step
    pub zoom_step: f64,
    pub zoom_in: KeyBinding,
    pub zoom_out: KeyBinding,
    pub momentum: bool,
    /// Pan velocity (px/s) above which momentum can arm
    pub momentum_start_velocity: f64,
    /// How long the pan has to stay fast before momentum arms
    pub momentum_min_duration_ms: u64,
    /// Momentum ends below this velocity (px/s)
    pub momentum_stop_velocity: f64,
    /// Exponential decay rate per second
    pub momentum_decay: f64,
}

impl Default for TouchpadSettings {
    fn default() -> Self {
        Self {
            sensitivity: 900.0,
            smoothing: 0.5,
            reset_gap_ms: 100,
            scroll_sensitivity: 700.0,
            pinch_ratio: 1.5,
            pan_deadzone: 0.002,
            pinch_deadzone: 0.004,
            pinch_mode: PinchMode::Magnify,
            magnify_sensitivity: 2.0,
            zoom_step: 0.05,
            zoom_in: KeyBinding::key(Key::Equals).with_modifiers(&[ModifierKey::Command]),
            zoom_out: KeyBinding::key(Key::Minus).with_modifiers(&[ModifierKey::Command]),
            momentum: true,
            momentum_start_velocity: 600.0,
            momentum_min_duration_ms: 40,
            momentum_stop_velocity: 20.0,
            momentum_decay: 4.0,
        }
    }
}

impl TouchpadSettings {
    pub fn validate(&self) -> Result<(), MappingError> {
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(MappingError::InvalidAnalogSetting(
                "touchpad smoothing must be within [0, 1)".to_string(),
            ));
        }
        if self.reset_gap_ms == 0 {
            return Err(MappingError::ZeroTimeout("touchpad reset gap".to_string()));
        }
        if self.pinch_ratio <= 0.0 || self.zoom_step <= 0.0 {
            return Err(MappingError::InvalidAnalogSetting(
                "touchpad pinch ratio and zoom step must be positive".to_string(),
            ));
        }
        if self.momentum_decay <= 0.0 {
            return Err(MappingError::InvalidAnalogSetting(
                "momentum decay must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thresholds of the per-axis motion gesture detector. Velocities in rad/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    pub activation_threshold: f64,
    pub completion_ratio: f64,
    pub min_peak: f64,
    pub settle_threshold: f64,
    pub max_tracking_ms: u64,
    pub cooldown_ms: u64,
    /// Cooldown used when the new excursion opposes the previous gesture
    pub opposite_cooldown_ms: u64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            activation_threshold: 1.5,
            completion_ratio: 0.3,
            min_peak: 2.5,
            settle_threshold: 0.5,
            max_tracking_ms: 600,
            cooldown_ms: 300,
            opposite_cooldown_ms: 700,
        }
    }
}

impl MotionSettings {
    pub fn validate(&self) -> Result<(), MappingError> {
        if self.max_tracking_ms == 0 {
            return Err(MappingError::ZeroTimeout("motion tracking".to_string()));
        }
        if !(0.0..1.0).contains(&self.completion_ratio) || self.activation_threshold <= 0.0 {
            return Err(MappingError::InvalidAnalogSetting(
                "motion completion ratio must be within [0, 1) and activation positive"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
