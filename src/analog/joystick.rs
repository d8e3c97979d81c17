//! Stick to pointer, scroll or direction keys
//!
//! Per tick and per stick:
//! 1. Squared-magnitude deadzone test; a stick at rest produces nothing
//! 2. Renormalize the magnitude past the deadzone and apply the
//!    acceleration exponent
//! 3. Low-pass filter whose cutoff rises with deflection (smooth when slow,
//!    responsive when fast)
//! 4. Carry sub-pixel remainders to the next tick

use super::{whole_pixels, AnalogOutput};
use crate::controller::StickId;
use crate::mapping::{JoystickSettings, ModifierKey, StickMode, StickSettings};
use crate::output::{MomentumPhase, ScrollPhase};
use egui::Key;
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tracing::debug;

const MIN_CUTOFF_HZ: f64 = 1.5;
const MAX_CUTOFF_HZ: f64 = 12.0;
/// Used for the first tick after the stick leaves the deadzone
const FIRST_TICK_SECONDS: f64 = 1.0 / 120.0;
const MAX_TICK_SECONDS: f64 = 0.1;
/// Vertical scroll must beat horizontal by this factor to suppress it
const SCROLL_DOMINANCE: f64 = 2.0;
const FOCUS_RAMP_SECONDS: f64 = 0.08;
const FOCUS_RELEASE_PAUSE: Duration = Duration::from_millis(120);

/// Smoothly moves the speed multiplier toward the focus value while the
/// focus modifier is held, and back to 1.0 after a short pause once it is
/// released.
#[derive(Debug, Clone)]
pub struct FocusRamp {
    current: f64,
    held: bool,
    pause_until: Option<Instant>,
}

impl Default for FocusRamp {
    fn default() -> Self {
        Self {
            current: 1.0,
            held: false,
            pause_until: None,
        }
    }
}

impl FocusRamp {
    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn update(&mut self, held: bool, focus_multiplier: f64, now: Instant, dt: f64) -> f64 {
        if self.held && !held {
            self.pause_until = Some(now + FOCUS_RELEASE_PAUSE);
        }
        if held {
            self.pause_until = None;
        }
        self.held = held;

        if let Some(until) = self.pause_until {
            if now < until {
                return self.current;
            }
            self.pause_until = None;
        }

        let target = if held { focus_multiplier } else { 1.0 };
        let step = 1.0 - (-dt / FOCUS_RAMP_SECONDS).exp();
        self.current += (target - self.current) * step;
        if (target - self.current).abs() < 1e-3 {
            self.current = target;
        }
        self.current
    }
}

#[derive(Debug, Clone)]
pub struct StickProcessor {
    settings: StickSettings,
    raw: (f64, f64),
    filtered: (f64, f64),
    residual: (f64, f64),
    last_tick: Option<Instant>,
    focus: FocusRamp,
    held_keys: Vec<Key>,
    scrolling: bool,
    active: bool,
}

impl StickProcessor {
    pub fn new(settings: StickSettings) -> Self {
        Self {
            settings,
            raw: (0.0, 0.0),
            filtered: (0.0, 0.0),
            residual: (0.0, 0.0),
            last_tick: None,
            focus: FocusRamp::default(),
            held_keys: Vec::new(),
            scrolling: false,
            active: false,
        }
    }

    pub fn set_position(&mut self, x: f64, y: f64) {
        self.raw = (x, y);
    }

    pub fn is_at_rest(&self) -> bool {
        !self.active && self.held_keys.is_empty() && !self.scrolling
    }

    pub fn held_keys(&self) -> &[Key] {
        &self.held_keys
    }

    pub fn tick(&mut self, now: Instant, focus_held: bool) -> Vec<AnalogOutput> {
        if self.settings.mode == StickMode::Disabled {
            return Vec::new();
        }

        let (x, y) = self.raw;
        let y = if self.settings.invert_y { -y } else { y };
        let deadzone = self.settings.deadzone;
        let magnitude_sq = x * x + y * y;
        if magnitude_sq < deadzone * deadzone {
            if self.is_at_rest() {
                return Vec::new();
            }
            return self.come_to_rest();
        }

        let dt = self
            .last_tick
            .map(|prev| now.saturating_duration_since(prev).as_secs_f64().min(MAX_TICK_SECONDS))
            .unwrap_or(FIRST_TICK_SECONDS);
        self.last_tick = Some(now);
        self.active = true;

        let magnitude = magnitude_sq.sqrt();
        let normalized = ((magnitude - deadzone) / (1.0 - deadzone)).clamp(0.0, 1.0);
        let (ux, uy) = (x / magnitude, y / magnitude);

        match self.settings.mode {
            StickMode::DirectionKeys => self.update_direction_keys(ux, uy),
            StickMode::Pointer | StickMode::Scroll => {
                let multiplier = match self.settings.focus_modifier {
                    Some(_) => {
                        self.focus
                            .update(focus_held, self.settings.focus_multiplier, now, dt)
                    }
                    None => 1.0,
                };
                let speed = normalized.powf(self.settings.acceleration)
                    * self.settings.max_speed
                    * self.settings.sensitivity
                    * multiplier;
                // Screen coordinates grow downward
                let target = (ux * speed, -uy * speed);

                let cutoff = MIN_CUTOFF_HZ + (MAX_CUTOFF_HZ - MIN_CUTOFF_HZ) * normalized;
                let alpha = 1.0 - (-2.0 * PI * cutoff * dt).exp();
                self.filtered.0 += alpha * (target.0 - self.filtered.0);
                self.filtered.1 += alpha * (target.1 - self.filtered.1);

                let mut dx = self.filtered.0 * dt;
                let dy = self.filtered.1 * dt;
                if self.settings.mode == StickMode::Scroll {
                    if dy.abs() > dx.abs() * SCROLL_DOMINANCE {
                        dx = 0.0;
                        self.residual.0 = 0.0;
                    }
                    self.emit_scroll(dx, dy)
                } else {
                    self.emit_pointer(dx, dy)
                }
            }
            StickMode::Disabled => Vec::new(),
        }
    }

    fn emit_pointer(&mut self, dx: f64, dy: f64) -> Vec<AnalogOutput> {
        let px = whole_pixels(dx, &mut self.residual.0);
        let py = whole_pixels(dy, &mut self.residual.1);
        if px == 0.0 && py == 0.0 {
            return Vec::new();
        }
        vec![AnalogOutput::MovePointer { dx: px, dy: py }]
    }

    fn emit_scroll(&mut self, dx: f64, dy: f64) -> Vec<AnalogOutput> {
        let px = whole_pixels(dx, &mut self.residual.0);
        let py = whole_pixels(dy, &mut self.residual.1);
        if px == 0.0 && py == 0.0 {
            return Vec::new();
        }
        let phase = if self.scrolling {
            ScrollPhase::Changed
        } else {
            self.scrolling = true;
            ScrollPhase::Began
        };
        vec![AnalogOutput::Scroll {
            dx: px,
            dy: py,
            phase,
            momentum: MomentumPhase::None,
        }]
    }

    fn update_direction_keys(&mut self, ux: f64, uy: f64) -> Vec<AnalogOutput> {
        let [up, down, left, right] = self.settings.direction_layout.keys();
        let threshold = self.settings.diagonal_threshold;

        let mut wanted = Vec::with_capacity(2);
        if uy.abs() >= ux.abs() {
            wanted.push(if uy > 0.0 { up } else { down });
            if ux.abs() >= threshold {
                wanted.push(if ux > 0.0 { right } else { left });
            }
        } else {
            wanted.push(if ux > 0.0 { right } else { left });
            if uy.abs() >= threshold {
                wanted.push(if uy > 0.0 { up } else { down });
            }
        }

        let mut outputs = Vec::new();
        let (kept, released): (Vec<Key>, Vec<Key>) = std::mem::take(&mut self.held_keys)
            .into_iter()
            .partition(|key| wanted.contains(key));
        outputs.extend(released.into_iter().map(AnalogOutput::KeyUp));
        self.held_keys = kept;
        for key in wanted {
            if !self.held_keys.contains(&key) {
                self.held_keys.push(key);
                outputs.push(AnalogOutput::KeyDown(key));
            }
        }
        outputs
    }

    fn come_to_rest(&mut self) -> Vec<AnalogOutput> {
        debug!("Stick returned to deadzone");
        let mut outputs: Vec<AnalogOutput> = self
            .held_keys
            .drain(..)
            .map(AnalogOutput::KeyUp)
            .collect();
        if self.scrolling {
            outputs.push(AnalogOutput::Scroll {
                dx: 0.0,
                dy: 0.0,
                phase: ScrollPhase::Ended,
                momentum: MomentumPhase::None,
            });
        }
        self.scrolling = false;
        self.filtered = (0.0, 0.0);
        self.residual = (0.0, 0.0);
        self.last_tick = None;
        self.active = false;
        outputs
    }

    /// Releases held keys and ends an open scroll
    pub fn reset(&mut self) -> Vec<AnalogOutput> {
        self.raw = (0.0, 0.0);
        self.focus = FocusRamp::default();
        self.come_to_rest()
    }
}

/// Both sticks
#[derive(Debug, Clone)]
pub struct JoystickProcessor {
    left: StickProcessor,
    right: StickProcessor,
}

impl JoystickProcessor {
    pub fn new(settings: &JoystickSettings) -> Self {
        Self {
            left: StickProcessor::new(settings.left.clone()),
            right: StickProcessor::new(settings.right.clone()),
        }
    }

    pub fn set_stick(&mut self, stick: StickId, x: f64, y: f64) {
        match stick {
            StickId::Left => self.left.set_position(x, y),
            StickId::Right => self.right.set_position(x, y),
        }
    }

    pub fn stick(&self, stick: StickId) -> &StickProcessor {
        match stick {
            StickId::Left => &self.left,
            StickId::Right => &self.right,
        }
    }

    pub fn tick(&mut self, now: Instant, held_modifiers: &[ModifierKey]) -> Vec<AnalogOutput> {
        let mut outputs = Vec::new();
        for stick in [&mut self.left, &mut self.right] {
            let focus_held = stick
                .settings
                .focus_modifier
                .map(|modifier| held_modifiers.contains(&modifier))
                .unwrap_or(false);
            outputs.extend(stick.tick(now, focus_held));
        }
        outputs
    }

    pub fn reset(&mut self) -> Vec<AnalogOutput> {
        let mut outputs = self.left.reset();
        outputs.extend(self.right.reset());
        outputs
    }
}
