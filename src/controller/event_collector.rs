use crate::controller::{ButtonId, InputEvent, InputSource, StickId};
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, error, info, warn};

// Collector settings
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    /// Axis values below this magnitude are reported as exactly zero
    pub noise_floor: f64,
    /// Index into the connected gamepad list; falls back to the first pad
    pub gamepad_index: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            noise_floor: 0.02,
            gamepad_index: 0,
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to collect events: {0}")]
    EventCollectionError(String),

    #[error("Failed to send event: {0}")]
    EventSendError(String),

    #[error("No gamepad connected: {0}")]
    NoGamepadError(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
pub struct EventCollector<S: CollectionState> {
    gilrs: Gilrs,

    active_gamepad: Option<GamepadId>,

    settings: CollectorSettings,

    // Press instants, used to report hold durations on release
    press_times: HashMap<ButtonId, Instant>,

    // Last seen stick values; gilrs reports one axis per event
    left_stick: (f64, f64),
    right_stick: (f64, f64),

    // Synthesized events waiting to be handed out
    pending: VecDeque<InputEvent>,

    name: String,
}

impl<S: CollectionState> EventCollector<S> {
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }
}

impl EventCollector<Initializing> {
    pub fn create(settings: Option<CollectorSettings>) -> Result<Self, CollectorError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating Event Collector with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(
            gilrs,
            None,
            settings,
            HashMap::new(),
            (0.0, 0.0),
            (0.0, 0.0),
            VecDeque::new(),
            "gilrs".to_string(),
        ))
    }

    // Select the active gamepad and transition to Collecting state
    pub fn initialize(mut self) -> Result<EventCollector<Collecting>, CollectorError> {
        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, continuing in idle mode");
        } else {
            info!("Found {} gamepads:", gamepads.len());
            for (idx, (id, gamepad)) in gamepads.iter().enumerate() {
                info!(
                    "  [{}] ID: {}, Name: {}, UUID: {:?}",
                    idx,
                    id,
                    gamepad.name(),
                    gamepad.uuid()
                );
            }
            let index = if self.settings.gamepad_index < gamepads.len() {
                self.settings.gamepad_index
            } else {
                warn!(
                    "Gamepad index {} out of range, using first gamepad",
                    self.settings.gamepad_index
                );
                0
            };
            let (id, gamepad) = &gamepads[index];
            self.active_gamepad = Some(*id);
            self.name = gamepad.name().to_string();
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        info!("Event Collector initialized, transitioning to Collecting state");
        Ok(self.transition())
    }
}

impl EventCollector<Collecting> {
    // Convert gilrs event to the normalized input vocabulary
    fn convert_gilrs_event(&mut self, event: EventType) -> Option<InputEvent> {
        let now = Instant::now();

        match event {
            EventType::AxisChanged(axis, value, _) => {
                let value = apply_noise_floor(value as f64, self.settings.noise_floor);
                match axis {
                    Axis::LeftStickX => {
                        self.left_stick.0 = value;
                        Some(stick_event(StickId::Left, self.left_stick, now))
                    }
                    Axis::LeftStickY => {
                        self.left_stick.1 = value;
                        Some(stick_event(StickId::Left, self.left_stick, now))
                    }
                    Axis::RightStickX => {
                        self.right_stick.0 = value;
                        Some(stick_event(StickId::Right, self.right_stick, now))
                    }
                    Axis::RightStickY => {
                        self.right_stick.1 = value;
                        Some(stick_event(StickId::Right, self.right_stick, now))
                    }
                    _ => {
                        debug!("Ignoring unsupported axis: {:?}", axis);
                        None
                    }
                }
            }
            EventType::ButtonPressed(button, _) => map_button(button).map(|button| {
                debug!("Button pressed: {:?}", button);
                self.press_times.insert(button, now);
                InputEvent::ButtonDown { button, at: now }
            }),
            EventType::ButtonReleased(button, _) => map_button(button).map(|button| {
                let held = self
                    .press_times
                    .remove(&button)
                    .map(|pressed| now.saturating_duration_since(pressed));
                debug!("Button released: {:?} after {:?}", button, held);
                InputEvent::ButtonUp {
                    button,
                    at: now,
                    held,
                }
            }),
            EventType::ButtonRepeated(button, _) => {
                debug!("Button repeat ignored: {:?}", button);
                None
            }
            EventType::Connected => {
                info!("Controller connected event detected");
                None
            }
            EventType::Disconnected => {
                warn!("Controller disconnected event detected");
                // Synthesize releases so nothing stays held on the engine side
                let mut held: Vec<(ButtonId, Instant)> = self.press_times.drain().collect();
                held.sort_by_key(|(button, _)| *button);
                for (button, pressed) in held {
                    self.pending.push_back(InputEvent::ButtonUp {
                        button,
                        at: now,
                        held: Some(now.saturating_duration_since(pressed)),
                    });
                }
                self.left_stick = (0.0, 0.0);
                self.right_stick = (0.0, 0.0);
                self.pending
                    .push_back(stick_event(StickId::Left, self.left_stick, now));
                self.pending
                    .push_back(stick_event(StickId::Right, self.right_stick, now));
                self.pending.pop_front()
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
                None
            }
        }
    }
}

impl InputSource for EventCollector<Collecting> {
    fn poll_event(&mut self) -> Result<Option<InputEvent>, CollectorError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        let Some(Event { id, event, .. }) = self.gilrs.next_event() else {
            return Ok(None);
        };

        if let Some(active_id) = self.active_gamepad {
            if id != active_id {
                debug!("Skipping event from non-active gamepad: {:?}", id);
                return Ok(None);
            }
        } else {
            info!("Adopting gamepad {:?} as active", id);
            self.active_gamepad = Some(id);
        }

        Ok(self.convert_gilrs_event(event))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn stick_event(stick: StickId, (x, y): (f64, f64), at: Instant) -> InputEvent {
    InputEvent::Stick { stick, x, y, at }
}

// Helper function to map gilrs Button to our ButtonId
fn map_button(button: Button) -> Option<ButtonId> {
    match button {
        Button::South => Some(ButtonId::A),
        Button::East => Some(ButtonId::B),
        Button::West => Some(ButtonId::X),
        Button::North => Some(ButtonId::Y),
        Button::Start => Some(ButtonId::Menu),
        Button::Select => Some(ButtonId::View),
        Button::Mode => Some(ButtonId::Xbox),
        Button::LeftTrigger => Some(ButtonId::LeftBumper),
        Button::RightTrigger => Some(ButtonId::RightBumper),
        Button::LeftTrigger2 => Some(ButtonId::LeftTrigger),
        Button::RightTrigger2 => Some(ButtonId::RightTrigger),
        Button::LeftThumb => Some(ButtonId::LeftThumbstick),
        Button::RightThumb => Some(ButtonId::RightThumbstick),
        Button::DPadUp => Some(ButtonId::DpadUp),
        Button::DPadDown => Some(ButtonId::DpadDown),
        Button::DPadLeft => Some(ButtonId::DpadLeft),
        Button::DPadRight => Some(ButtonId::DpadRight),
        _ => None,
    }
}

fn apply_noise_floor(value: f64, floor: f64) -> f64 {
    if value.abs() < floor {
        0.0
    } else {
        value
    }
}
