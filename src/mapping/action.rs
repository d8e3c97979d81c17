//! The common shape of everything that can be triggered.

use egui::{Key, Modifiers, PointerButton};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A key the output side can press: a keyboard key or a mouse button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputKey {
    Keyboard(Key),
    Mouse(PointerButton),
}

impl OutputKey {
    pub fn is_mouse(&self) -> bool {
        matches!(self, OutputKey::Mouse(_))
    }
}

impl Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKey::Keyboard(key) => write!(f, "{}", key.name()),
            OutputKey::Mouse(button) => write!(f, "Mouse {:?}", button),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModifierKey {
    Command,
    Control,
    Option,
    Shift,
}

impl ModifierKey {
    pub const ALL: [ModifierKey; 4] = [
        ModifierKey::Command,
        ModifierKey::Control,
        ModifierKey::Option,
        ModifierKey::Shift,
    ];

    pub fn to_modifiers(self) -> Modifiers {
        match self {
            ModifierKey::Command => Modifiers::COMMAND,
            ModifierKey::Control => Modifiers::CTRL,
            ModifierKey::Option => Modifiers::ALT,
            ModifierKey::Shift => Modifiers::SHIFT,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ModifierKey::Command => "⌘",
            ModifierKey::Control => "⌃",
            ModifierKey::Option => "⌥",
            ModifierKey::Shift => "⇧",
        }
    }
}

pub fn combine_modifiers(keys: &[ModifierKey]) -> Modifiers {
    keys.iter()
        .fold(Modifiers::NONE, |acc, key| acc.plus(key.to_modifiers()))
}

/// A key press with its modifier set
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyBinding {
    #[serde(default)]
    pub key: Option<OutputKey>,
    #[serde(default)]
    pub modifiers: Vec<ModifierKey>,
}

impl KeyBinding {
    pub fn key(key: Key) -> Self {
        Self {
            key: Some(OutputKey::Keyboard(key)),
            modifiers: Vec::new(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: &[ModifierKey]) -> Self {
        self.modifiers = modifiers.to_vec();
        self
    }

    pub fn modifiers(&self) -> Modifiers {
        combine_modifiers(&self.modifiers)
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.modifiers.is_empty()
    }
}

impl Display for KeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sorted = self.modifiers.clone();
        sorted.sort();
        sorted.dedup();
        for modifier in sorted {
            write!(f, "{}", modifier.symbol())?;
        }
        if let Some(key) = &self.key {
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

/// Reference to a system-level command; the mechanics live outside the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemCommandKind {
    Shell { command: String },
    LaunchApp { app: String },
    OpenLink { url: String },
    HttpRequest { method: String, url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemCommand {
    #[serde(flatten)]
    pub kind: SystemCommandKind,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl SystemCommand {
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        match &self.kind {
            SystemCommandKind::Shell { command } => format!("Shell: {}", command),
            SystemCommandKind::LaunchApp { app } => format!("Launch {}", app),
            SystemCommandKind::OpenLink { url } => format!("Open {}", url),
            SystemCommandKind::HttpRequest { method, url } => format!("{} {}", method, url),
        }
    }
}

/// Anything that can be triggered.
///
/// Several branches may be configured at once; they define a fallback order,
/// not multiple executions. See [`crate::action::ActionResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutableAction {
    #[serde(default)]
    pub system_command: Option<SystemCommand>,
    #[serde(default)]
    pub macro_id: Option<String>,
    #[serde(default)]
    pub script_id: Option<String>,
    #[serde(default)]
    pub key: Option<OutputKey>,
    #[serde(default)]
    pub modifiers: Vec<ModifierKey>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ExecutableAction {
    pub fn key(key: Key) -> Self {
        Self {
            key: Some(OutputKey::Keyboard(key)),
            ..Default::default()
        }
    }

    pub fn key_with(key: Key, modifiers: &[ModifierKey]) -> Self {
        Self {
            key: Some(OutputKey::Keyboard(key)),
            modifiers: modifiers.to_vec(),
            ..Default::default()
        }
    }

    pub fn mouse(button: PointerButton) -> Self {
        Self {
            key: Some(OutputKey::Mouse(button)),
            ..Default::default()
        }
    }

    pub fn modifiers_only(modifiers: &[ModifierKey]) -> Self {
        Self {
            modifiers: modifiers.to_vec(),
            ..Default::default()
        }
    }

    pub fn macro_ref(id: impl Into<String>) -> Self {
        Self {
            macro_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn script_ref(id: impl Into<String>) -> Self {
        Self {
            script_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn binding(&self) -> KeyBinding {
        KeyBinding {
            key: self.key,
            modifiers: self.modifiers.clone(),
        }
    }

    pub fn is_mouse_click(&self) -> bool {
        self.key.map(|key| key.is_mouse()).unwrap_or(false)
    }

    pub fn is_modifier_only(&self) -> bool {
        self.key.is_none() && !self.modifiers.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.system_command.is_none()
            && self.macro_id.is_none()
            && self.script_id.is_none()
            && self.key.is_none()
            && self.modifiers.is_empty()
            && self.hint.is_none()
    }
}
