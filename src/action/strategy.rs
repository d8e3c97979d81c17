//! Strategy dispatch from [`ExecutableAction`] to a [`ResolvedAction`].
//!
//! Every branch of the priority chain is its own [`ActionStrategy`]. The
//! resolver asks them in order and the first one that claims the action
//! wins, so an action with several branches configured still executes
//! exactly one of them.

use crate::mapping::{
    ExecutableAction, MacroDefinition, ModifierKey, OutputKey, Profile, ScriptDefinition,
    SystemCommand,
};
use std::fmt::Debug;
use tracing::{debug, warn};

/// The closed set of things an action can turn into
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAction {
    SystemCommand(SystemCommand),
    Macro(MacroDefinition),
    Script(ScriptDefinition),
    KeyPress {
        key: OutputKey,
        modifiers: Vec<ModifierKey>,
    },
    ModifierTap(Vec<ModifierKey>),
    /// Nothing to execute; the text is reported as feedback if present
    NoOp(Option<String>),
}

impl ResolvedAction {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolvedAction::SystemCommand(_) => "system command",
            ResolvedAction::Macro(_) => "macro",
            ResolvedAction::Script(_) => "script",
            ResolvedAction::KeyPress { .. } => "key press",
            ResolvedAction::ModifierTap(_) => "modifier tap",
            ResolvedAction::NoOp(_) => "no-op",
        }
    }
}

/// What a strategy may consult while resolving
pub struct ResolveContext<'a> {
    pub profile: &'a Profile,
    pub scripts_available: bool,
}

pub trait ActionStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// `None` passes the action on to the next strategy
    fn resolve(
        &self,
        action: &ExecutableAction,
        context: &ResolveContext<'_>,
    ) -> Option<ResolvedAction>;
}

fn hint_or(action: &ExecutableAction, fallback: &str) -> Option<String> {
    action
        .hint
        .clone()
        .or_else(|| Some(fallback.to_string()).filter(|text| !text.is_empty()))
}

#[derive(Debug, Default)]
pub struct SystemCommandStrategy;

impl ActionStrategy for SystemCommandStrategy {
    fn name(&self) -> &'static str {
        "system_command"
    }

    fn resolve(
        &self,
        action: &ExecutableAction,
        _context: &ResolveContext<'_>,
    ) -> Option<ResolvedAction> {
        action
            .system_command
            .clone()
            .map(ResolvedAction::SystemCommand)
    }
}

#[derive(Debug, Default)]
pub struct MacroStrategy;

impl ActionStrategy for MacroStrategy {
    fn name(&self) -> &'static str {
        "macro"
    }

    fn resolve(
        &self,
        action: &ExecutableAction,
        context: &ResolveContext<'_>,
    ) -> Option<ResolvedAction> {
        let id = action.macro_id.as_deref()?;
        match context.profile.macro_definition(id) {
            Some(definition) => Some(ResolvedAction::Macro(definition.clone())),
            None => {
                warn!(
                    "Macro '{}' not found in profile '{}', using hint text",
                    id, context.profile.name
                );
                Some(ResolvedAction::NoOp(hint_or(action, id)))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptStrategy;

impl ActionStrategy for ScriptStrategy {
    fn name(&self) -> &'static str {
        "script"
    }

    fn resolve(
        &self,
        action: &ExecutableAction,
        context: &ResolveContext<'_>,
    ) -> Option<ResolvedAction> {
        let id = action.script_id.as_deref()?;
        let Some(script) = context.profile.script(id) else {
            warn!(
                "Script '{}' not found in profile '{}', using hint text",
                id, context.profile.name
            );
            return Some(ResolvedAction::NoOp(hint_or(action, id)));
        };
        if !context.scripts_available {
            warn!("No script engine available for '{}', using hint text", id);
            return Some(ResolvedAction::NoOp(hint_or(action, &script.name)));
        }
        Some(ResolvedAction::Script(script.clone()))
    }
}

#[derive(Debug, Default)]
pub struct KeyPressStrategy;

impl ActionStrategy for KeyPressStrategy {
    fn name(&self) -> &'static str {
        "key_press"
    }

    fn resolve(
        &self,
        action: &ExecutableAction,
        _context: &ResolveContext<'_>,
    ) -> Option<ResolvedAction> {
        action.key.map(|key| ResolvedAction::KeyPress {
            key,
            modifiers: action.modifiers.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct ModifierTapStrategy;

impl ActionStrategy for ModifierTapStrategy {
    fn name(&self) -> &'static str {
        "modifier_tap"
    }

    fn resolve(
        &self,
        action: &ExecutableAction,
        _context: &ResolveContext<'_>,
    ) -> Option<ResolvedAction> {
        if action.modifiers.is_empty() {
            return None;
        }
        Some(ResolvedAction::ModifierTap(action.modifiers.clone()))
    }
}

#[derive(Debug, Default)]
pub struct NoOpStrategy;

impl ActionStrategy for NoOpStrategy {
    fn name(&self) -> &'static str {
        "no_op"
    }

    fn resolve(
        &self,
        action: &ExecutableAction,
        _context: &ResolveContext<'_>,
    ) -> Option<ResolvedAction> {
        Some(ResolvedAction::NoOp(action.hint.clone()))
    }
}

/// Ordered strategy chain
#[derive(Debug)]
pub struct ActionResolver {
    strategies: Vec<Box<dyn ActionStrategy>>,
}

impl Default for ActionResolver {
    fn default() -> Self {
        Self::standard()
    }
}

impl ActionResolver {
    /// System command, macro, script, key press, modifier tap, no-op
    pub fn standard() -> Self {
        Self {
            strategies: vec![
                Box::new(SystemCommandStrategy),
                Box::new(MacroStrategy),
                Box::new(ScriptStrategy),
                Box::new(KeyPressStrategy),
                Box::new(ModifierTapStrategy),
                Box::new(NoOpStrategy),
            ],
        }
    }

    /// Adds a strategy in front of the given position, or at the end
    pub fn insert(&mut self, index: usize, strategy: Box<dyn ActionStrategy>) {
        let index = index.min(self.strategies.len());
        self.strategies.insert(index, strategy);
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn resolve(&self, action: &ExecutableAction, context: &ResolveContext<'_>) -> ResolvedAction {
        for strategy in &self.strategies {
            if let Some(resolved) = strategy.resolve(action, context) {
                debug!("Action claimed by {} strategy", strategy.name());
                return resolved;
            }
        }
        ResolvedAction::NoOp(action.hint.clone())
    }
}
