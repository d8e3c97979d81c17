//! Turns resolved actions into output calls and feedback text

use super::strategy::{ActionResolver, ResolveContext, ResolvedAction};
use crate::mapping::{
    combine_modifiers, ExecutableAction, KeyBinding, ModifierKey, OutputKey, Profile,
};
use crate::output::{KeyboardObserver, OutputSink, ScriptEngine};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Feedback text for any failed script run
pub const SCRIPT_ERROR_FEEDBACK: &str = "Script error";

/// Work an execution leaves behind for the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    ReleaseModifiers(Vec<ModifierKey>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub kind: &'static str,
    pub feedback: Option<String>,
    pub follow_up: Option<FollowUp>,
}

/// Reference counts per modifier so overlapping holds share one key-down
#[derive(Debug, Default)]
pub struct ModifierTracker {
    counts: Mutex<BTreeMap<ModifierKey, usize>>,
}

impl ModifierTracker {
    pub fn hold(&self, sink: &dyn OutputSink, modifiers: &[ModifierKey]) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        for modifier in dedup(modifiers) {
            let count = counts.entry(modifier).or_insert(0);
            *count += 1;
            if *count == 1 {
                sink.hold_modifier(modifier);
            }
        }
    }

    pub fn release(&self, sink: &dyn OutputSink, modifiers: &[ModifierKey]) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        for modifier in dedup(modifiers) {
            match counts.get_mut(&modifier) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    counts.remove(&modifier);
                    sink.release_modifier(modifier);
                }
                None => debug!("Release of modifier {:?} that is not held", modifier),
            }
        }
    }

    pub fn release_all(&self, sink: &dyn OutputSink) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        for (modifier, _) in std::mem::take(&mut *counts) {
            sink.release_modifier(modifier);
        }
    }

    pub fn held(&self) -> Vec<ModifierKey> {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

fn dedup(modifiers: &[ModifierKey]) -> Vec<ModifierKey> {
    let mut unique = modifiers.to_vec();
    unique.sort();
    unique.dedup();
    unique
}

pub struct ActionExecutor {
    resolver: ActionResolver,
    sink: Arc<dyn OutputSink>,
    modifiers: ModifierTracker,
    script_engine: Option<Arc<dyn ScriptEngine>>,
    keyboard_observer: Option<Arc<dyn KeyboardObserver>>,
}

impl ActionExecutor {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            resolver: ActionResolver::standard(),
            sink,
            modifiers: ModifierTracker::default(),
            script_engine: None,
            keyboard_observer: None,
        }
    }

    pub fn with_resolver(mut self, resolver: ActionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_script_engine(mut self, engine: Arc<dyn ScriptEngine>) -> Self {
        self.script_engine = Some(engine);
        self
    }

    pub fn with_keyboard_observer(mut self, observer: Arc<dyn KeyboardObserver>) -> Self {
        self.keyboard_observer = Some(observer);
        self
    }

    pub fn sink(&self) -> &dyn OutputSink {
        self.sink.as_ref()
    }

    pub fn held_modifiers(&self) -> Vec<ModifierKey> {
        self.modifiers.held()
    }

    /// Runs exactly one branch of `action` and reports what happened.
    ///
    /// Never fails: unresolvable references and script errors degrade to
    /// feedback text.
    pub fn execute(&self, action: &ExecutableAction, profile: &Profile) -> Execution {
        let context = ResolveContext {
            profile,
            scripts_available: self.script_engine.is_some(),
        };
        let resolved = self.resolver.resolve(action, &context);
        let kind = resolved.kind();

        let (feedback, follow_up) = match resolved {
            ResolvedAction::SystemCommand(command) => {
                self.sink.run_system_command(&command);
                let text = command
                    .display_name
                    .clone()
                    .or_else(|| action.hint.clone())
                    .unwrap_or_else(|| command.display_name());
                (Some(text), None)
            }
            ResolvedAction::Macro(definition) => {
                self.sink.run_macro(&definition);
                (Some(action.hint.clone().unwrap_or(definition.name)), None)
            }
            ResolvedAction::Script(script) => {
                let text = match self.script_engine.as_ref().map(|engine| engine.run(&script)) {
                    Some(Ok(Some(text))) => text,
                    Some(Ok(None)) => action.hint.clone().unwrap_or(script.name),
                    Some(Err(e)) => {
                        warn!("Script '{}' failed: {}", script.id, e);
                        SCRIPT_ERROR_FEEDBACK.to_string()
                    }
                    None => action.hint.clone().unwrap_or(script.name),
                };
                (Some(text), None)
            }
            ResolvedAction::KeyPress { key, modifiers } => {
                let mods = combine_modifiers(&modifiers);
                self.sink.tap(key, mods);
                if let Some(observer) = &self.keyboard_observer {
                    observer.key_pressed(key, mods);
                }
                let label = KeyBinding {
                    key: Some(key),
                    modifiers,
                }
                .to_string();
                (Some(action.hint.clone().unwrap_or(label)), None)
            }
            ResolvedAction::ModifierTap(modifiers) => {
                self.modifiers.hold(self.sink.as_ref(), &modifiers);
                let label = KeyBinding {
                    key: None,
                    modifiers: modifiers.clone(),
                }
                .to_string();
                (
                    Some(action.hint.clone().unwrap_or(label)),
                    Some(FollowUp::ReleaseModifiers(modifiers)),
                )
            }
            ResolvedAction::NoOp(text) => (text, None),
        };

        debug!(
            "Executed {}: {}",
            kind,
            feedback.as_deref().unwrap_or("(no feedback)")
        );
        Execution {
            kind,
            feedback,
            follow_up,
        }
    }

    /// Starts a continuously simulated hold of `action`'s key and modifiers
    pub fn begin_hold(&self, action: &ExecutableAction) {
        self.modifiers.hold(self.sink.as_ref(), &action.modifiers);
        if let Some(key) = action.key {
            let mods = combine_modifiers(&action.modifiers);
            self.sink.key_down(key, mods);
            if let Some(observer) = &self.keyboard_observer {
                observer.key_pressed(key, mods);
            }
        }
    }

    pub fn end_hold(&self, action: &ExecutableAction) {
        if let Some(key) = action.key {
            self.sink.key_up(key, combine_modifiers(&action.modifiers));
        }
        self.modifiers.release(self.sink.as_ref(), &action.modifiers);
    }

    pub fn release_modifiers(&self, modifiers: &[ModifierKey]) {
        self.modifiers.release(self.sink.as_ref(), modifiers);
    }

    /// Releases every modifier regardless of how many holds reference it
    pub fn release_all_modifiers(&self) {
        self.modifiers.release_all(self.sink.as_ref());
    }

    pub fn key_down(&self, key: OutputKey) {
        self.sink.key_down(key, egui::Modifiers::NONE);
    }

    pub fn key_up(&self, key: OutputKey) {
        self.sink.key_up(key, egui::Modifiers::NONE);
    }
}
