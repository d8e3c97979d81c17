//! Momentary layer stack

use crate::controller::ButtonId;
use crate::mapping::{ButtonMapping, Profile};
use tracing::debug;

/// Active layer ids, most recently activated last
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerStack {
    active: Vec<String>,
}

impl LayerStack {
    /// Pushes `id`, or moves it back to the top if it is already active
    pub fn activate(&mut self, id: &str) {
        self.active.retain(|active| active != id);
        self.active.push(id.to_string());
        debug!("Layer '{}' active, stack {:?}", id, self.active);
    }

    pub fn deactivate(&mut self, id: &str) {
        self.active.retain(|active| active != id);
        debug!("Layer '{}' released, stack {:?}", id, self.active);
    }

    pub fn top(&self) -> Option<&str> {
        self.active.last().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    /// Effective mapping: the top layer when it maps `button`, the base table otherwise
    pub fn resolve<'p>(&self, profile: &'p Profile, button: ButtonId) -> Option<&'p ButtonMapping> {
        self.top()
            .and_then(|id| profile.layer(id))
            .and_then(|layer| layer.mapping(button))
            .or_else(|| profile.mapping(button))
    }
}
