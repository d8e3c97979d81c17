//! Chord window accumulator

use super::GestureDetector;
use crate::controller::ButtonId;
use crate::mapping::ChordMapping;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordInput {
    Press(ButtonId),
    /// The capture window's deadline passed
    Expire,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChordOutcome {
    /// `chord` indexes the table the detector was built from
    Matched {
        chord: usize,
        buttons: BTreeSet<ButtonId>,
    },
    /// Captured buttons in ascending order, to be resolved one by one
    NoMatch(Vec<ButtonId>),
}

#[derive(Debug, Clone)]
pub struct ChordDetector {
    chords: Vec<BTreeSet<ButtonId>>,
    window: Duration,
    captured: BTreeSet<ButtonId>,
    opened_at: Option<Instant>,
}

impl ChordDetector {
    pub fn new(chords: &[ChordMapping], window: Duration) -> Self {
        Self {
            chords: chords.iter().map(ChordMapping::button_set).collect(),
            window,
            captured: BTreeSet::new(),
            opened_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|opened| opened + self.window)
    }

    pub fn is_captured(&self, button: ButtonId) -> bool {
        self.captured.contains(&button)
    }

    pub fn captured(&self) -> &BTreeSet<ButtonId> {
        &self.captured
    }

    fn exact_match(&self) -> Option<usize> {
        self.chords.iter().position(|chord| *chord == self.captured)
    }

    fn superset_possible(&self) -> bool {
        self.chords
            .iter()
            .any(|chord| chord.len() > self.captured.len() && chord.is_superset(&self.captured))
    }

    fn close(&mut self) -> BTreeSet<ButtonId> {
        self.opened_at = None;
        std::mem::take(&mut self.captured)
    }
}

impl GestureDetector for ChordDetector {
    type Input = ChordInput;
    type Output = ChordOutcome;

    fn process(&mut self, input: ChordInput, at: Instant) -> Option<ChordOutcome> {
        match input {
            ChordInput::Press(button) => {
                match self.opened_at {
                    None => {
                        debug!("Chord window opened by {}", button);
                        self.opened_at = Some(at);
                        self.captured.insert(button);
                        return None;
                    }
                    Some(opened) if at.saturating_duration_since(opened) > self.window => {
                        // Late press: the window is over even if expiry has not been fed yet
                        return None;
                    }
                    Some(_) => {
                        self.captured.insert(button);
                    }
                }

                let chord = self.exact_match()?;
                if self.superset_possible() {
                    debug!("Chord {} matched, waiting for a larger chord", chord);
                    return None;
                }
                let buttons = self.close();
                Some(ChordOutcome::Matched { chord, buttons })
            }
            ChordInput::Expire => {
                self.opened_at?;
                let matched = self.exact_match();
                let buttons = self.close();
                Some(match matched {
                    Some(chord) => ChordOutcome::Matched { chord, buttons },
                    None => ChordOutcome::NoMatch(buttons.into_iter().collect()),
                })
            }
        }
    }

    fn reset(&mut self) {
        self.close();
    }
}
