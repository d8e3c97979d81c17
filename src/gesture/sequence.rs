//! Ordered button sequences with per-step timeouts

use super::GestureDetector;
use crate::controller::ButtonId;
use crate::mapping::SequenceMapping;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct SequenceSpec {
    steps: Vec<ButtonId>,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    sequence: usize,
    next_step: usize,
    last_at: Instant,
}

/// Tracks every in-flight sequence independently.
///
/// Each step may arrive up to the sequence's step timeout plus `tolerance`
/// after the previous one; the tolerance is the chord window, so a step
/// that was briefly captured by a chord does not time the sequence out.
#[derive(Debug, Clone)]
pub struct SequenceDetector {
    sequences: Vec<SequenceSpec>,
    tolerance: Duration,
    in_flight: Vec<Progress>,
}

impl SequenceDetector {
    pub fn new(sequences: &[SequenceMapping], tolerance: Duration) -> Self {
        Self {
            sequences: sequences
                .iter()
                .map(|s| SequenceSpec {
                    steps: s.steps.clone(),
                    timeout: s.step_timeout(),
                })
                .collect(),
            tolerance,
            in_flight: Vec::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn within_timeout(&self, progress: &Progress, at: Instant) -> bool {
        let limit = self.sequences[progress.sequence].timeout + self.tolerance;
        at.saturating_duration_since(progress.last_at) <= limit
    }
}

impl GestureDetector for SequenceDetector {
    type Input = ButtonId;
    /// Indices of the sequences completed by this press
    type Output = Vec<usize>;

    fn process(&mut self, button: ButtonId, at: Instant) -> Option<Vec<usize>> {
        let mut completed = Vec::new();
        let mut kept = Vec::with_capacity(self.in_flight.len());

        for progress in std::mem::take(&mut self.in_flight) {
            if !self.within_timeout(&progress, at) {
                debug!("Sequence {} timed out", progress.sequence);
                continue;
            }
            let steps = &self.sequences[progress.sequence].steps;
            if steps[progress.next_step] != button {
                kept.push(progress);
                continue;
            }
            let advanced = Progress {
                next_step: progress.next_step + 1,
                last_at: at,
                ..progress
            };
            if advanced.next_step == steps.len() {
                completed.push(advanced.sequence);
            } else {
                kept.push(advanced);
            }
        }

        for (index, spec) in self.sequences.iter().enumerate() {
            if spec.steps.first() != Some(&button) {
                continue;
            }
            if spec.steps.len() == 1 {
                completed.push(index);
            } else {
                kept.push(Progress {
                    sequence: index,
                    next_step: 1,
                    last_at: at,
                });
            }
        }

        self.in_flight = kept;
        completed.sort_unstable();
        completed.dedup();
        if completed.is_empty() {
            None
        } else {
            debug!("Sequences completed: {:?}", completed);
            Some(completed)
        }
    }

    fn reset(&mut self) {
        self.in_flight.clear();
    }
}
