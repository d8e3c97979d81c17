//! Cancellable deferred tasks
//!
//! Long-hold, repeat, deferred single taps, the chord window and modifier
//! tap releases are all entries in one deadline-ordered queue. Nothing
//! sleeps: the runtime asks for [`Scheduler::next_deadline`] and the engine
//! pops whatever is due. Cancellation flips a flag on the shared handle and
//! the entry is dropped the next time the queue reaches it.

use crate::controller::ButtonId;
use crate::mapping::ModifierKey;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    LongHold { button: ButtonId },
    Repeat { button: ButtonId },
    DeferredTap { button: ButtonId },
    ChordWindow,
    ModifierRelease { modifiers: Vec<ModifierKey> },
}

#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Entry {
    task: Task,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BTreeMap<(Instant, u64), Entry>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, task: Task) -> TaskHandle {
        let id = self.next_id;
        self.next_id += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.queue.insert(
            (at, id),
            Entry {
                task,
                cancelled: cancelled.clone(),
            },
        );
        TaskHandle { id, cancelled }
    }

    fn prune_cancelled_head(&mut self) {
        while let Some(entry) = self.queue.first_entry() {
            if !entry.get().cancelled.load(Ordering::SeqCst) {
                break;
            }
            entry.remove();
        }
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.prune_cancelled_head();
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Removes and returns the earliest live task due at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<(Instant, Task)> {
        self.prune_cancelled_head();
        let entry = self.queue.first_entry()?;
        let (at, _) = *entry.key();
        if at > now {
            return None;
        }
        let entry = entry.remove();
        entry.cancelled.store(true, Ordering::SeqCst);
        Some((at, entry.task))
    }

    /// Cancels everything; returns the tasks that were still live
    pub fn cancel_all(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.queue)
            .into_values()
            .filter(|entry| !entry.cancelled.swap(true, Ordering::SeqCst))
            .map(|entry| entry.task)
            .collect()
    }

    pub fn live_tasks(&self) -> usize {
        self.queue
            .values()
            .filter(|entry| !entry.cancelled.load(Ordering::SeqCst))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tasks_come_out_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        scheduler.schedule(t0 + Duration::from_millis(300), Task::ChordWindow);
        scheduler.schedule(
            t0 + Duration::from_millis(100),
            Task::LongHold {
                button: ButtonId::A,
            },
        );
        assert_eq!(
            scheduler.next_deadline(),
            Some(t0 + Duration::from_millis(100))
        );
        assert_eq!(scheduler.pop_due(t0 + Duration::from_millis(50)), None);
        assert_eq!(
            scheduler.pop_due(t0 + Duration::from_millis(400)),
            Some((
                t0 + Duration::from_millis(100),
                Task::LongHold {
                    button: ButtonId::A
                }
            ))
        );
        assert_eq!(
            scheduler.pop_due(t0 + Duration::from_millis(400)),
            Some((t0 + Duration::from_millis(300), Task::ChordWindow))
        );
    }

    #[test]
    fn cancelled_tasks_never_fire() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        let handle = scheduler.schedule(
            t0,
            Task::DeferredTap {
                button: ButtonId::B,
            },
        );
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(scheduler.pop_due(t0 + Duration::from_secs(1)), None);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn same_deadline_keeps_insertion_order() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        scheduler.schedule(t0, Task::Repeat { button: ButtonId::X });
        scheduler.schedule(t0, Task::Repeat { button: ButtonId::Y });
        assert_eq!(
            scheduler.pop_due(t0).map(|(_, task)| task),
            Some(Task::Repeat { button: ButtonId::X })
        );
    }

    #[test]
    fn cancel_all_returns_live_tasks_only() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        let dead = scheduler.schedule(t0, Task::ChordWindow);
        scheduler.schedule(
            t0,
            Task::ModifierRelease {
                modifiers: vec![ModifierKey::Shift],
            },
        );
        dead.cancel();
        assert_eq!(
            scheduler.cancel_all(),
            vec![Task::ModifierRelease {
                modifiers: vec![ModifierKey::Shift]
            }]
        );
        assert_eq!(scheduler.live_tasks(), 0);
    }
}
