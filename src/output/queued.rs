//! Dedicated output queues
//!
//! Keyboard output and pointer output each get their own tokio task, so a
//! long macro never stalls pointer motion and a burst of scroll deltas never
//! delays a key release.
//!
//! Keyboard commands are never dropped: every key-down has its key-up queued
//! behind it. Only pointer deltas are shed once `capacity` of them are
//! waiting; phase boundaries (scroll began/ended, magnify began/ended) always
//! go through.
//!
//! ```text
//! Engine ──► QueuedSink ──┬──► keyboard queue ──► inner sink
//!                         └──► pointer queue  ──► inner sink
//! ```

use super::{MagnifyPhase, MomentumPhase, OutputCommand, OutputSink, ScrollPhase};
use crate::mapping::{MacroDefinition, ModifierKey, OutputKey, SystemCommand};
use egui::Modifiers;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// [`OutputSink`] that forwards every call onto one of two queues
pub struct QueuedSink {
    keyboard_tx: mpsc::UnboundedSender<OutputCommand>,
    pointer_tx: mpsc::UnboundedSender<OutputCommand>,
    /// Pointer deltas queued but not yet applied
    pending_deltas: Arc<AtomicUsize>,
    capacity: usize,
}

/// The worker tasks behind a [`QueuedSink`]
pub struct OutputQueues {
    keyboard_task: Option<JoinHandle<()>>,
    pointer_task: Option<JoinHandle<()>>,
    token: CancellationToken,
}

impl QueuedSink {
    /// Spawns both output workers around `inner`. Must be called inside a tokio runtime.
    pub fn spawn(
        inner: Arc<dyn OutputSink>,
        capacity: usize,
        token: CancellationToken,
    ) -> (Self, OutputQueues) {
        let (keyboard_tx, keyboard_rx) = mpsc::unbounded_channel();
        let (pointer_tx, pointer_rx) = mpsc::unbounded_channel();
        let pending_deltas = Arc::new(AtomicUsize::new(0));

        let keyboard_task = tokio::spawn(run_queue(
            "keyboard",
            keyboard_rx,
            inner.clone(),
            pending_deltas.clone(),
            token.clone(),
        ));
        let pointer_task = tokio::spawn(run_queue(
            "pointer",
            pointer_rx,
            inner,
            pending_deltas.clone(),
            token.clone(),
        ));

        info!("Output queues started, pointer deltas capped at {}", capacity);
        (
            Self {
                keyboard_tx,
                pointer_tx,
                pending_deltas,
                capacity: capacity.max(1),
            },
            OutputQueues {
                keyboard_task: Some(keyboard_task),
                pointer_task: Some(pointer_task),
                token,
            },
        )
    }

    fn enqueue(&self, command: OutputCommand) {
        if !command.is_pointer() {
            if self.keyboard_tx.send(command).is_err() {
                debug!("keyboard queue closed");
            }
            return;
        }

        let droppable = command.is_droppable_delta();
        if droppable {
            if self.pending_deltas.load(Ordering::Acquire) >= self.capacity {
                warn!("pointer queue full, dropping {:?}", command);
                return;
            }
            self.pending_deltas.fetch_add(1, Ordering::AcqRel);
        }
        if self.pointer_tx.send(command).is_err() {
            if droppable {
                self.pending_deltas.fetch_sub(1, Ordering::AcqRel);
            }
            debug!("pointer queue closed");
        }
    }
}

async fn run_queue(
    name: &'static str,
    mut rx: mpsc::UnboundedReceiver<OutputCommand>,
    sink: Arc<dyn OutputSink>,
    pending_deltas: Arc<AtomicUsize>,
    token: CancellationToken,
) {
    debug!("Output queue '{}' running", name);
    let apply = |command: OutputCommand| {
        if command.is_droppable_delta() {
            pending_deltas.fetch_sub(1, Ordering::AcqRel);
        }
        command.apply(sink.as_ref());
    };
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => apply(command),
                None => break,
            },
        }
    }
    // Whatever is still queued goes out so no key-up is lost
    while let Ok(command) = rx.try_recv() {
        apply(command);
    }
    debug!("Output queue '{}' finished", name);
}

impl OutputQueues {
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        for (name, task) in [
            ("keyboard", self.keyboard_task.take()),
            ("pointer", self.pointer_task.take()),
        ] {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    error!("Output queue '{}' panicked: {}", name, e);
                }
            }
        }
    }
}

impl OutputSink for QueuedSink {
    fn key_down(&self, key: OutputKey, modifiers: Modifiers) {
        self.enqueue(OutputCommand::KeyDown(key, modifiers));
    }

    fn key_up(&self, key: OutputKey, modifiers: Modifiers) {
        self.enqueue(OutputCommand::KeyUp(key, modifiers));
    }

    fn hold_modifier(&self, modifier: ModifierKey) {
        self.enqueue(OutputCommand::HoldModifier(modifier));
    }

    fn release_modifier(&self, modifier: ModifierKey) {
        self.enqueue(OutputCommand::ReleaseModifier(modifier));
    }

    fn move_pointer(&self, dx: f64, dy: f64) {
        self.enqueue(OutputCommand::MovePointer { dx, dy });
    }

    fn scroll(&self, dx: f64, dy: f64, phase: ScrollPhase, momentum: MomentumPhase) {
        self.enqueue(OutputCommand::Scroll {
            dx,
            dy,
            phase,
            momentum,
        });
    }

    fn magnify(&self, amount: f64, phase: MagnifyPhase) {
        self.enqueue(OutputCommand::Magnify { amount, phase });
    }

    fn run_macro(&self, definition: &MacroDefinition) {
        self.enqueue(OutputCommand::RunMacro(definition.clone()));
    }

    fn run_system_command(&self, command: &SystemCommand) {
        self.enqueue(OutputCommand::RunSystemCommand(command.clone()));
    }
}
