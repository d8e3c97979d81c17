//! Engine runtime with statum lifecycle
//!
//! Runs the two input queues as tokio tasks around one shared [`Engine`].
//!
//! # State Machine
//!
//! ```text
//! Configured ──► Active ──► Stopped
//! ```
//!
//! # Queues
//!
//! ```text
//! discrete channel ──► discrete task: events in arrival order, fires due tasks
//!                        ▲ sleeps until Engine::next_deadline or a schedule change
//! analog channel   ──► analog task: drains samples each tick, then polls processors
//! ```

use super::Engine;
use crate::config::RuntimeSettings;
use crate::controller::InputEvent;
use crate::mapping::{MappingError, Profile};
use statum::{machine, state};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Runtime was already started")]
    AlreadyStarted,

    #[error("Engine task panicked: {0}")]
    TaskPanicked(String),

    #[error("Profile rejected: {0}")]
    Profile(#[from] MappingError),
}

#[state]
#[derive(Debug, Clone)]
pub enum RuntimeState {
    Configured, // Channels wired, nothing running
    Active,     // Both queues running
    Stopped,    // Queues joined, engine reset
}

#[machine]
pub struct EngineRuntime<S: RuntimeState> {
    engine: Arc<Engine>,
    settings: RuntimeSettings,
    token: CancellationToken,
    discrete_rx: Option<mpsc::Receiver<InputEvent>>,
    analog_rx: Option<mpsc::Receiver<InputEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: RuntimeState> EngineRuntime<S> {
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

impl EngineRuntime<Configured> {
    pub fn create(
        engine: Arc<Engine>,
        settings: RuntimeSettings,
        token: CancellationToken,
        discrete_rx: mpsc::Receiver<InputEvent>,
        analog_rx: mpsc::Receiver<InputEvent>,
    ) -> Self {
        info!(
            "Configuring engine runtime, analog poll at {} Hz",
            settings.analog_poll_hz
        );
        Self::new(
            engine,
            settings,
            token,
            Some(discrete_rx),
            Some(analog_rx),
            Vec::new(),
        )
    }

    /// Spawns the discrete and analog queues
    pub fn activate(mut self) -> Result<EngineRuntime<Active>, RuntimeError> {
        let discrete_rx = self.discrete_rx.take().ok_or(RuntimeError::AlreadyStarted)?;
        let analog_rx = self.analog_rx.take().ok_or(RuntimeError::AlreadyStarted)?;

        self.tasks.push(tokio::spawn(run_discrete_queue(
            self.engine.clone(),
            discrete_rx,
            self.token.clone(),
        )));
        self.tasks.push(tokio::spawn(run_analog_queue(
            self.engine.clone(),
            analog_rx,
            self.settings.analog_period(),
            self.token.clone(),
        )));

        info!("Engine runtime active");
        Ok(self.transition())
    }
}

impl EngineRuntime<Active> {
    /// Cancels both queues, waits for them and releases all held output
    pub async fn stop(mut self) -> Result<EngineRuntime<Stopped>, RuntimeError> {
        debug!("Stopping engine runtime");
        self.token.cancel();

        let mut result = Ok(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Engine task panicked: {}", e);
                result = Err(RuntimeError::TaskPanicked(e.to_string()));
            }
        }

        self.engine.set_enabled(false);
        result?;
        info!("Engine runtime stopped");
        Ok(self.transition())
    }
}

impl EngineRuntime<Stopped> {}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}

async fn run_discrete_queue(
    engine: Arc<Engine>,
    mut discrete_rx: mpsc::Receiver<InputEvent>,
    token: CancellationToken,
) {
    info!("Discrete queue running");
    loop {
        let deadline = engine.next_deadline();
        tokio::select! {
            _ = token.cancelled() => break,
            event = discrete_rx.recv() => match event {
                Some(event) => engine.handle_input(event),
                None => {
                    warn!("Discrete channel closed, stopping discrete queue");
                    break;
                }
            },
            _ = sleep_until(deadline) => engine.run_due(engine.now()),
            _ = engine.schedule_changed().notified() => {}
        }
    }
    info!("Discrete queue finished");
}

async fn run_analog_queue(
    engine: Arc<Engine>,
    mut analog_rx: mpsc::Receiver<InputEvent>,
    period: Duration,
    token: CancellationToken,
) {
    info!("Analog queue running every {:?}", period);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                loop {
                    match analog_rx.try_recv() {
                        Ok(event) => engine.handle_input(event),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            warn!("Analog channel closed, stopping analog queue");
                            return;
                        }
                    }
                }
                engine.poll_analog(engine.now());
            }
        }
    }
    info!("Analog queue finished");
}

/// Owns a running [`EngineRuntime`] and the senders that feed it
pub struct EngineHandle {
    engine: Arc<Engine>,
    discrete_tx: mpsc::Sender<InputEvent>,
    analog_tx: mpsc::Sender<InputEvent>,
    runtime: Option<EngineRuntime<Active>>,
}

impl EngineHandle {
    /// Creates the input channels and starts both queues; time comes from
    /// [`Engine::clock`]
    pub fn start(
        engine: Arc<Engine>,
        settings: RuntimeSettings,
        token: CancellationToken,
    ) -> Result<Self, RuntimeError> {
        let (discrete_tx, discrete_rx) = mpsc::channel(settings.discrete_capacity.max(1));
        let (analog_tx, analog_rx) = mpsc::channel(settings.analog_capacity.max(1));

        let runtime = EngineRuntime::create(
            engine.clone(),
            settings,
            token,
            discrete_rx,
            analog_rx,
        )
        .activate()?;

        Ok(Self {
            engine,
            discrete_tx,
            analog_tx,
            runtime: Some(runtime),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Sender for button edges
    pub fn input_sender(&self) -> mpsc::Sender<InputEvent> {
        self.discrete_tx.clone()
    }

    /// Sender for stick, touchpad and motion samples
    pub fn analog_sender(&self) -> mpsc::Sender<InputEvent> {
        self.analog_tx.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.engine.set_enabled(enabled);
    }

    pub fn set_locked(&self, locked: bool) {
        self.engine.set_locked(locked);
    }

    pub fn switch_profile(&self, profile: Profile) -> Result<(), RuntimeError> {
        Ok(self.engine.switch_profile(profile)?)
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Stops both queues; held keys and modifiers are released
    pub async fn shutdown(&mut self) -> Result<(), RuntimeError> {
        match self.runtime.take() {
            Some(runtime) => {
                runtime.stop().await?;
                Ok(())
            }
            None => {
                debug!("Engine runtime already shut down");
                Ok(())
            }
        }
    }
}
