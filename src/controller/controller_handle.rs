//! Controller Handle - input thread lifecycle and channel split
//!
//! Owns the dedicated input thread that polls an [`InputSource`] and routes
//! its events: button edges onto the discrete channel (never dropped,
//! strict arrival order) and analog samples onto the analog channel
//! (dropped under back-pressure, the next sample supersedes them anyway).

use super::event_collector::{CollectorError, CollectorSettings, EventCollector};
use super::{InputEvent, InputSource};
use serde::{Deserialize, Serialize};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the input thread
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Sleep between empty polls of the input source
    pub poll_interval_us: u64,

    /// Axis values below this magnitude are reported as zero by the collector
    pub noise_floor: f64,

    /// Which connected gamepad to listen to
    pub gamepad_index: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval_us: 500,
            noise_floor: 0.02,
            gamepad_index: 0,
        }
    }
}

/// Errors that can occur during controller initialization or operation
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Collector error: {0}")]
    CollectorError(#[from] CollectorError),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

/// Handle for the input thread
///
/// Dropping the handle does not stop the thread; call [`ControllerHandle::shutdown`].
pub struct ControllerHandle {
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
    source_name: String,
}

impl ControllerHandle {
    /// Spawns the gilrs-backed input thread
    pub fn spawn(
        settings: Option<ControllerSettings>,
        discrete_tx: mpsc::Sender<InputEvent>,
        analog_tx: mpsc::Sender<InputEvent>,
        token: CancellationToken,
    ) -> Result<Self, ControllerError> {
        let settings = settings.unwrap_or_default();
        info!("Initializing Controller system with settings: {:?}", settings);

        let collector_settings = CollectorSettings {
            noise_floor: settings.noise_floor,
            gamepad_index: settings.gamepad_index,
        };

        Self::spawn_with_source(
            move || EventCollector::create(Some(collector_settings))?.initialize(),
            Duration::from_micros(settings.poll_interval_us),
            discrete_tx,
            analog_tx,
            token,
        )
    }

    /// Spawns the input thread around any [`InputSource`].
    ///
    /// The source is built on the input thread itself, so it does not need
    /// to be constructible from the caller's thread. Construction errors are
    /// reported back before this function returns.
    pub fn spawn_with_source<S, F>(
        factory: F,
        poll_interval: Duration,
        discrete_tx: mpsc::Sender<InputEvent>,
        analog_tx: mpsc::Sender<InputEvent>,
        token: CancellationToken,
    ) -> Result<Self, ControllerError>
    where
        S: InputSource + 'static,
        F: FnOnce() -> Result<S, CollectorError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<String, CollectorError>>();
        let thread_token = token.clone();

        let thread = std::thread::Builder::new()
            .name("padmapper-input".to_string())
            .spawn(move || {
                let mut source = match factory() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(source.name().to_string()));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_input_loop(
                    &mut source,
                    poll_interval,
                    &discrete_tx,
                    &analog_tx,
                    &thread_token,
                );
            })
            .map_err(|e| ControllerError::InitializationError(e.to_string()))?;

        let source_name = match ready_rx.recv() {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                error!("Input source failed to start: {}", e);
                return Err(e.into());
            }
            Err(e) => {
                return Err(ControllerError::InitializationError(format!(
                    "Input thread exited before reporting readiness: {}",
                    e
                )))
            }
        };

        info!("Input source '{}' running", source_name);
        Ok(Self {
            token,
            thread: Some(thread),
            source_name,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Stops the input thread and waits for it to exit
    pub fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Input thread panicked");
            }
        }
        debug!("Controller handle shut down");
    }
}

fn run_input_loop<S: InputSource>(
    source: &mut S,
    poll_interval: Duration,
    discrete_tx: &mpsc::Sender<InputEvent>,
    analog_tx: &mpsc::Sender<InputEvent>,
    token: &CancellationToken,
) {
    info!("Starting input loop for '{}'", source.name());

    let mut event_count: u64 = 0;
    let mut dropped_analog: u64 = 0;
    let mut last_log_time = Instant::now();
    let log_interval = Duration::from_secs(10);

    while !token.is_cancelled() {
        match source.poll_event() {
            Ok(Some(event)) if event.is_discrete() => {
                event_count += 1;
                if discrete_tx.blocking_send(event).is_err() {
                    warn!("Discrete channel closed, stopping input loop");
                    break;
                }
                continue;
            }
            Ok(Some(event)) => {
                event_count += 1;
                match analog_tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => dropped_analog += 1,
                    Err(TrySendError::Closed(_)) => {
                        warn!("Analog channel closed, stopping input loop");
                        break;
                    }
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => error!("Error collecting event: {}", e),
        }

        let now = Instant::now();
        if now.duration_since(last_log_time) > log_interval {
            info!(
                "Input stats: {} events in last {} seconds, {} analog samples dropped",
                event_count,
                log_interval.as_secs(),
                dropped_analog
            );
            event_count = 0;
            dropped_analog = 0;
            last_log_time = now;
        }

        std::thread::sleep(poll_interval);
    }

    info!("Input loop for '{}' finished", source.name());
}
