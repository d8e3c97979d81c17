use color_eyre::{eyre::eyre, Result};
use padmapper::action::ActionExecutor;
use padmapper::config::AppConfig;
use padmapper::controller::ControllerHandle;
use padmapper::engine::{Engine, EngineHandle};
use padmapper::output::{LoggingFeedback, LoggingSink, QueuedSink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AppConfig::default_path()?;
    let config = AppConfig::load_or_default(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load config from {:?}: {}", config_path, e))?;
    let profile = config.active_profile()?.clone();
    info!("Starting with profile '{}'", profile.name);

    // Output queues outlive the engine so the final key-ups still go out
    let output_token = CancellationToken::new();
    let (sink, mut output_queues) = QueuedSink::spawn(
        Arc::new(LoggingSink),
        config.runtime.output_capacity.max(1),
        output_token,
    );

    let engine = Engine::new(ActionExecutor::new(Arc::new(sink)), config.engine.clone())
        .with_feedback_listener(Arc::new(LoggingFeedback));
    engine.switch_profile(profile)?;
    let engine = Arc::new(engine);

    let token = CancellationToken::new();
    let mut engine_handle = EngineHandle::start(engine, config.runtime.clone(), token.clone())?;

    let mut controller = ControllerHandle::spawn(
        Some(config.controller.clone()),
        engine_handle.input_sender(),
        engine_handle.analog_sender(),
        token.clone(),
    )
    .map_err(|e| eyre!("Failed to spawn controller: {}", e))?;
    info!("Listening to '{}', press Ctrl-C to quit", controller.source_name());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    token.cancel();
    if let Err(e) = tokio::task::spawn_blocking(move || controller.shutdown()).await {
        error!("Controller shutdown failed: {}", e);
    }
    engine_handle.shutdown().await?;
    output_queues.shutdown().await;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
