pub mod config;
pub mod console;
pub mod mqtt;
pub mod toggle;

use crate::config::Config;
use crate::mqtt::mqtt_handler::MQTTHandle;
use crate::toggle::controller_handle::ToggleHandle;
use color_eyre::{eyre::eyre, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path).await;
    info!(
        "Light control for {} on {}:{}",
        config.mqtt.topic, config.mqtt.host, config.mqtt.port
    );

    let session = CancellationToken::new();
    let capacity = config.mqtt.channel_capacity.max(1);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

    let mut mqtt_handle = MQTTHandle::spawn(
        config.mqtt.clone(),
        outbound_rx,
        inbound_tx,
        session.clone(),
    )
    .map_err(|e| eyre!("Failed to start MQTT transport: {}", e))?;

    let mut toggle_handle = ToggleHandle::spawn(
        Some(config.controller.clone()),
        inbound_rx,
        outbound_tx,
        session.clone(),
    );

    info!("Starting console");
    let console_result = console::run(&toggle_handle, mqtt_handle.status()).await;

    // Controller first, so nothing arriving during disconnect reaches the view
    if let Err(e) = toggle_handle.shutdown().await {
        error!("Controller shutdown failed: {}", e);
    }
    if let Err(e) = mqtt_handle.shutdown().await {
        error!("Transport shutdown failed: {}", e);
    }

    info!("Session ended");
    console_result
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
