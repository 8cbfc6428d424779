mod config;
mod device;
mod mqtt;

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting mocked {} sensor {} (broker={}, heartbeat={}s)",
        config.device.sensor_name,
        config.client_id(),
        config.broker_url(),
        config.device.heartbeat_interval_secs,
    );

    let (command_tx, command_rx) = mpsc::channel::<mqtt::MqttMessage>(100);
    let (status_tx, status_rx) = mpsc::channel::<mqtt::StatusUpdate>(100);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mqtt_client = mqtt::client::MqttClient::new(&config);
    let mut mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(command_tx, status_rx).await;
    });

    let state = device::DeviceState::new();
    let agent = device::agent::Agent::new(&config, state.clone());
    let mut agent_handle = tokio::spawn(async move {
        agent.run(command_rx, status_tx, shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = async {
            let mut sigterm = tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate()
            ).expect("Failed to register SIGTERM handler");
            sigterm.recv().await;
        } => {
            info!("Received SIGTERM, shutting down");
        }
    }

    // Stopping the agent closes the status channel, which makes the MQTT
    // task send DISCONNECT and return.
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(Duration::from_secs(5), &mut agent_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Agent task failed: {}", e),
        Err(_) => {
            warn!("Agent shutdown timed out");
            agent_handle.abort();
        }
    }
    if tokio::time::timeout(Duration::from_secs(5), &mut mqtt_handle)
        .await
        .is_err()
    {
        warn!("MQTT disconnect timed out");
        mqtt_handle.abort();
    }

    info!("Device status: {}", state.get());
    info!("Exiting...");
}
