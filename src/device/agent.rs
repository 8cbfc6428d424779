use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::mqtt::{MqttMessage, StatusUpdate};

use super::{DeviceState, OnOff};

/// The single writer of `DeviceState`. Consumes inbound commands and
/// emits status publishes, both on change and on a fixed heartbeat.
pub struct Agent {
    state: DeviceState,
    command_topic: String,
    status_topic: String,
    heartbeat_interval: Duration,
}

impl Agent {
    pub fn new(config: &Config, state: DeviceState) -> Self {
        Self {
            state,
            command_topic: config.command_topic(),
            status_topic: config.status_topic(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    /// Apply one inbound message. Returns the publish to emit when the
    /// payload was a valid command, `None` otherwise.
    pub fn handle_command(&self, msg: &MqttMessage) -> Option<StatusUpdate> {
        if msg.topic != self.command_topic {
            debug!("Ignoring message on unexpected topic {}", msg.topic);
            return None;
        }
        info!("Received command: {} on {}", msg.payload, msg.topic);

        let Some(value) = OnOff::parse(&msg.payload) else {
            warn!("Ignoring invalid on/off payload: {:?}", msg.payload);
            return None;
        };

        self.state.set(value);
        info!("Changed state to: {}", value);
        Some(self.status(value))
    }

    fn status(&self, value: OnOff) -> StatusUpdate {
        StatusUpdate {
            topic: self.status_topic.clone(),
            payload: value.as_str().to_string(),
        }
    }

    /// Run until `shutdown` flips (or its sender is dropped) or either
    /// channel closes. The first heartbeat goes out immediately.
    pub async fn run(
        &self,
        mut cmd_rx: mpsc::Receiver<MqttMessage>,
        status_tx: mpsc::Sender<StatusUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Shutdown is checked first so nothing is published once it is seen.
            let update = tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("Agent stopping");
                    break;
                }
                _ = heartbeat.tick() => self.status(self.state.get()),
                msg = cmd_rx.recv() => {
                    let Some(msg) = msg else {
                        warn!("Command channel closed");
                        break;
                    };
                    match self.handle_command(&msg) {
                        Some(update) => update,
                        None => continue,
                    }
                }
            };

            // A full status channel must not hold off shutdown.
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("Agent stopping with status {} unsent", update.payload);
                    break;
                }
                sent = status_tx.send(update.clone()) => {
                    if sent.is_err() {
                        warn!("Status channel closed");
                        break;
                    }
                    info!("Published status: {} on {}", update.payload, update.topic);
                }
            }
        }
    }
}
