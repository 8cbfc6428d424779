use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS, Transport};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;

use super::{MqttMessage, StatusUpdate};

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    command_topic: String,
}

/// Websocket-over-TLS options for the configured broker.
fn mqtt_options(config: &Config) -> MqttOptions {
    let mut mqttopts = MqttOptions::new(
        config.client_id(),
        config.broker_url(),
        config.mqtt.broker_port,
    );
    mqttopts.set_transport(Transport::wss_with_default_config());
    mqttopts.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));

    if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
        mqttopts.set_credentials(user, pass);
    }
    mqttopts
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), 100);

        Self {
            client,
            eventloop,
            command_topic: config.command_topic(),
        }
    }

    /// Drive the MQTT event loop. Subscribes to the command topic on every
    /// connect, forwards incoming publishes through `command_tx`, and
    /// publishes whatever arrives on `status_rx`. Returns after a clean
    /// disconnect once `status_rx` closes.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut status_rx: mpsc::Receiver<StatusUpdate>,
    ) {
        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                            info!("Connected with result code {:?}", connack.code);
                            if let Err(e) = self
                                .client
                                .try_subscribe(&self.command_topic, QoS::AtMostOnce)
                            {
                                error!("Failed to subscribe to {}: {}", self.command_topic, e);
                            }
                        }
                        Ok(Event::Incoming(Incoming::SubAck(suback))) => {
                            debug!("Subscribed to {} ({:?})", self.command_topic, suback.return_codes);
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let msg = MqttMessage {
                                topic: publish.topic.clone(),
                                payload: String::from_utf8_lossy(&publish.payload).to_string(),
                            };
                            if let Err(e) = command_tx.try_send(msg) {
                                warn!("Dropping inbound message: {}", e);
                            }
                        }
                        Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                            debug!("Status publish written to broker");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                update = status_rx.recv() => {
                    let Some(update) = update else {
                        break;
                    };
                    // The poller is this task, so a full request queue must never be awaited.
                    match self.client.try_publish(
                        &update.topic,
                        QoS::AtMostOnce,
                        false,
                        update.payload.as_bytes(),
                    ) {
                        Ok(()) => debug!("Queued {}: {}", update.topic, update.payload),
                        Err(e) => warn!("Dropping publish {}: {}", update.topic, e),
                    }
                }
            }
        }

        self.disconnect().await;
    }

    /// Queue a DISCONNECT and poll until it has been written out. Gives up
    /// straight away when the request queue is full or the broker is gone.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to request disconnect: {}", e);
            return;
        }
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("Disconnected from MQTT broker");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Event loop ended during disconnect: {}", e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_broker() -> Config {
        let mut config = Config::default();
        config.mqtt.broker_host = "127.0.0.1".into();
        config.mqtt.broker_port = 1;
        config
    }

    /// Feeds `backlog` status updates to a client whose broker refuses
    /// connections, closes the channel, and waits for `run` to return.
    async fn run_until_closed(backlog: usize) {
        let client = MqttClient::new(&unreachable_broker());
        let (command_tx, _command_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = mpsc::channel(backlog + 1);
        for _ in 0..backlog {
            status_tx
                .send(StatusUpdate {
                    topic: "led/status/onoff".into(),
                    payload: "off".into(),
                })
                .await
                .unwrap();
        }
        drop(status_tx);

        let handle = tokio::spawn(client.run(command_tx, status_rx));
        tokio::time::timeout(Duration::from_secs(3600), handle)
            .await
            .expect("run did not return after the status channel closed")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_when_status_channel_closes() {
        run_until_closed(3).await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_more_updates_than_the_request_queue_holds() {
        run_until_closed(150).await;
    }

    #[test]
    fn options_use_secure_websockets() {
        let mut config = Config::default();
        config.device.device_id = "abcd1234".into();
        let opts = mqtt_options(&config);

        assert_eq!(opts.client_id(), "device-abcd1234");
        assert_eq!(
            opts.broker_address(),
            ("wss://mqtt.cgl-mqtt.xyz:443/".to_string(), 443)
        );
        assert_eq!(opts.keep_alive(), Duration::from_secs(60));
        assert!(matches!(opts.transport(), Transport::Wss(_)));
        assert!(opts.credentials().is_none());
    }

    #[test]
    fn credentials_need_both_halves() {
        let mut config = Config::default();
        config.mqtt.username = Some("user".into());
        assert!(mqtt_options(&config).credentials().is_none());

        config.mqtt.password = Some("secret".into());
        assert_eq!(
            mqtt_options(&config).credentials(),
            Some(("user".to_string(), "secret".to_string()))
        );
    }
}
