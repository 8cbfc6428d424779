pub mod client;

/// An inbound publish, forwarded from the MQTT event loop to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// An outbound publish requested by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub topic: String,
    pub payload: String,
}
