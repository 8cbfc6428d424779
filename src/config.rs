use std::env;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// Websocket path on the broker, always starting with '/'
    pub broker_path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub sensor_name: String,
    /// Short random identifier, fixed for the lifetime of the process.
    pub device_id: String,
    pub heartbeat_interval_secs: u64,
}

const DEFAULT_BROKER_HOST: &str = "mqtt.cgl-mqtt.xyz";
const DEFAULT_BROKER_PORT: u16 = 443;
const DEFAULT_BROKER_PATH: &str = "/";
const DEFAULT_SENSOR_NAME: &str = "led";
const DEFAULT_HEARTBEAT_SECS: u64 = 10;
const KEEP_ALIVE_SECS: u64 = 60;

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    parse_or_default(key, env::var(key).ok(), default)
}

fn parse_or_default<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}, using default", key, raw);
            default
        }
    }
}

/// First 8 characters of a random v4 UUID, e.g. "3f2a9c1e".
pub fn generate_device_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: DEFAULT_BROKER_HOST.to_string(),
                broker_port: DEFAULT_BROKER_PORT,
                broker_path: DEFAULT_BROKER_PATH.to_string(),
                username: None,
                password: None,
                keep_alive_secs: KEEP_ALIVE_SECS,
            },
            device: DeviceConfig {
                sensor_name: DEFAULT_SENSOR_NAME.to_string(),
                device_id: generate_device_id(),
                heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            },
        }
    }
}

impl Config {
    /// Built-in defaults, each overridable from the environment.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_or_default("MQTT_BROKER_HOST", defaults.mqtt.broker_host),
                broker_port: env_or_default("MQTT_BROKER_PORT", defaults.mqtt.broker_port),
                broker_path: normalize_path(&env_or_default(
                    "MQTT_BROKER_PATH",
                    defaults.mqtt.broker_path,
                )),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                keep_alive_secs: defaults.mqtt.keep_alive_secs,
            },
            device: DeviceConfig {
                sensor_name: env_or_default("SENSOR_NAME", defaults.device.sensor_name),
                device_id: defaults.device.device_id,
                heartbeat_interval_secs: env_or_default(
                    "HEARTBEAT_INTERVAL_SECS",
                    defaults.device.heartbeat_interval_secs,
                ),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.mqtt.broker_host.is_empty() {
            return Err("MQTT_BROKER_HOST must not be empty".into());
        }
        if self.mqtt.broker_port == 0 {
            return Err("MQTT_BROKER_PORT must be > 0".into());
        }
        if self.device.sensor_name.is_empty() {
            return Err("SENSOR_NAME must not be empty".into());
        }
        if self.device.sensor_name.contains(['/', '+', '#']) {
            return Err(format!(
                "SENSOR_NAME '{}' must not contain '/', '+' or '#'",
                self.device.sensor_name
            ));
        }
        if self.device.heartbeat_interval_secs == 0 {
            return Err("HEARTBEAT_INTERVAL_SECS must be > 0".into());
        }
        Ok(())
    }

    pub fn client_id(&self) -> String {
        format!("device-{}", self.device.device_id)
    }

    /// rumqttc takes the full websocket URL in place of the host when the
    /// transport is `wss`.
    pub fn broker_url(&self) -> String {
        format!(
            "wss://{}:{}{}",
            self.mqtt.broker_host, self.mqtt.broker_port, self.mqtt.broker_path
        )
    }

    pub fn command_topic(&self) -> String {
        format!("{}/command/onoff", self.device.sensor_name)
    }

    pub fn status_topic(&self) -> String {
        format!("{}/status/onoff", self.device.sensor_name)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.device.heartbeat_interval_secs)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
