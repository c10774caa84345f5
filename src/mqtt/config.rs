use rumqttc::MqttOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker connection and topic settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Shared topic for commands and status replies
    pub topic: String,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Prefix of the generated client id
    pub client_prefix: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Pause between failed polls before the event loop reconnects
    pub reconnect_delay_ms: u64,
    /// Capacity of the inbound and outbound message channels
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            topic: "esp32/light_control".to_string(),
            keep_alive_secs: 5,
            clean_session: true,
            client_prefix: "LightControl".to_string(),
            user: None,
            password: None,
            reconnect_delay_ms: 1000,
            channel_capacity: 100,
        }
    }
}

impl MqttConfig {
    /// Fresh client id per connection: `<prefix>_<unix millis>_<0..10000>`
    pub fn generate_client_id(&self) -> String {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let random = uuid::Uuid::new_v4().as_u128() % 10_000;
        format!("{}_{}_{}", self.client_prefix, timestamp, random)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(self.generate_client_id(), self.host.clone(), self.port);
        // sub-second keep-alive panics inside rumqttc
        mqtt_options
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(1)))
            .set_clean_session(self.clean_session);

        if let Some(user) = &self.user {
            mqtt_options.set_credentials(user.clone(), self.password.clone().unwrap_or_default());
        }
        mqtt_options
    }
}
