use chrono::NaiveDateTime;
use std::fmt;

/// A publish received on the subscribed topic, stamped on arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MQTTMessage {
    topic: String,
    content: String,
    timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.content.chars().take(32).collect();
        write!(f, "{} - {}", self.timestamp, preview)
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: String, content: String) -> Self {
        MQTTMessage {
            topic,
            content,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// Decodes a raw payload. Invalid UTF-8 is replaced rather than rejected,
    /// the controller ignores payloads it does not recognize anyway.
    pub fn from_payload(topic: &str, payload: &[u8]) -> Self {
        Self::from_topic(
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        )
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn render(&self) -> String {
        format!("{}: {}\n{}", self.timestamp, self.topic, self.content)
    }
}
