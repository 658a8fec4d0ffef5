use serde::Serialize;
use std::sync::Arc;

use super::topic::Topic;

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    topic: Topic,
    data: &'a T,
}

/// Outbound message. The payload is serialized once at construction, so every
/// subscriber receives the same immutable snapshot of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: Topic,
    text: Arc<str>,
}

impl Message {
    pub fn new<T: Serialize>(topic: Topic, data: &T) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(&Envelope { topic, data })?;
        Ok(Self {
            topic,
            text: Arc::from(text),
        })
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// The wire form: `{"type":<topic byte>,"data":<payload>}`.
    pub fn text(&self) -> &str {
        &self.text
    }
}
