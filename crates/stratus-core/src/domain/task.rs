//! Notification task: the payload carried by the durable queue.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A request to notify someone, serialized as the body of one queue message.
///
/// Wire names follow the JSON the publisher and the mailer agree on:
/// `to`, `subject`, `body`, and the optional `type` / `meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTask {
    #[serde(rename = "to")]
    pub recipient: String,

    pub subject: String,

    pub body: String,

    /// Free-form classification (e.g. `"welcome"`), not interpreted by the pool.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(rename = "meta", default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NotificationTask {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            kind: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Encode as the JSON body published to the queue.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a queue body. A failure here marks the message as poison.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
