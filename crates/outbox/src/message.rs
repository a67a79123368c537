use chrono::{DateTime, Utc};
use common::{ChannelName, MessageId, SessionId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A channel-agnostic message stored in an outbox and delivered by a channel.
///
/// Messages are value objects. Application-specific content travels in
/// `payload` as JSON, so repositories and channels never need to know the
/// concrete message shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,

    /// The saga session this message belongs to.
    pub session_id: SessionId,

    /// Free-form description of what produced the message.
    pub trigger: String,

    /// When the message was created.
    pub created_at: DateTime<Utc>,

    /// The message body as JSON.
    pub payload: serde_json::Value,
}

impl Message {
    /// Creates a message with a fresh ID, the current time and a null payload.
    pub fn new(session_id: SessionId, trigger: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            trigger: trigger.into(),
            created_at: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the payload from a serializable value.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = serde_json::to_value(payload)?;
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn with_payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Decodes the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// A message together with the channel it arrived through.
///
/// The origin is what tells the orchestrator whether a response reports
/// success or failure.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePacket {
    origin: ChannelName,
    payload: Message,
}

impl MessagePacket {
    pub fn new(origin: ChannelName, payload: Message) -> Self {
        Self { origin, payload }
    }

    pub fn origin(&self) -> &ChannelName {
        &self.origin
    }

    pub fn payload(&self) -> &Message {
        &self.payload
    }

    pub fn into_payload(self) -> Message {
        self.payload
    }
}
