//! The message envelope exchanged between networks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::types::{MessageType, Priority};
use crate::error::Result;

/// Untyped key/value body carried by a message.
pub type Payload = serde_json::Map<String, Value>;

/// Default time a sender waits for a response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of resubmissions after a response timeout.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Message envelope for inter-network communication.
///
/// The JSON form uses the keys `message_id`, `message_type`, `sender_id`,
/// `receiver_id`, `priority`, `timestamp`, `payload`, `metadata`,
/// `parent_message_id`, `requires_response`, `timeout_seconds`, `retry_count`
/// and `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (ULID)
    #[serde(rename = "message_id")]
    pub id: String,
    pub message_type: MessageType,
    /// Stamped by the sending protocol
    pub sender_id: String,
    /// Empty for broadcast
    pub receiver_id: String,
    pub priority: Priority,
    /// RFC 3339 on the wire; offset-less ISO-8601 input is read as UTC
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: Payload,
    /// ID of the request this message answers
    #[serde(rename = "parent_message_id", default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub requires_response: bool,
    #[serde(
        rename = "timeout_seconds",
        default = "default_timeout",
        with = "timeout_seconds"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Message {
    /// Create a message addressed to a single network.
    pub fn new(message_type: MessageType, receiver_id: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            message_type,
            sender_id: String::new(),
            receiver_id: receiver_id.into(),
            priority: Priority::Normal,
            timestamp: Utc::now(),
            payload: Payload::new(),
            metadata: Payload::new(),
            parent_id: None,
            requires_response: false,
            timeout: DEFAULT_TIMEOUT,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create a message addressed to every registered network.
    pub fn broadcast(message_type: MessageType) -> Self {
        Self::new(message_type, "")
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Insert a single payload entry.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Link this message to the request it belongs to.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Check whether the message is addressed to everyone.
    pub fn is_broadcast(&self) -> bool {
        self.receiver_id.is_empty()
    }

    /// Build the response to this message.
    ///
    /// The response goes back to this message's sender, comes from its receiver and
    /// carries this message's ID as `parent_id`.
    pub fn create_response(&self, payload: Payload, metadata: Option<Payload>) -> Self {
        Self {
            message_type: MessageType::QueryResponse,
            sender_id: self.receiver_id.clone(),
            priority: self.priority,
            payload,
            metadata: metadata.unwrap_or_default(),
            parent_id: Some(self.id.clone()),
            ..Self::new(MessageType::QueryResponse, self.sender_id.clone())
        }
    }

    /// Copy of this message for one recipient, with a fresh ID.
    ///
    /// Sender, type, priority, payload, metadata and timing settings are kept.
    pub fn addressed_copy(&self, receiver_id: impl Into<String>) -> Self {
        Self {
            message_type: self.message_type,
            sender_id: self.sender_id.clone(),
            priority: self.priority,
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
            timeout: self.timeout,
            max_retries: self.max_retries,
            ..Self::new(self.message_type, receiver_id)
        }
    }

    /// Check if the message may be resubmitted after a timeout.
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Increment the retry counter.
    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Serialize to the structural JSON form.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse the structural JSON form, filling in defaults for optional keys.
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

fn generate_id() -> String {
    ulid::Ulid::new().to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// `Duration` as fractional seconds.
mod timeout_seconds {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid timeout_seconds {}: {}", secs, e)))
    }
}

/// `DateTime<Utc>` as ISO-8601 text.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse(&text).ok_or_else(|| D::Error::custom(format!("invalid timestamp {:?}", text)))
    }

    pub(super) fn parse(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}
