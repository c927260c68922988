//! Message bus port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::BusError;

/// A message read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    /// Position in the log; increases with every publish.
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    /// `topic:offset`, for log lines.
    pub fn message_id(&self) -> String {
        format!("{}:{}", self.topic, self.offset)
    }
}

/// At-least-once publish/subscribe log with consumer-group commits.
///
/// `consume_one` returns the first message past the group's committed offset,
/// so a message that is never committed is delivered again on the next call.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self, topics: &[String]) -> Result<(), BusError>;

    async fn consume_one(&self) -> Result<Option<BusMessage>, BusError>;

    /// Mark a message, and everything before it on its topic, as handled.
    async fn commit(&self, message: &BusMessage) -> Result<(), BusError>;

    /// Append a message, returning its offset.
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8])
        -> Result<i64, BusError>;
}
