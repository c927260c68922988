//! In-process message bus.
//!
//! Handles created with [`InMemoryMessageBus::with_group`] share one log and
//! one offset table, so tests can watch dispatch topics from a separate group.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::BusError;
use crate::domain::ports::{BusMessage, MessageBus};

#[derive(Default)]
struct SharedLog {
    messages: RwLock<Vec<BusMessage>>,
    /// (group, topic) to highest committed offset.
    offsets: RwLock<HashMap<(String, String), i64>>,
}

#[derive(Clone)]
pub struct InMemoryMessageBus {
    log: Arc<SharedLog>,
    group_id: String,
    topics: Arc<RwLock<Vec<String>>>,
}

impl InMemoryMessageBus {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            log: Arc::new(SharedLog::default()),
            group_id: group_id.into(),
            topics: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Another consumer group over the same log, with no subscriptions.
    pub fn with_group(&self, group_id: impl Into<String>) -> Self {
        Self {
            log: self.log.clone(),
            group_id: group_id.into(),
            topics: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Every message ever published on `topic`.
    pub async fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.log
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn subscribe(&self, topics: &[String]) -> Result<(), BusError> {
        let mut current = self.topics.write().await;
        for topic in topics {
            if !current.contains(topic) {
                current.push(topic.clone());
            }
        }
        Ok(())
    }

    async fn consume_one(&self) -> Result<Option<BusMessage>, BusError> {
        let topics = self.topics.read().await;
        if topics.is_empty() {
            return Err(BusError::NotSubscribed);
        }

        let offsets = self.log.offsets.read().await;
        let committed = |topic: &str| {
            offsets
                .get(&(self.group_id.clone(), topic.to_string()))
                .copied()
                .unwrap_or(0)
        };

        let messages = self.log.messages.read().await;
        Ok(messages
            .iter()
            .find(|m| topics.contains(&m.topic) && m.offset > committed(&m.topic))
            .cloned())
    }

    async fn commit(&self, message: &BusMessage) -> Result<(), BusError> {
        let mut offsets = self.log.offsets.write().await;
        let committed = offsets
            .entry((self.group_id.clone(), message.topic.clone()))
            .or_insert(0);
        *committed = (*committed).max(message.offset);
        Ok(())
    }

    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<i64, BusError> {
        let mut messages = self.log.messages.write().await;
        let offset = i64::try_from(messages.len()).unwrap_or(i64::MAX - 1) + 1;
        messages.push(BusMessage {
            topic: topic.to_string(),
            offset,
            key: key.map(str::to_string),
            payload: payload.to_vec(),
            published_at: Utc::now(),
        });
        Ok(offset)
    }
}
